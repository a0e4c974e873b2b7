//! The session controller: one provider connection, the loaded contracts, and
//! the render cycle that refreshes every dashboard region.
//!
//! A render cycle launches independent chains (account, recent calls, supply
//! figures plus balance, recent transfers). Only the supply chain holds the
//! loading flag; the other chains may still be running after it clears.
//! Chain failures are logged and counted, and leave the affected state at its
//! previous value.

use anyhow::{Context, Result};
use ethers::{
    abi::Token,
    types::{Address, H256, U256},
};
use log::{debug, error, info, warn};
use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::{Duration, Instant},
};
use tokio::{sync::RwLock, task::JoinHandle};

use crate::abi::ArtifactSource;
use crate::config::{DashboardConfig, DEFAULT_TOTAL_SUPPLY};
use crate::contracts::ContractHandle;
use crate::display::{DisplaySink, DisplayUpdate};
use crate::error::SessionError;
use crate::events::{contract_events_filter, fetch_recent_transfers, watch_events};
use crate::monitoring::Metrics;
use crate::provider::{self, Ledger};
use crate::sale::SaleFigures;
use crate::scan::{scan_recent_calls, CallRecord, ScanPlan};

#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub account: Option<Address>,
    pub last_transactions: Vec<CallRecord>,
    pub last_transfers: Vec<H256>,
    pub token_price: U256,
    pub total_supply: U256,
    pub remaining_supply: U256,
    pub tokens_claimed: U256,
    pub progress_percent: Option<f64>,
    pub balance: U256,
}

impl SessionState {
    pub fn new(token_price: U256) -> Self {
        Self {
            account: None,
            last_transactions: Vec::new(),
            last_transfers: Vec::new(),
            token_price,
            total_supply: U256::from(DEFAULT_TOTAL_SUPPLY),
            remaining_supply: U256::from(DEFAULT_TOTAL_SUPPLY),
            tokens_claimed: U256::zero(),
            progress_percent: Some(0.0),
            balance: U256::zero(),
        }
    }

    fn apply_figures(&mut self, figures: &SaleFigures) {
        self.token_price = figures.token_price;
        self.total_supply = figures.total_supply;
        self.remaining_supply = figures.remaining_supply;
        self.tokens_claimed = figures.tokens_claimed;
        self.progress_percent = figures.progress_percent;
    }
}

#[derive(Debug)]
pub enum RenderOutcome {
    Started(RenderCycle),
    /// A previous cycle still holds the loading flag.
    AlreadyLoading,
    /// No provider or no sale contract yet.
    NotReady,
}

/// Handles of the chains launched by one render. Dropping it detaches them.
#[derive(Debug)]
pub struct RenderCycle {
    chains: Vec<JoinHandle<()>>,
}

impl RenderCycle {
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Waits for every chain of the cycle.
    pub async fn wait(self) {
        for chain in self.chains {
            if let Err(e) = chain.await {
                warn!("render chain panicked or was cancelled: {}", e);
            }
        }
    }
}

/// Clears the loading flag when the supply chain ends, however it ends.
struct LoadingGuard {
    flag: Arc<AtomicBool>,
    metrics: Arc<Metrics>,
    started: Instant,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.metrics
            .render_duration
            .observe(self.started.elapsed().as_secs_f64());
        self.flag.store(false, Ordering::Release);
    }
}

#[derive(Clone)]
struct RenderContext {
    ledger: Arc<dyn Ledger>,
    sale: Arc<ContractHandle>,
    config: Arc<DashboardConfig>,
    state: Arc<RwLock<SessionState>>,
    display: Arc<dyn DisplaySink>,
    metrics: Arc<Metrics>,
}

pub struct SessionController {
    config: Arc<DashboardConfig>,
    ledger: Option<Arc<dyn Ledger>>,
    contracts: HashMap<String, Arc<ContractHandle>>,
    state: Arc<RwLock<SessionState>>,
    loading: Arc<AtomicBool>,
    watcher: Mutex<Option<JoinHandle<()>>>,
    display: Arc<dyn DisplaySink>,
    metrics: Arc<Metrics>,
}

impl SessionController {
    pub fn new(
        config: DashboardConfig,
        display: Arc<dyn DisplaySink>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let state = SessionState::new(config.token_price_wei);
        Self {
            config: Arc::new(config),
            ledger: None,
            contracts: HashMap::new(),
            state: Arc::new(RwLock::new(state)),
            loading: Arc::new(AtomicBool::new(false)),
            watcher: Mutex::new(None),
            display,
            metrics,
        }
    }

    /// Connects and loads contracts. Failures are only logged.
    pub async fn initialize(&mut self) {
        info!("Session initializing...");
        if let Err(e) = self.try_initialize().await {
            error!("Session initialization stopped: {:#}", e);
        }
    }

    pub async fn try_initialize(&mut self) -> Result<()> {
        let url = self.config.provider_url().to_string();
        let ledger = provider::connect(&url).await?;
        self.attach(ledger);
        self.load_contracts().await
    }

    /// Replaces the provider. Contracts and the event watcher bound to the
    /// previous one are dropped.
    pub fn attach(&mut self, ledger: Arc<dyn Ledger>) {
        let watcher = match self.watcher.get_mut() {
            Ok(watcher) => watcher.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(watcher) = watcher {
            debug!("Stopping event watcher of the previous provider");
            watcher.abort();
        }
        self.ledger = Some(ledger);
        self.contracts.clear();
    }

    /// Loads every configured descriptor in order, stopping at the first failure.
    pub async fn load_contracts(&mut self) -> Result<()> {
        let ledger = self.ledger.clone().ok_or(SessionError::NotConnected)?;
        let network_id = ledger
            .network_id()
            .await
            .context("failed to read network id")?;
        let source = ArtifactSource::parse(&self.config.artifacts_location);

        for name in self.config.contracts.iter() {
            let artifact = source
                .load(name)
                .await
                .with_context(|| format!("failed to load contract {}", name))?;
            let handle = ContractHandle::bind(artifact, &network_id);

            if name == &self.config.sale_contract {
                match handle.address {
                    Some(address) => info!("{} Address: {:?}", name, address),
                    None => warn!("{} has no deployment on network {}", name, network_id),
                }
            }
            debug!("Loaded contract {}", name);
            self.contracts.insert(name.clone(), Arc::new(handle));
        }

        Ok(())
    }

    pub fn contract(&self, name: &str) -> Option<&ContractHandle> {
        self.contracts.get(name).map(|handle| handle.as_ref())
    }

    pub fn require_contract(&self, name: &str) -> Result<Arc<ContractHandle>, SessionError> {
        self.contracts
            .get(name)
            .cloned()
            .ok_or_else(|| SessionError::ContractNotLoaded(name.to_string()))
    }

    /// Whether a live event watcher is currently running.
    pub fn is_watching(&self) -> bool {
        match self.watcher.lock() {
            Ok(watcher) => watcher.as_ref().map_or(false, |task| !task.is_finished()),
            Err(poisoned) => poisoned
                .into_inner()
                .as_ref()
                .map_or(false, |task| !task.is_finished()),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Starts a render cycle unless one is already in flight. Must run inside a tokio runtime.
    pub fn render(&self) -> RenderOutcome {
        let ready = self
            .ledger
            .clone()
            .ok_or(SessionError::NotConnected)
            .and_then(|ledger| Ok((ledger, self.require_contract(&self.config.sale_contract)?)));
        let (ledger, sale) = match ready {
            Ok(ready) => ready,
            Err(e) => {
                warn!("Render requested before the session was ready: {}", e);
                return RenderOutcome::NotReady;
            }
        };

        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Render skipped, previous cycle still loading");
            self.metrics.renders_skipped.inc();
            return RenderOutcome::AlreadyLoading;
        }

        self.metrics.renders_started.inc();
        self.display.set_loading(true);

        let guard = LoadingGuard {
            flag: self.loading.clone(),
            metrics: self.metrics.clone(),
            started: Instant::now(),
        };
        let ctx = RenderContext {
            ledger,
            sale,
            config: self.config.clone(),
            state: self.state.clone(),
            display: self.display.clone(),
            metrics: self.metrics.clone(),
        };

        let chains = vec![
            spawn_chain("account", &ctx, refresh_account(ctx.clone())),
            spawn_chain("calls", &ctx, refresh_recent_calls(ctx.clone())),
            spawn_chain("figures", &ctx, refresh_figures(ctx.clone(), guard)),
            spawn_chain("transfers", &ctx, refresh_transfers(ctx.clone())),
        ];

        if self.config.watch_events {
            self.ensure_event_watcher(&ctx);
        }

        RenderOutcome::Started(RenderCycle { chains })
    }

    /// Starts the live watcher unless one is still running. A watcher that
    /// ended is replaced on the next render.
    fn ensure_event_watcher(&self, ctx: &RenderContext) {
        let mut watcher = match self.watcher.lock() {
            Ok(watcher) => watcher,
            Err(poisoned) => poisoned.into_inner(),
        };
        if watcher.as_ref().map_or(false, |task| !task.is_finished()) {
            return;
        }

        let address = match ctx.sale.address {
            Some(address) => address,
            None => {
                debug!("{} is not deployed, no event watcher", ctx.sale.name);
                return;
            }
        };
        let filter = contract_events_filter(address, self.config.events_from_block);
        let ledger = ctx.ledger.clone();
        let abi = ctx.sale.abi.clone();
        let metrics = ctx.metrics.clone();

        info!("Watching events of {} at {:?}", ctx.sale.name, address);
        *watcher = Some(tokio::spawn(async move {
            match watch_events(ledger.as_ref(), &abi, filter, &metrics).await {
                Ok(()) => warn!("event watcher ended"),
                Err(e) => error!("event watcher stopped: {:#}", e),
            }
        }));
    }
}

/// Renders every `poll_interval` until `shutdown` resolves.
pub async fn run_until<S>(session: &SessionController, poll_interval: Duration, shutdown: S)
where
    S: Future<Output = ()>,
{
    info!("Polling every {:?}", poll_interval);
    let mut ticker = tokio::time::interval(poll_interval);
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => match session.render() {
                RenderOutcome::Started(cycle) => {
                    debug!("Render cycle started with {} chains", cycle.chain_count());
                }
                RenderOutcome::AlreadyLoading => debug!("Previous render still loading"),
                RenderOutcome::NotReady => warn!("Session not ready, nothing to render"),
            },
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }
}

fn spawn_chain<F>(name: &'static str, ctx: &RenderContext, chain: F) -> JoinHandle<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let metrics = ctx.metrics.clone();
    tokio::spawn(async move {
        if let Err(e) = chain.await {
            error!("{} chain failed: {:#}", name, e);
            metrics.record_chain_failure(name);
        }
    })
}

async fn refresh_account(ctx: RenderContext) -> Result<()> {
    let account = ctx.ledger.active_account().await?;
    ctx.state.write().await.account = account;
    ctx.display.show(DisplayUpdate::Account(account));
    Ok(())
}

async fn refresh_recent_calls(ctx: RenderContext) -> Result<()> {
    let plan = ScanPlan::from_config(&ctx.config);
    let report = scan_recent_calls(ctx.ledger.as_ref(), &plan).await?;

    ctx.metrics.blocks_scanned.inc_by(report.blocks_visited);
    ctx.metrics.calls_collected.set(report.calls.len() as i64);

    let inputs = report.calls.iter().map(CallRecord::ascii).collect();
    ctx.state.write().await.last_transactions = report.calls;
    ctx.display.show(DisplayUpdate::LastFunctions(inputs));
    Ok(())
}

/// Supply figures, then the placeholder holder's balance. Holds the loading flag.
async fn refresh_figures(ctx: RenderContext, _guard: LoadingGuard) -> Result<()> {
    let ledger = ctx.ledger.as_ref();
    let token_price = ctx.config.token_price_wei;

    let total_supply = ctx.sale.call_u256(ledger, "totalSupply", &[]).await?;
    let remaining_supply = ctx.sale.call_u256(ledger, "remainingSupply", &[]).await?;
    let figures = SaleFigures::compute(token_price, total_supply, remaining_supply);

    ctx.state.write().await.apply_figures(&figures);
    ctx.display
        .show(DisplayUpdate::TokenPrice(figures.token_price_ether()));
    ctx.display
        .show(DisplayUpdate::TokensClaimed(figures.tokens_claimed));
    ctx.display
        .show(DisplayUpdate::TokensAvailable(figures.remaining_supply));
    ctx.display
        .show(DisplayUpdate::Progress(figures.progress_percent));

    let holder = Token::String(ctx.config.balance_holder.clone());
    let balance = ctx.sale.call_u256(ledger, "balanceOf", &[holder]).await?;
    ctx.state.write().await.balance = balance;
    ctx.display.show(DisplayUpdate::Balance(balance));

    ctx.display.set_loading(false);
    Ok(())
}

async fn refresh_transfers(ctx: RenderContext) -> Result<()> {
    let address = ctx.sale.deployed()?;
    let filter = contract_events_filter(address, ctx.config.events_from_block);
    let hashes = fetch_recent_transfers(ctx.ledger.as_ref(), filter).await?;

    ctx.state.write().await.last_transfers = hashes.clone();
    ctx.display.show(DisplayUpdate::LastTransfers(hashes));
    Ok(())
}
