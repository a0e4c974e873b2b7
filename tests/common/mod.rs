#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bagel_watch::{
    abi::Artifact,
    config::DashboardConfig,
    display::{DisplaySink, DisplayUpdate},
    monitoring::Metrics,
    provider::Ledger,
    SessionController,
};
use ethers::{
    abi::{Abi, Token},
    types::{Address, Bytes, Filter, Log, Transaction, H256, U256},
};
use std::{
    collections::HashMap,
    str::FromStr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, Once,
    },
    time::Duration,
};
use tokio::sync::{mpsc::UnboundedSender, Semaphore};

pub const NETWORK_ID: &str = "4";
pub const BAGEL_ADDRESS: &str = "0x44d936C8Ce21eb6f55e11c4cd782894c0D20ECF2";

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

pub fn bagel_abi() -> Abi {
    Artifact::from_json("Bagel.json", include_str!("../../artifacts/Bagel.json"))
        .unwrap()
        .abi
}

pub fn selector(method: &str) -> [u8; 4] {
    bagel_abi().function(method).unwrap().short_signature()
}

pub fn bagel_address() -> Address {
    Address::from_str(BAGEL_ADDRESS).unwrap()
}

pub fn tx_hash(block: u64, index: u64) -> H256 {
    H256::from_low_u64_be(block * 1_000 + index)
}

/// In-memory node with optional gates that hold calls until permits are added.
#[derive(Default)]
pub struct FakeLedger {
    pub account: Option<Address>,
    pub blocks: HashMap<u64, Vec<H256>>,
    pub transactions: HashMap<H256, Transaction>,
    pub views: HashMap<[u8; 4], U256>,
    pub logs: Vec<Log>,
    pub recorded_calls: Mutex<Vec<Bytes>>,
    pub call_gate: Option<Arc<Semaphore>>,
    pub block_gate: Option<Arc<Semaphore>>,
    /// Delays transaction lookups by a hash-derived amount to shuffle resolution order.
    pub jitter: bool,
    pub watch_count: AtomicUsize,
    /// Logs delivered through `watch_logs` once `watch_gate` lets them through.
    pub watched: Vec<Log>,
    pub watch_gate: Option<Arc<Semaphore>>,
    /// When set, `watch_logs` returns after delivering instead of following forever.
    pub watch_ends: bool,
    pub in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
}

/// Counts one outstanding block or transaction fetch until dropped.
struct InFlight<'a> {
    ledger: &'a FakeLedger,
}

impl<'a> InFlight<'a> {
    fn enter(ledger: &'a FakeLedger) -> Self {
        let now = ledger.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        ledger.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        Self { ledger }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.ledger.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            account: Some(Address::repeat_byte(0xaa)),
            ..Default::default()
        }
    }

    pub fn with_sale(mut self, total: u64, remaining: u64, balance: u64) -> Self {
        self.views.insert(selector("totalSupply"), U256::from(total));
        self.views.insert(selector("remainingSupply"), U256::from(remaining));
        self.views.insert(selector("balanceOf"), U256::from(balance));
        self
    }

    /// Adds `per_block` transactions to each block in `heights`; those with an
    /// index in `to_target` are sent to `target`.
    pub fn with_blocks(
        mut self,
        heights: impl IntoIterator<Item = u64>,
        per_block: u64,
        to_target: &[u64],
        target: Address,
    ) -> Self {
        for height in heights {
            let mut hashes = Vec::new();
            for index in 0..per_block {
                let hash = tx_hash(height, index);
                let to = if to_target.contains(&index) {
                    target
                } else {
                    Address::repeat_byte(0x01)
                };
                self.transactions.insert(
                    hash,
                    Transaction {
                        hash,
                        to: Some(to),
                        input: Bytes::from(format!("fn-{}-{}", height, index).into_bytes()),
                        ..Default::default()
                    },
                );
                hashes.push(hash);
            }
            self.blocks.insert(height, hashes);
        }
        self
    }

    pub fn with_logs(mut self, count: u64) -> Self {
        self.logs = (1..=count)
            .map(|n| Log {
                address: bagel_address(),
                transaction_hash: Some(H256::from_low_u64_be(n)),
                ..Default::default()
            })
            .collect();
        self
    }

    pub fn with_watched(mut self, hashes: impl IntoIterator<Item = u64>) -> Self {
        self.watched = hashes
            .into_iter()
            .map(|n| Log {
                address: bagel_address(),
                transaction_hash: Some(H256::from_low_u64_be(n)),
                ..Default::default()
            })
            .collect();
        self
    }

    pub fn peak(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn recorded(&self, method: &str) -> Vec<Bytes> {
        let wanted = selector(method);
        self.recorded_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|data| data.len() >= 4 && data[..4] == wanted)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    async fn network_id(&self) -> Result<String> {
        Ok(NETWORK_ID.to_string())
    }

    async fn active_account(&self) -> Result<Option<Address>> {
        Ok(self.account)
    }

    async fn block_transactions(&self, height: u64) -> Result<Option<Vec<H256>>> {
        let _fetch = InFlight::enter(self);
        if let Some(gate) = &self.block_gate {
            let _permit = gate.acquire().await?;
        }
        Ok(self.blocks.get(&height).cloned())
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>> {
        let _fetch = InFlight::enter(self);
        if self.jitter {
            let millis = (hash.to_low_u64_be() * 7919) % 13;
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
        Ok(self.transactions.get(&hash).cloned())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        if let Some(gate) = &self.call_gate {
            let _permit = gate.acquire().await?;
        }
        if to != bagel_address() {
            return Err(anyhow!("no contract at {:?}", to));
        }
        self.recorded_calls.lock().unwrap().push(data.clone());

        let selector: [u8; 4] = data
            .get(..4)
            .ok_or_else(|| anyhow!("calldata too short"))?
            .try_into()?;
        match self.views.get(&selector) {
            Some(value) => Ok(ethers::abi::encode(&[Token::Uint(*value)]).into()),
            None => Err(anyhow!("execution reverted")),
        }
    }

    async fn logs(&self, _filter: Filter) -> Result<Vec<Log>> {
        Ok(self.logs.clone())
    }

    async fn watch_logs(&self, _filter: Filter, sink: UnboundedSender<Log>) -> Result<()> {
        self.watch_count.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.watch_gate {
            let _permit = gate.acquire().await?;
        }
        for log in self.watched.iter().cloned() {
            sink.send(log)?;
        }
        if !self.watch_ends {
            // Follow until the receiving side goes away, like a live filter.
            sink.closed().await;
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingDisplay {
    pub updates: Mutex<Vec<DisplayUpdate>>,
    pub loading: Mutex<Vec<bool>>,
}

impl RecordingDisplay {
    pub fn shown(&self, region: &str) -> Vec<DisplayUpdate> {
        self.updates
            .lock()
            .unwrap()
            .iter()
            .filter(|update| update.region() == region)
            .cloned()
            .collect()
    }
}

impl DisplaySink for RecordingDisplay {
    fn show(&self, update: DisplayUpdate) {
        self.updates.lock().unwrap().push(update);
    }

    fn set_loading(&self, loading: bool) {
        self.loading.lock().unwrap().push(loading);
    }
}

pub fn test_config() -> DashboardConfig {
    DashboardConfig {
        artifacts_location: format!("{}/artifacts", env!("CARGO_MANIFEST_DIR")),
        call_target: bagel_address(),
        scan_start_block: 120,
        scan_floor_block: 100,
        watch_events: false,
        ..DashboardConfig::default()
    }
}

pub struct Harness {
    pub session: SessionController,
    pub ledger: Arc<FakeLedger>,
    pub display: Arc<RecordingDisplay>,
    pub metrics: Arc<Metrics>,
}

pub async fn harness(config: DashboardConfig, ledger: FakeLedger) -> Harness {
    setup();
    let ledger = Arc::new(ledger);
    let display = Arc::new(RecordingDisplay::default());
    let metrics = Arc::new(Metrics::new().unwrap());

    let mut session = SessionController::new(config, display.clone(), metrics.clone());
    session.attach(ledger.clone());
    session.load_contracts().await.unwrap();

    Harness {
        session,
        ledger,
        display,
        metrics,
    }
}

/// Polls `check` until it holds or a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
