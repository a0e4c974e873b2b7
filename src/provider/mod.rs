use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::{
    providers::{Http, JsonRpcClient, Middleware, Provider, Ws},
    types::{
        transaction::eip2718::TypedTransaction, Address, BlockId, BlockNumber, Bytes, Filter, Log,
        Transaction, TransactionRequest, H256,
    },
};
use futures::StreamExt;
use log::{debug, info};
use std::{sync::Arc, time::Duration};
use tokio::sync::mpsc::UnboundedSender;

const WATCH_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Everything the dashboard asks of a node.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ledger: Send + Sync {
    /// `net_version`, the key Truffle artifacts use for deployments.
    async fn network_id(&self) -> Result<String>;

    async fn active_account(&self) -> Result<Option<Address>>;

    /// Transaction hashes of the block at `height`, or `None` when the node has no such block.
    async fn block_transactions(&self, height: u64) -> Result<Option<Vec<H256>>>;

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>>;

    /// Read-only `eth_call` against the latest block.
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes>;

    async fn logs(&self, filter: Filter) -> Result<Vec<Log>>;

    /// Forwards logs matching `filter` into `sink` until the node or the receiver goes away.
    async fn watch_logs(&self, filter: Filter, sink: UnboundedSender<Log>) -> Result<()>;
}

pub struct EthersLedger<P: JsonRpcClient> {
    provider: Provider<P>,
}

impl<P: JsonRpcClient> EthersLedger<P> {
    pub fn new(provider: Provider<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> Ledger for EthersLedger<P>
where
    P: JsonRpcClient + 'static,
{
    async fn network_id(&self) -> Result<String> {
        Ok(self.provider.get_net_version().await?)
    }

    async fn active_account(&self) -> Result<Option<Address>> {
        let accounts = self.provider.get_accounts().await?;
        Ok(accounts.into_iter().next())
    }

    async fn block_transactions(&self, height: u64) -> Result<Option<Vec<H256>>> {
        let block = self
            .provider
            .get_block(BlockId::Number(BlockNumber::Number(height.into())))
            .await
            .with_context(|| format!("eth_getBlockByNumber({})", height))?;
        Ok(block.map(|b| b.transactions))
    }

    async fn transaction(&self, hash: H256) -> Result<Option<Transaction>> {
        Ok(self
            .provider
            .get_transaction(hash)
            .await
            .with_context(|| format!("eth_getTransactionByHash({:?})", hash))?)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes> {
        let tx: TypedTransaction = TransactionRequest::new().to(to).data(data).into();
        Ok(self
            .provider
            .call(&tx, None)
            .await
            .with_context(|| format!("eth_call to {:?}", to))?)
    }

    async fn logs(&self, filter: Filter) -> Result<Vec<Log>> {
        Ok(self.provider.get_logs(&filter).await.context("eth_getLogs")?)
    }

    async fn watch_logs(&self, filter: Filter, sink: UnboundedSender<Log>) -> Result<()> {
        let watcher = self
            .provider
            .watch(&filter)
            .await
            .context("eth_newFilter")?
            .interval(WATCH_POLL_INTERVAL);
        tokio::pin!(watcher);

        while let Some(log) = watcher.next().await {
            if sink.send(log).is_err() {
                debug!("log watcher receiver dropped");
                break;
            }
        }
        Ok(())
    }
}

/// Opens a provider for `url`, over WebSocket for `ws(s)://` and HTTP otherwise.
pub async fn connect(url: &str) -> Result<Arc<dyn Ledger>> {
    if url.starts_with("ws://") || url.starts_with("wss://") {
        let provider = Provider::<Ws>::connect(url)
            .await
            .with_context(|| format!("failed to connect to {}", url))?;
        info!("Connected to {} over websocket", url);
        Ok(Arc::new(EthersLedger::new(provider)))
    } else {
        let provider = Provider::<Http>::try_from(url)
            .with_context(|| format!("invalid provider url {}", url))?;
        info!("Using HTTP provider {}", url);
        Ok(Arc::new(EthersLedger::new(provider)))
    }
}
