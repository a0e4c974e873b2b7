use anyhow::Result;
use ethers::{
    abi::{Abi, RawLog},
    types::{Address, BlockNumber, Filter, Log, H256},
};
use log::info;
use tokio::sync::mpsc;

use crate::monitoring::Metrics;
use crate::provider::Ledger;

pub const TRANSFER_HISTORY_LEN: usize = 5;

/// Every event of `contract` from `from_block` onwards.
pub fn contract_events_filter(contract: Address, from_block: u64) -> Filter {
    Filter::new()
        .address(contract)
        .from_block(BlockNumber::Number(from_block.into()))
        .to_block(BlockNumber::Latest)
}

/// Transaction hashes of `logs` walked from the last log to the first,
/// keeping the final `TRANSFER_HISTORY_LEN` entries of that walk.
pub fn recent_transfer_hashes(logs: &[Log]) -> Vec<H256> {
    let mut hashes: Vec<H256> = logs.iter().rev().filter_map(|log| log.transaction_hash).collect();
    if hashes.len() > TRANSFER_HISTORY_LEN {
        hashes.drain(..hashes.len() - TRANSFER_HISTORY_LEN);
    }
    hashes
}

pub async fn fetch_recent_transfers(ledger: &dyn Ledger, filter: Filter) -> Result<Vec<H256>> {
    let logs = ledger.logs(filter).await?;
    info!("Fetched {} contract events", logs.len());
    Ok(recent_transfer_hashes(&logs))
}

/// Human readable form of `log`, decoded against `abi` when one of its events matches.
pub fn describe_log(abi: &Abi, log: &Log) -> String {
    let decoded = log.topics.first().and_then(|topic| {
        abi.events()
            .find(|event| !event.anonymous && event.signature() == *topic)
            .and_then(|event| {
                let raw = RawLog {
                    topics: log.topics.clone(),
                    data: log.data.to_vec(),
                };
                event.parse_log(raw).ok().map(|parsed| (event.name.clone(), parsed))
            })
    });

    match decoded {
        Some((name, parsed)) => {
            let params: Vec<String> = parsed
                .params
                .iter()
                .map(|param| format!("{}={}", param.name, param.value))
                .collect();
            format!("{}({}) tx={:?}", name, params.join(", "), log.transaction_hash)
        }
        None => format!(
            "event topic={:?} tx={:?}",
            log.topics.first(),
            log.transaction_hash
        ),
    }
}

/// Follows new contract events and logs them. Watched events never touch session state.
pub async fn watch_events(
    ledger: &dyn Ledger,
    abi: &Abi,
    filter: Filter,
    metrics: &Metrics,
) -> Result<()> {
    let (sink, mut events) = mpsc::unbounded_channel();

    let forward = async {
        while let Some(log) = events.recv().await {
            metrics.events_watched.inc();
            info!("event triggered: {}", describe_log(abi, &log));
        }
    };

    // The sink is moved into the watch, so `forward` ends when the watch does.
    let (watched, ()) = tokio::join!(ledger.watch_logs(filter, sink), forward);
    watched
}
