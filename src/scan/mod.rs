//! Historical scan for the latest calls made to one contract address.
//!
//! Blocks are visited from `start_block` down to `floor_block`, and each
//! block's transactions from the highest index down. In
//! [`ScanMode::Concurrent`] up to `concurrency` fetches (blocks and
//! transactions together) overlap and the stop condition is checked as each
//! one resolves, so the result is bounded by `limit` but its order is
//! whatever order the node answered in.

use anyhow::Result;
use ethers::types::{Address, Bytes, H256};
use futures::{
    future::BoxFuture,
    stream::{FuturesUnordered, StreamExt},
    FutureExt,
};
use log::{debug, info};
use std::collections::VecDeque;

use crate::config::{DashboardConfig, ScanMode};
use crate::provider::Ledger;
use crate::utils::input_to_ascii;

#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub target: Address,
    pub start_block: u64,
    pub floor_block: u64,
    pub limit: usize,
    pub mode: ScanMode,
    pub concurrency: usize,
}

impl ScanPlan {
    pub fn from_config(config: &DashboardConfig) -> Self {
        Self {
            target: config.call_target,
            start_block: config.scan_start_block,
            floor_block: config.scan_floor_block,
            limit: config.scan_limit,
            mode: config.scan_mode,
            concurrency: config.scan_concurrency,
        }
    }

    fn heights(&self) -> impl Iterator<Item = u64> {
        (self.floor_block..=self.start_block).rev()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub block: u64,
    pub hash: H256,
    pub input: Bytes,
}

impl CallRecord {
    pub fn ascii(&self) -> String {
        input_to_ascii(&self.input)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub calls: Vec<CallRecord>,
    pub blocks_visited: u64,
}

pub async fn scan_recent_calls(ledger: &dyn Ledger, plan: &ScanPlan) -> Result<ScanReport> {
    if plan.limit == 0 {
        return Ok(ScanReport::default());
    }

    let report = match plan.mode {
        ScanMode::Sequential => scan_sequential(ledger, plan).await?,
        ScanMode::Concurrent => scan_concurrent(ledger, plan).await?,
    };

    info!(
        "Collected {} calls to {:?} after visiting {} blocks",
        report.calls.len(),
        plan.target,
        report.blocks_visited
    );
    Ok(report)
}

async fn scan_sequential(ledger: &dyn Ledger, plan: &ScanPlan) -> Result<ScanReport> {
    let mut report = ScanReport::default();

    for height in plan.heights() {
        report.blocks_visited += 1;
        let hashes = match ledger.block_transactions(height).await? {
            Some(hashes) => hashes,
            None => {
                debug!("block {} not available, skipping", height);
                continue;
            }
        };

        for hash in hashes.into_iter().rev() {
            if let Some(record) = fetch_call(ledger, plan.target, height, hash).await? {
                report.calls.push(record);
                if report.calls.len() >= plan.limit {
                    return Ok(report);
                }
            }
        }
    }

    Ok(report)
}

enum Fetched {
    Block(u64, Option<Vec<H256>>),
    Call(Option<CallRecord>),
}

fn block_fetch(ledger: &dyn Ledger, height: u64) -> BoxFuture<'_, Result<Fetched>> {
    async move {
        let hashes = ledger.block_transactions(height).await?;
        Ok(Fetched::Block(height, hashes))
    }
    .boxed()
}

fn call_fetch(
    ledger: &dyn Ledger,
    target: Address,
    height: u64,
    hash: H256,
) -> BoxFuture<'_, Result<Fetched>> {
    async move {
        let record = fetch_call(ledger, target, height, hash).await?;
        Ok(Fetched::Call(record))
    }
    .boxed()
}

async fn scan_concurrent(ledger: &dyn Ledger, plan: &ScanPlan) -> Result<ScanReport> {
    let mut report = ScanReport::default();
    let concurrency = plan.concurrency.max(1);
    let mut heights = plan.heights();
    // Transactions of resolved blocks waiting for a free slot, highest index first.
    let mut queued: VecDeque<(u64, H256)> = VecDeque::new();
    let mut pending = FuturesUnordered::new();

    loop {
        // Block and transaction fetches share one budget. Queued transactions
        // go first so older blocks do not crowd out the ones already seen.
        while pending.len() < concurrency {
            if let Some((height, hash)) = queued.pop_front() {
                pending.push(call_fetch(ledger, plan.target, height, hash));
            } else if let Some(height) = heights.next() {
                pending.push(block_fetch(ledger, height));
            } else {
                break;
            }
        }

        let fetched = match pending.next().await {
            Some(fetched) => fetched?,
            None => break,
        };

        match fetched {
            Fetched::Block(height, Some(hashes)) => {
                report.blocks_visited += 1;
                queued.extend(hashes.into_iter().rev().map(|hash| (height, hash)));
            }
            Fetched::Block(height, None) => {
                report.blocks_visited += 1;
                debug!("block {} not available, skipping", height);
            }
            Fetched::Call(Some(record)) => {
                report.calls.push(record);
                if report.calls.len() >= plan.limit {
                    // Outstanding fetches are dropped with `pending`.
                    break;
                }
            }
            Fetched::Call(None) => {}
        }
    }

    Ok(report)
}

async fn fetch_call(
    ledger: &dyn Ledger,
    target: Address,
    height: u64,
    hash: H256,
) -> Result<Option<CallRecord>> {
    let tx = match ledger.transaction(hash).await? {
        Some(tx) => tx,
        None => return Ok(None),
    };

    if tx.to != Some(target) {
        return Ok(None);
    }

    Ok(Some(CallRecord {
        block: height,
        hash,
        input: tx.input,
    }))
}
