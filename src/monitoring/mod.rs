use anyhow::Result;
use log::{error, info};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use warp::Filter;

/// Render-cycle metrics, kept on their own registry so several sessions can coexist.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,

    // Render cycles
    pub renders_started: IntCounter,
    pub renders_skipped: IntCounter,
    pub render_duration: Histogram,

    // Chains
    pub chain_failures: IntCounterVec,
    pub blocks_scanned: IntCounter,
    pub calls_collected: IntGauge,

    // Live watcher
    pub events_watched: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let renders_started =
            IntCounter::new("bagel_watch_renders_total", "Render cycles started")?;
        let renders_skipped = IntCounter::new(
            "bagel_watch_renders_skipped_total",
            "Render calls rejected because a cycle was in flight",
        )?;
        let render_duration = Histogram::with_opts(HistogramOpts::new(
            "bagel_watch_render_seconds",
            "Time until the loading flag cleared",
        ))?;
        let chain_failures = IntCounterVec::new(
            Opts::new("bagel_watch_chain_failures_total", "Failed render chains"),
            &["chain"],
        )?;
        let blocks_scanned =
            IntCounter::new("bagel_watch_blocks_scanned_total", "Blocks fetched by the call scan")?;
        let calls_collected =
            IntGauge::new("bagel_watch_calls_collected", "Calls found by the last scan")?;

        let events_watched = IntCounter::new(
            "bagel_watch_events_watched_total",
            "Contract events delivered by the live watcher",
        )?;

        registry.register(Box::new(renders_started.clone()))?;
        registry.register(Box::new(renders_skipped.clone()))?;
        registry.register(Box::new(render_duration.clone()))?;
        registry.register(Box::new(chain_failures.clone()))?;
        registry.register(Box::new(blocks_scanned.clone()))?;
        registry.register(Box::new(calls_collected.clone()))?;
        registry.register(Box::new(events_watched.clone()))?;

        Ok(Self {
            registry,
            renders_started,
            renders_skipped,
            render_duration,
            chain_failures,
            blocks_scanned,
            calls_collected,
            events_watched,
        })
    }

    pub fn record_chain_failure(&self, chain: &str) {
        self.chain_failures.with_label_values(&[chain]).inc();
    }

    pub fn chain_failure_count(&self, chain: &str) -> u64 {
        self.chain_failures.with_label_values(&[chain]).get()
    }

    /// Prometheus text exposition of every metric above.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

pub async fn serve_metrics(metrics: Arc<Metrics>, port: u16) {
    let route = warp::path!("metrics").map(move || match metrics.encode() {
        Ok(body) => body,
        Err(e) => {
            error!("failed to encode metrics: {}", e);
            String::new()
        }
    });

    info!("Serving metrics on 127.0.0.1:{}/metrics", port);
    warp::serve(route).run(([127, 0, 0, 1], port)).await;
}
