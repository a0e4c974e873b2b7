use anyhow::Result;
use log::error;
use std::sync::Arc;

use bagel_watch::{
    config::DashboardConfig,
    display::ConsoleDisplay,
    monitoring::{serve_metrics, Metrics},
    session::run_until,
    utils::setup_logger,
    SessionController,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize environment and logging
    dotenv::dotenv().ok();
    let config = DashboardConfig::from_env()?;
    setup_logger(&config.log_level)?;
    config.validate_all()?;

    let metrics = Arc::new(Metrics::new()?);
    if let Some(port) = config.metrics_port {
        tokio::spawn(serve_metrics(metrics.clone(), port));
    }

    let poll_interval = config.poll_interval;
    let mut session = SessionController::new(config, Arc::new(ConsoleDisplay::new()), metrics);
    session.initialize().await;

    // Created once so a signal between ticks is not missed.
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
        }
    };
    run_until(&session, poll_interval, shutdown).await;

    Ok(())
}
