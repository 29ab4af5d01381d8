//! Digit Classifier - Main Entry Point

use api::config::AppConfig;
use api::{build_state, init_logging, init_metrics, run_server};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("=== Digit Classifier v{} ===", env!("CARGO_PKG_VERSION"));
    info!("Model backend: {:?}", config.model.backend);

    let metrics = init_metrics()?;
    let state = build_state(&config, Some(metrics))?;

    run_server(&config, state).await?;

    Ok(())
}
