//! sql-advisor - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes the analysis API.

use sql_advisor::{api, config::Config};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sql_advisor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, optimizer_model={}, max_concurrent={}",
        config.default_model, config.optimizer_model, config.analyzer.max_concurrent
    );

    api::serve(config).await?;

    Ok(())
}
