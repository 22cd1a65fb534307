//! TableHub Server: real-time collaboration messaging
//!
//! Main entry point that loads configuration, starts the realtime engine,
//! and serves HTTP and WebSocket traffic until a shutdown signal.

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt};

use tablehub_core::config::AppConfig;
use tablehub_core::error::AppError;
use tablehub_realtime::RealtimeEngine;

/// Command-line flags.
#[derive(Debug, Parser)]
#[command(name = "tablehub-server", version, about = "TableHub real-time collaboration server")]
struct Cli {
    /// Configuration environment; selects `{config_dir}/{env}.toml`.
    #[arg(long, env = "TABLEHUB_ENV", default_value = "development")]
    env: String,

    /// Directory holding `default.toml` and the environment overlays.
    #[arg(long, env = "TABLEHUB_CONFIG_DIR", default_value = "config")]
    config_dir: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config_dir, &cli.env) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    if let Err(e) = run(config, &cli.env).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging
fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    let logging = &config.logging;
    if logging.is_json() {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(logging.with_target)
            .with_thread_ids(logging.with_thread_ids)
            .init();
    } else {
        fmt()
            .pretty()
            .with_env_filter(filter)
            .with_target(logging.with_target)
            .with_thread_ids(logging.with_thread_ids)
            .init();
    }
}

/// Main server run function
async fn run(config: AppConfig, env: &str) -> Result<(), AppError> {
    tracing::info!(
        env = %env,
        "Starting TableHub v{}",
        env!("CARGO_PKG_VERSION")
    );

    tracing::info!(
        broker_enabled = config.broker.enabled,
        provider = %config.broker.provider,
        "Initializing realtime engine..."
    );
    let engine = Arc::new(RealtimeEngine::start(&config.realtime, &config.broker).await?);

    let result = tablehub_api::run_server(config, Arc::clone(&engine)).await;

    // Covers a server that failed before the shutdown signal.
    if let Err(e) = engine.shutdown().await {
        tracing::warn!(error = %e, "Realtime engine shutdown failed");
    }

    result
}
