//! # Tidal Client
//!
//! Keeps a local view of the signed-in account's records in sync with a
//! Tidal server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with a config file from the default search paths
//! tidal
//!
//! # Run with custom config
//! tidal --config /path/to/tidal.toml
//!
//! # Run with environment variables
//! TIDAL_URL=ws://127.0.0.1:8080/ws TIDAL_EMAIL=u@x.com TIDAL_PASSWORD=secret tidal
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "tidal", version)]
#[command(about = "Keep a local view of your records in sync with a Tidal server")]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tidal=info,tidal_core=info,tidal_transport=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load(args.config.as_deref())?;

    tracing::info!("Starting Tidal client for {}", config.url);

    // Initialize metrics
    metrics::init_metrics();

    handlers::run_client(config).await?;

    Ok(())
}
