//! Telemetry hub gateway daemon.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use gateway_service::config::GatewayConfig;
use gateway_service::{logging, supervisor};

#[derive(Debug, Parser)]
#[command(name = "telemetry-hub", about = "Radio telemetry gateway")]
struct Args {
    /// Path to the JSON config file; defaults apply without one.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    logging::init(&config).context("failed to initialize logging")?;
    info!("telemetry hub starting");
    supervisor::run(config).await
}
