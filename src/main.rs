use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use ripd::runtime::config::load_config;
use ripd::runtime::daemon::{RipDaemon, Timing};
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "ripd")]
#[command(about = "Simplified RIP v2 routing daemon over loopback UDP")]
struct Args {
    /// Path to the router configuration file.
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let cfg = load_config(&args.config)
        .map_err(|err| anyhow::anyhow!("bad configuration: {err}"))?;
    let daemon = RipDaemon::open(cfg, Timing::default()).await?;

    tokio::select! {
        result = daemon.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("ripd shutting down");
            Ok(())
        }
    }
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_target(true)
        .compact()
        .init();
}
