//! Capturing reverse proxy binary.
//!
//! Loads configuration (file, then CLI/env overrides), initializes logging
//! and hands over to the lifecycle startup sequence.

use clap::Parser;
use std::path::PathBuf;

use capture_proxy::config::{load_config, ConfigOverrides};
use capture_proxy::lifecycle;
use capture_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "capture-proxy")]
#[command(about = "Reverse proxy that records every exchange with its upstream", long_about = None)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Listening port.
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Upstream base URL.
    #[arg(short, long, env = "UPSTREAM_URL")]
    upstream: Option<String>,

    /// Path of the JSON-lines transaction file.
    #[arg(long, env = "STORE_PATH")]
    store_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        port: cli.port,
        upstream_url: cli.upstream,
        store_path: cli.store_path,
    };

    let config = load_config(cli.config.as_deref(), &overrides)?;
    logging::init_logging(&config.observability);

    tracing::info!("capture-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    if overrides.port.is_none() {
        tracing::info!(port = config.listener.port, "PORT not set, defaulting");
    }

    lifecycle::run(config).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
