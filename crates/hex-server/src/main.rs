//! Hex game line server.

use clap::Parser;
use hex_server::{Config, Server};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "hex-server")]
#[command(about = "Multi-client TCP line server for the Hex game")]
struct Cli {
    /// Port to listen on (default 8099). Invalid values fall back to the default.
    #[arg(allow_hyphen_values = true)]
    port: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_args(cli.port.as_deref());

    info!(
        "Starting hex-server on {} (max_workers = {})",
        config.socket_addr_string(),
        config.max_workers
    );

    let server = Server::new(config);

    let stop = server.stop_handle();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown requested");
                stop.stop();
            }
            Err(e) => warn!("Could not listen for shutdown signal: {}", e),
        }
    });

    server.start().await?;
    Ok(())
}
