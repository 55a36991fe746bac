//! Peerplay CLI - launches the remote-control server
//!
//! `peerplay [PORT]` serves the HTTP API. The port comes from `PORT` in the
//! environment, then the positional argument, then 8080.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use peerplay_core::tracing_setup::{CliLogLevel, init_tracing};
use peerplay_core::{PeerplayConfig, RuntimeMode};

#[derive(Parser)]
#[command(name = "peerplay")]
#[command(about = "Stream torrents to a local media player, controlled over HTTP")]
struct Cli {
    /// Port to listen on when PORT is not set
    port: Option<String>,

    /// Console log level (RUST_LOG overrides)
    #[arg(long, value_enum, default_value = "info")]
    log_level: CliLogLevel,

    /// Runtime mode: production or development (simulated collaborators)
    #[arg(long)]
    mode: Option<RuntimeMode>,

    /// Directory holding index.html and static assets
    #[arg(long)]
    assets_dir: Option<PathBuf>,

    /// Directory for the per-run log file
    #[arg(long)]
    logs_dir: Option<PathBuf>,
}

impl Cli {
    fn into_config(self) -> PeerplayConfig {
        let mut config = PeerplayConfig::from_env().with_port_argument(self.port.as_deref());
        if let Some(mode) = self.mode {
            config.runtime_mode = mode;
        }
        if let Some(dir) = self.assets_dir {
            config.server.assets_dir = dir;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_file = init_tracing(cli.log_level.as_tracing_level(), cli.logs_dir.as_deref())
        .context("failed to initialize logging")?;
    tracing::debug!("Writing run log to {}", log_file.display());

    let config = cli.into_config();
    tracing::info!(
        "Starting Peerplay on {}:{} in {} mode",
        config.server.host,
        config.server.port,
        config.runtime_mode
    );

    peerplay_web::run_server(config)
        .await
        .context("server terminated with an error")?;

    tracing::info!("Peerplay stopped");
    Ok(())
}
