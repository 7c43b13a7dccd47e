//! atp-tunnel daemon
//!
//! Opens a reverse SSH tunnel using identities from the local agent and
//! forwards every connection the SSH server accepts to the database,
//! prefixed with the wallet.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use atp_core::config::{self, TargetConfig, TunnelConfig};

#[derive(Parser)]
#[command(name = "atp-tunnel")]
#[command(about = "Reverse SSH tunnel that forwards connections to a database")]
#[command(version)]
struct Args {
    /// Path to configuration file (defaults to ./tunnel.toml)
    #[arg(short, long, env = "ATP_TUNNEL_CONFIG")]
    config: Option<PathBuf>,

    /// Override the remote listen port
    #[arg(long)]
    bind_port: Option<u16>,

    /// Override the forwarding target (host:port)
    #[arg(long)]
    target: Option<String>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground {
        "debug"
    } else {
        &args.log_level
    };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("atp-tunnel starting...");

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let mut config: TunnelConfig = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Apply command-line overrides
    if let Some(port) = args.bind_port {
        config.bind.port = port;
    }
    if let Some(target) = args.target {
        let timeout = config.target.connect_timeout;
        config.target = TargetConfig::parse(&target)?;
        config.target.connect_timeout = timeout;
    }

    tracing::info!(
        "Tunnel via {}@{} to {}",
        config.ssh.username,
        config.ssh.address(),
        config.target.address()
    );

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
            Err(e) => tracing::warn!("Failed to install Ctrl-C handler: {}", e),
        }
    });

    if let Err(e) = atp_tunnel::run(config, cancel).await {
        tracing::error!("{}", e);
        return Err(e.into());
    }

    tracing::info!("atp-tunnel stopped");
    Ok(())
}
