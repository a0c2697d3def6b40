/*!
 * pairlink Daemon
 * Hosts the bluetooth method channel on a Unix socket
 */

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::Path;
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pairlink_daemon::adapter;
use pairlink_daemon::ipc::IpcServer;
use pairlink_daemon::{BrokerSettings, DaemonConfig, MethodChannel, PairingBroker};

#[derive(Parser)]
#[command(name = "pairlinkd")]
#[command(about = "Bluetooth pairing broker daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file path
    #[arg(short, long, default_value = "/etc/pairlink/pairlinkd.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run,
    /// Check whether the daemon socket is reachable
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging; RUST_LOG overrides the flag
    let log_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("pairlink_daemon={}", log_level))),
        )
        .init();

    // Load configuration
    let config = DaemonConfig::load(&cli.config)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(config).await,
        Commands::Status => check_status(&config).await,
    }
}

async fn run_daemon(config: DaemonConfig) -> Result<()> {
    info!("pairlink daemon starting with {:?} backend...", config.bluetooth.backend);

    let adapter = adapter::from_config(&config.bluetooth)
        .await
        .context("failed to initialise bluetooth adapter")?;
    let broker = PairingBroker::new(
        adapter,
        BrokerSettings {
            request_timeout: config.bluetooth.request_timeout(),
        },
    );
    let channel = MethodChannel::new(config.channel.name.clone(), Arc::new(broker));

    let listener = bind_socket(&config.socket_path)?;
    let ipc_server = IpcServer::new(listener, Arc::new(channel));

    info!("pairlink daemon ready on socket: {}", config.socket_path);

    let result = tokio::select! {
        result = ipc_server.run() => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    if let Err(e) = std::fs::remove_file(&config.socket_path) {
        warn!("Could not remove socket {}: {}", config.socket_path, e);
    }
    result
}

fn bind_socket(socket_path: &str) -> Result<UnixListener> {
    let path = Path::new(socket_path);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    // Left behind by a previous run that did not shut down cleanly
    if path.exists() {
        warn!("Removing stale socket {}", socket_path);
        std::fs::remove_file(path)?;
    }

    UnixListener::bind(path).with_context(|| format!("failed to bind {}", socket_path))
}

async fn check_status(config: &DaemonConfig) -> Result<()> {
    match UnixStream::connect(&config.socket_path).await {
        Ok(_) => println!("pairlink daemon is running on {}", config.socket_path),
        Err(e) => println!("pairlink daemon is not reachable on {}: {}", config.socket_path, e),
    }
    Ok(())
}
