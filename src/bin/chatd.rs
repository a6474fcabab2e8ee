//! chatd - Multi-client line-oriented TCP chat server
//!
//! Clients connect with any line-based tool, pick a nickname, and every line
//! they send is relayed to everyone connected.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (9999)
//! chatd
//!
//! # Listen on a different port or address
//! chatd --port 4000 --bind 127.0.0.1
//!
//! # Load settings from a TOML file
//! chatd --config ./chatd.toml
//! CHATD_CONFIG=./chatd.toml chatd
//!
//! # Enable debug logging
//! RUST_LOG=chatd=debug chatd
//! ```
//!
//! Settings are layered: built-in defaults, then the config file (from
//! `--config`, `CHATD_CONFIG`, or the default path if it exists), then
//! `CHATD_PORT`, then `--port` / `--bind`.
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown, every client is disconnected

use std::env;
use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chatd::config::{default_config_path, Config};
use chatd::registry::spawn_registry;
use chatd::server::Server;

/// chatd - line-oriented TCP chat server
#[derive(Parser, Debug)]
#[command(name = "chatd", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<IpAddr>,
}

/// Resolves the effective configuration from file, environment and flags.
fn load_config(args: &Args) -> Result<Config> {
    let explicit = args
        .config
        .clone()
        .or_else(|| env::var_os("CHATD_CONFIG").map(PathBuf::from));

    let mut config = match explicit {
        Some(path) => Config::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => Config::load(&path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => Config::default(),
        },
    };

    if let Ok(port) = env::var("CHATD_PORT") {
        config.port = port
            .parse()
            .with_context(|| format!("CHATD_PORT is not a valid port: {port}"))?;
    }

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind = bind;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chatd=info".parse()?))
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr(),
        max_sessions = config.max_sessions,
        quit_policy = ?config.quit_policy,
        "chatd starting"
    );

    let shutdown = CancellationToken::new();
    let registry = spawn_registry(config.max_sessions);

    let server = Server::bind(&config, registry, shutdown.clone())
        .await
        .context("Failed to start server")?;

    let handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        handle.shutdown();
    });

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("chatd stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
