//! Fusion server.
//!
//! Receives feature frames over UDP, localizes the drone at a fixed rate
//! and serves estimates over HTTP and WebSocket.
//!
//! Usage:
//!   cargo run -p droneloc-server --bin fusion-server -- --config configs/server.json

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use droneloc_core::ServerConfig;
use droneloc_server::{create_router, FusionService};

/// Acoustic drone localization fusion server.
#[derive(Parser, Debug)]
#[command(name = "fusion-server", version, about = "Fuses node feature frames into drone position estimates")]
struct Cli {
    /// Path to the server configuration (JSON). Defaults are used if absent.
    #[arg(long, default_value = "configs/server.json")]
    config: PathBuf,

    /// Override the UDP port for feature frames.
    #[arg(long)]
    udp_port: Option<u16>,

    /// Override the HTTP/WebSocket port.
    #[arg(long)]
    http_port: Option<u16>,

    /// Enable debug logging.
    #[arg(long, short)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    let mut config = if cli.config.exists() {
        ServerConfig::from_json(&cli.config)
            .with_context(|| format!("loading {}", cli.config.display()))?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        ServerConfig::default()
    };
    if let Some(port) = cli.udp_port {
        config.listen_port = port;
    }
    if let Some(port) = cli.http_port {
        config.http_port = port;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = load_config(&cli)?;
    let http_addr: SocketAddr = format!("{}:{}", config.listen_host, config.http_port)
        .parse()
        .context("invalid HTTP listen address")?;
    info!(
        nodes = config.nodes.len(),
        rate_hz = config.localization_rate_hz,
        step = config.solver.step,
        "starting fusion server"
    );

    let service = FusionService::new(config)?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = service.spawn(&shutdown_rx).await?;

    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding HTTP {http_addr}"))?;
    info!("HTTP server listening on {http_addr}");

    axum::serve(listener, create_router(service.clone()))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {e}");
            }
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;

    shutdown_tx.send(true).ok();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("task ended abnormally: {e}");
        }
    }

    let (cycles, fixes) = service.cycle_counts();
    info!(cycles, fixes, "Server shut down cleanly");
    Ok(())
}
