//! Sticky-session reverse proxy.
//!
//! # Architecture Overview
//!
//! ```text
//!                     ┌──────────────────────────────────────────────────────┐
//!                     │                    STICKY PROXY                       │
//!                     │                                                       │
//!   Client Request    │  ┌─────────┐   ┌──────────┐   ┌─────────────────┐    │
//!   ──────────────────┼─▶│  http   │──▶│ registry │──▶│     session     │    │
//!                     │  │ server  │   │  (Host)  │   │ cookie / cache  │    │
//!                     │  └─────────┘   └──────────┘   └────────┬────────┘    │
//!                     │                                         ▼             │
//!                     │  ┌───────────┐                 ┌─────────────────┐    │
//!                     │  │ discovery │── live sets ───▶│  load_balancer  │    │
//!                     │  │ SRV loop  │                 │ pin or pick     │    │
//!                     │  └───────────┘                 └────────┬────────┘    │
//!                     │                                         ▼             │
//!   Client Response   │  ┌─────────────────┐           ┌─────────────────┐    │
//!   ◀─────────────────┼──│ cookie + debug  │◀──────────│ proxy forwarder │◀───┼── Backend
//!                     │  │     header      │           │ HTTP / upgrade  │    │
//!                     │  └─────────────────┘           └─────────────────┘    │
//!                     └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use sticky_proxy::config::{load_config, ProxyConfig};
use sticky_proxy::lifecycle::{forward_signals, Shutdown};
use sticky_proxy::observability::{logging, metrics};
use sticky_proxy::session::cipher::generate_key;
use sticky_proxy::HttpServer;

#[derive(Parser)]
#[command(name = "sticky-proxy", version)]
#[command(about = "Sticky-session reverse proxy for WebSocket backends", long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, env = "STICKY_PROXY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "sticky-proxy starting");

    if config.session.keys.is_empty() {
        tracing::warn!(
            "No session keys configured; generated an ephemeral key. \
             Cookies will not survive a restart or be readable by other replicas"
        );
        config.session.keys.push(generate_key());
    }

    tracing::info!(
        config = ?args.config,
        bind_address = %config.listener.bind_address,
        clusters = config.clusters.len(),
        session_mode = ?config.session.mode,
        discovery_interval_secs = config.discovery.interval_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(config)?;
    let shutdown = Shutdown::new();
    let signals = shutdown.clone();
    tokio::spawn(async move { forward_signals(&signals).await });

    server.run(listener, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
