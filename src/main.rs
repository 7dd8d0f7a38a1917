//! Security gateway.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌──────────────────────────────────────────────────────┐
//!                       │                   SECURITY GATEWAY                    │
//!                       │                                                       │
//!   Client Request      │  ┌──────────┐   ┌──────────────────────────────────┐ │
//!   ────────────────────┼─▶│  http    │──▶│          pipeline                │ │
//!                       │  │ server + │   │  rules → traffic → behavior      │ │
//!                       │  │middleware│   └───────────────┬──────────────────┘ │
//!                       │  └────┬─────┘                   │ events             │
//!                       │       │ allowed                 ▼                    │
//!                       │       ▼                  ┌──────────────┐            │
//!   Client Response     │  ┌──────────┐            │ correlation  │──▶ export  │──▶ SIEM
//!   ◀───────────────────┼──│ forward  │◀──────────▶│ + batching   │    sink    │
//!                       │  │ handler  │  upstream  └──────────────┘            │
//!                       │  └──────────┘                                        │
//!                       │  ┌─────────────────────────────────────────────────┐ │
//!                       │  │ config (TOML + watcher) · observability · admin │ │
//!                       │  │ lifecycle (signals, shutdown) · resilience      │ │
//!                       │  └─────────────────────────────────────────────────┘ │
//!                       └──────────────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use security_gateway::config::{load_config, watcher::ConfigWatcher, GatewayConfig};
use security_gateway::http::HttpServer;
use security_gateway::lifecycle::{signals, Shutdown};
use security_gateway::observability;

#[derive(Parser)]
#[command(name = "security-gateway")]
#[command(about = "Request security gateway: firewall rules, rate analysis, behavioral detection", long_about = None)]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when absent.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => security_gateway::config::loader::finalize(GatewayConfig::default())?,
    };

    observability::init_logging(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "security-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = %config.upstream.address,
        learning_secs = config.behavior.learning_secs,
        correlation_rules = config.correlation.rules.len(),
        export_enabled = config.export.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => observability::metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the lifetime of the server.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            match watcher.run() {
                Ok(handle) => (Some(handle), updates),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    (None, updates)
                }
            }
        }
        None => (None, mpsc::unbounded_channel().1),
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let server = HttpServer::new(config)?;
    server.run(listener, config_updates, shutdown.subscribe()).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
