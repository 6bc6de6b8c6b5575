//! API gateway.
//!
//! A reverse-proxy gateway built with Tokio and Axum.
//!
//! # Architecture Overview
//!
//! ```text
//!                              ┌──────────────────────────────────────────────────────────┐
//!                              │                        GATEWAY                           │
//!                              │                                                          │
//!     Client Request           │  ┌──────────┐    ┌────────────┐    ┌──────────────┐      │
//!     ─────────────────────────┼─▶│  http    │───▶│ dispatcher │───▶│ route table  │      │
//!                              │  │  server  │    │            │    └──────────────┘      │
//!                              │  └──────────┘    └─────┬──────┘                          │
//!                              │        ▲               │ cacheable?                      │
//!                              │        │               ▼                                 │
//!                              │        │        ┌──────────────┐                         │
//!                              │        │        │response cache│ (hit → return)          │
//!                              │        │        └──────┬───────┘                         │
//!                              │        │               ▼                                 │
//!                              │        │        ┌──────────────┐    ┌──────────────┐     │
//!     Client Response          │  ┌─────┴────┐   │  resilience  │───▶│ hyper client │─────┼──── Downstream
//!     ◀────────────────────────┼──│  error   │◀──│ breaker/retry│    └──────────────┘     │     Service
//!                              │  │ envelope │   └──────────────┘                         │
//!                              │  └──────────┘                                            │
//!                              │                                                          │
//!                              │  Cross-cutting: config, observability, lifecycle, admin  │
//!                              └──────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{load_config, GatewayConfig};
use api_gateway::lifecycle::{signals, Shutdown};
use api_gateway::observability::{logging, metrics};
use api_gateway::routing::RouteTable;
use api_gateway::HttpServer;

#[derive(Parser)]
#[command(name = "api-gateway", version, about = "Reverse-proxy API gateway")]
struct Args {
    /// Path to the TOML configuration file. Defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), service = %config.service.name, "api-gateway starting");

    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        request_timeout_ms = config.timeouts.request_ms,
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    // Fail fast: an invalid route table must keep the process from starting
    let routes = RouteTable::from_config(&config)?;

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::init_metrics(addr, &config.service.name)?;
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = HttpServer::new(config, routes);
    server.run(listener, &shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
