//! Demonstration backend service.
//!
//! Exposes a small values API the gateway can be pointed at. `/api/values/badcode`
//! fails on purpose; the failure is answered with the same JSON error envelope
//! the gateway uses.

use std::net::SocketAddr;

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use tokio::net::TcpListener;

use api_gateway::config::{LogFormat, ObservabilityConfig};
use api_gateway::http::ErrorEnvelope;
use api_gateway::lifecycle::signals::shutdown_signal;
use api_gateway::observability::logging::init_logging;

#[derive(Parser)]
#[command(name = "demo-backend", about = "Demonstration downstream service")]
struct Args {
    #[arg(short, long, default_value = "127.0.0.1:5002")]
    bind: SocketAddr,

    #[arg(short, long, default_value = "ServiceB")]
    name: String,
}

#[derive(Clone)]
struct Service {
    name: String,
}

fn app(name: String) -> Router {
    let state = Service { name };
    Router::new()
        .route("/", get(root))
        .route("/api/values", get(values))
        .route("/api/values/status", get(status))
        .route("/api/values/healthcheck", get(healthcheck))
        .route("/api/values/badcode", get(badcode))
        .with_state(state)
}

async fn root(State(service): State<Service>) -> String {
    service.name
}

async fn values(State(service): State<Service>) -> String {
    let msg = format!("{} -> Value", service.name);
    tracing::info!("{}", msg);
    msg
}

async fn status(State(service): State<Service>, headers: HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    let msg = format!("{}, running on {}", service.name, host);
    tracing::info!("{}", msg);
    msg
}

async fn healthcheck(State(service): State<Service>) -> String {
    let msg = format!("{} is healthy", service.name);
    tracing::info!("{}", msg);
    msg
}

async fn badcode(State(service): State<Service>) -> impl IntoResponse {
    let msg = format!("{} -> Some bad code was executed!", service.name);
    tracing::error!(error = %msg, "Unhandled exception");
    ErrorEnvelope::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging(&ObservabilityConfig {
        log_format: LogFormat::Pretty,
        ..ObservabilityConfig::default()
    });

    let listener = TcpListener::bind(args.bind).await?;
    tracing::info!(address = %listener.local_addr()?, service = %args.name, "Demo backend listening");

    axum::serve(listener, app(args.name))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
