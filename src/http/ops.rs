//! Operational endpoints served by the gateway itself.
//!
//! `/` answers with the service name, `/info` and `/status` with the name and
//! the host the request was addressed to, `/healthcheck` with a liveness line.
//! Other methods on these paths go to `fallback`, so they are proxied like any
//! other request instead of being rejected with a bare 405.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, HeaderMap};
use axum::routing::get;
use axum::Router;

/// Shared state of the operational handlers.
#[derive(Debug, Clone)]
struct OpsState {
    service: Arc<str>,
}

/// Router with the operational endpoints, to be merged into the main router.
pub fn router(service_name: &str, fallback: Router) -> Router {
    Router::new()
        .route("/", get(root).fallback_service(fallback.clone()))
        .route("/info", get(info).fallback_service(fallback.clone()))
        .route("/status", get(info).fallback_service(fallback.clone()))
        .route("/healthcheck", get(healthcheck).fallback_service(fallback))
        .with_state(OpsState {
            service: Arc::from(service_name),
        })
}

async fn root(State(state): State<OpsState>) -> String {
    state.service.to_string()
}

async fn info(State(state): State<OpsState>, headers: HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");
    format!("{}, running on {}", state.service, host)
}

async fn healthcheck(State(state): State<OpsState>) -> String {
    format!("{} is healthy", state.service)
}
