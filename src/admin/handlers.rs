use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::cache::CacheStats;
use crate::resilience::circuit_breaker::BreakerSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub service: String,
    pub status: &'static str,
    pub routes: usize,
    pub uptime_secs: u64,
}

#[derive(Serialize)]
pub struct RouteSummary {
    pub name: String,
    pub methods: Vec<String>,
    pub path: String,
    pub downstream: String,
    pub timeout_ms: u128,
    pub cache_ttl_secs: u64,
    pub retry_count: u32,
    pub breaker_threshold: u32,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        service: state.service.to_string(),
        status: "operational",
        routes: state.dispatcher.routes().len(),
        uptime_secs: state.started.elapsed().as_secs(),
    })
}

pub async fn get_routes(State(state): State<AdminState>) -> Json<Vec<RouteSummary>> {
    let routes = state
        .dispatcher
        .routes()
        .routes()
        .iter()
        .map(|route| RouteSummary {
            name: route.name.clone(),
            methods: route.methods.iter().map(|m| m.to_string()).collect(),
            path: route.pattern.as_str().to_string(),
            downstream: format!("{}{}", route.target.key(), route.target.path.as_str()),
            timeout_ms: route.timeout.as_millis(),
            cache_ttl_secs: route.cache_ttl.as_secs(),
            retry_count: route.retry.count,
            breaker_threshold: route.breaker.failure_threshold,
        })
        .collect();
    Json(routes)
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<BreakerSnapshot>> {
    let mut snapshots = state.dispatcher.breakers().snapshots();
    snapshots.sort_by(|a, b| a.target.cmp(&b.target));
    Json(snapshots)
}

pub async fn get_cache(State(state): State<AdminState>) -> Json<CacheStats> {
    Json(state.dispatcher.cache().stats())
}
