//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, route
//! - `gateway_request_duration_seconds` (histogram): latency distribution by route
//! - `gateway_cache_lookups_total` (counter): cache lookups by result (hit, miss, shared)
//! - `gateway_cache_entries` (gauge): live cache entries
//! - `gateway_retries_total` (counter): downstream retries by route
//! - `gateway_breaker_state` (gauge): 0=closed, 1=open, 2=half-open, by target
//! - `gateway_breaker_rejections_total` (counter): calls failed fast by an open breaker
//!
//! # Design Decisions
//! - Recording is a no-op until `init_metrics` installs the Prometheus recorder,
//!   so library code and tests record unconditionally

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::resilience::CircuitState;

/// Install the Prometheus recorder and its scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr, service: &str) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .add_global_label("service", service)
        .install()?;

    describe_counter!("gateway_requests_total", Unit::Count, "Requests handled by the gateway");
    describe_histogram!(
        "gateway_request_duration_seconds",
        Unit::Seconds,
        "Time from request receipt to response headers"
    );
    describe_counter!("gateway_cache_lookups_total", Unit::Count, "Response cache lookups");
    describe_gauge!("gateway_cache_entries", Unit::Count, "Live response cache entries");
    describe_counter!("gateway_retries_total", Unit::Count, "Downstream retry attempts");
    describe_gauge!("gateway_breaker_state", "Circuit breaker state per downstream target");
    describe_counter!(
        "gateway_breaker_rejections_total",
        Unit::Count,
        "Calls rejected by an open circuit breaker"
    );

    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, status: u16, route: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("route", route.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", "route" => route.to_string())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("gateway_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("gateway_cache_entries").set(entries as f64);
}

pub fn record_retry(route: &str) {
    counter!("gateway_retries_total", "route" => route.to_string()).increment(1);
}

pub fn record_breaker_state(target: &str, state: CircuitState) {
    gauge!("gateway_breaker_state", "target" => target.to_string()).set(state.as_gauge());
}

pub fn record_breaker_rejection(target: &str) {
    counter!("gateway_breaker_rejections_total", "target" => target.to_string()).increment(1);
}
