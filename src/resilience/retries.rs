//! Retry policy execution.
//!
//! # Responsibilities
//! - Gate each downstream call through the target's circuit breaker
//! - Enforce the per-attempt timeout
//! - Retry transient failures with exponential backoff + jitter
//! - Report one final outcome per call to the breaker
//!
//! # Design Decisions
//! - Transient = connection error, timeout or 5xx; 2xx-4xx are returned as-is
//! - No network attempt and no retry when the breaker rejects
//! - Backoff waits are async sleeps, never thread-blocking
//! - Individual retries are never surfaced; only the final outcome is

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Response, StatusCode};

use crate::http::client::{DownstreamRequest, Upstream};
use crate::http::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::backoff::Backoff;
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, Outcome};
use crate::resilience::timeouts::{with_deadline, Deadline};
use crate::routing::Route;

/// Retry settings of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; total attempts = count + 1.
    pub count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            count: 0,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(2000),
        }
    }
}

/// Why a single attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptFailure {
    Timeout,
    Connect(String),
    ServerError(StatusCode),
}

impl AttemptFailure {
    fn into_error(self, target: String, attempts: u32) -> GatewayError {
        match self {
            AttemptFailure::Timeout => GatewayError::DownstreamTimeout { target, attempts },
            AttemptFailure::Connect(reason) => GatewayError::DownstreamUnavailable {
                target,
                reason: format!("{} (after {} attempt(s))", reason, attempts),
            },
            AttemptFailure::ServerError(status) => GatewayError::DownstreamUnavailable {
                target,
                reason: format!("status {} (after {} attempt(s))", status, attempts),
            },
        }
    }
}

impl std::fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttemptFailure::Timeout => write!(f, "timeout"),
            AttemptFailure::Connect(reason) => write!(f, "connection error: {}", reason),
            AttemptFailure::ServerError(status) => write!(f, "server error: {}", status),
        }
    }
}

/// Wraps downstream calls with breaker, timeout and retry policy.
#[derive(Clone)]
pub struct ResiliencePolicyEngine {
    breakers: Arc<CircuitBreakerRegistry>,
    upstream: Arc<dyn Upstream>,
}

impl ResiliencePolicyEngine {
    pub fn new(breakers: Arc<CircuitBreakerRegistry>, upstream: Arc<dyn Upstream>) -> Self {
        Self { breakers, upstream }
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    /// Execute `request` against the route's target under its resilience policy.
    pub async fn execute(
        &self,
        route: &Route,
        request: &DownstreamRequest,
    ) -> Result<Response<Body>, GatewayError> {
        let target = route.target.key();

        let permit = match self.breakers.allow(&target) {
            Ok(permit) => permit,
            Err(rejected) => {
                tracing::warn!(
                    route = %route.name,
                    downstream = %target,
                    retry_after = ?rejected.retry_after,
                    "Circuit open, failing fast"
                );
                return Err(GatewayError::DownstreamUnavailable {
                    target,
                    reason: rejected.to_string(),
                });
            }
        };

        let mut backoff = Backoff::new(route.retry.base_delay, route.retry.max_delay);
        let mut retries = 0u32;

        let failure = loop {
            match self.attempt(route, request).await {
                Ok(response) => {
                    self.breakers.report(permit, Outcome::Success);
                    return Ok(response);
                }
                Err(failure) if retries < route.retry.count => {
                    let delay = backoff.next_delay(retries);
                    retries += 1;
                    tracing::warn!(
                        route = %route.name,
                        downstream = %target,
                        attempt = retries,
                        delay = ?delay,
                        failure = %failure,
                        "Retrying downstream request"
                    );
                    metrics::record_retry(&route.name);
                    tokio::time::sleep(delay).await;
                }
                Err(failure) => break failure,
            }
        };

        self.breakers.report(permit, Outcome::Failure);
        Err(failure.into_error(target, retries + 1))
    }

    async fn attempt(
        &self,
        route: &Route,
        request: &DownstreamRequest,
    ) -> Result<Response<Body>, AttemptFailure> {
        match with_deadline(route.timeout, self.upstream.send(request.to_request())).await {
            Deadline::Elapsed => Err(AttemptFailure::Timeout),
            Deadline::Completed(Err(e)) => Err(AttemptFailure::Connect(e.to_string())),
            Deadline::Completed(Ok(response)) if response.status().is_server_error() => {
                Err(AttemptFailure::ServerError(response.status()))
            }
            Deadline::Completed(Ok(response)) => Ok(response),
        }
    }
}
