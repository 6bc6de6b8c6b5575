//! Circuit breaker for downstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: downstream assumed down, requests fail fast
//! - Half-Open: testing if downstream recovered
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold
//! Open → Half-Open: cool-down elapsed (evaluated lazily on the next allow)
//! Half-Open → Closed: probe request succeeds
//! Half-Open → Open: probe request fails
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker (not global), keyed by `scheme://host:port`
//! - Fail fast in Open state (no waiting for timeout)
//! - Single probe in Half-Open (prevents hammering recovering downstream)
//! - Permits are RAII: a probe dropped without a report frees the probe slot
//! - Reports carry the generation they were issued in; stale reports are ignored

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::observability::metrics;
use crate::routing::RouteTable;

/// Threshold and cool-down of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSettings {
    /// Consecutive failures that open the circuit. Zero disables the breaker.
    pub failure_threshold: u32,
    /// Time spent Open before a probe is admitted.
    pub open_duration: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Externally visible breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    /// Gauge value: 0=closed, 1=open, 2=half-open.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        }
    }
}

/// Final outcome of a protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Returned by `allow` while the circuit is open.
#[derive(Debug, Clone, Error)]
#[error("circuit open for {target}")]
pub struct Rejected {
    pub target: String,
    /// Remaining cool-down, zero while a half-open probe is in flight.
    pub retry_after: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Closed { failures: u32 },
    Open,
    HalfOpen { probe_in_flight: bool },
}

impl Phase {
    fn state(&self) -> CircuitState {
        match self {
            Phase::Closed { .. } => CircuitState::Closed,
            Phase::Open => CircuitState::Open,
            Phase::HalfOpen { .. } => CircuitState::HalfOpen,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    phase: Phase,
    /// Time of the last state transition.
    since: Instant,
    /// Bumped on every transition.
    generation: u64,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub secs_in_state: f64,
    pub failure_threshold: u32,
    pub open_secs: u64,
}

/// State machine guarding a single downstream target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    settings: BreakerSettings,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, settings: BreakerSettings) -> Self {
        Self {
            target: target.into(),
            settings,
            inner: Mutex::new(BreakerInner {
                phase: Phase::Closed { failures: 0 },
                since: Instant::now(),
                generation: 0,
            }),
        }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, inner: &mut BreakerInner, to: Phase) {
        let from = inner.phase.state();
        inner.phase = to;
        inner.since = Instant::now();
        inner.generation += 1;

        let to = to.state();
        if to == CircuitState::Closed {
            tracing::info!(downstream = %self.target, from = ?from, to = ?to, "Circuit breaker transition");
        } else {
            tracing::warn!(downstream = %self.target, from = ?from, to = ?to, "Circuit breaker transition");
        }
        metrics::record_breaker_state(&self.target, to);
    }

    fn allow(self: &Arc<Self>) -> Result<Permit, Rejected> {
        if self.settings.failure_threshold == 0 {
            return Ok(self.permit(false, 0));
        }

        let mut inner = self.lock();
        match inner.phase {
            Phase::Closed { .. } => Ok(self.permit(false, inner.generation)),
            Phase::Open => {
                let elapsed = inner.since.elapsed();
                if elapsed >= self.settings.open_duration {
                    self.transition(&mut inner, Phase::HalfOpen { probe_in_flight: true });
                    Ok(self.permit(true, inner.generation))
                } else {
                    Err(self.rejected(self.settings.open_duration - elapsed))
                }
            }
            Phase::HalfOpen { probe_in_flight: true } => Err(self.rejected(Duration::ZERO)),
            Phase::HalfOpen { probe_in_flight: false } => {
                inner.phase = Phase::HalfOpen { probe_in_flight: true };
                Ok(self.permit(true, inner.generation))
            }
        }
    }

    fn permit(self: &Arc<Self>, probe: bool, generation: u64) -> Permit {
        Permit {
            breaker: Arc::clone(self),
            probe,
            generation,
            settled: false,
        }
    }

    fn rejected(&self, retry_after: Duration) -> Rejected {
        metrics::record_breaker_rejection(&self.target);
        Rejected {
            target: self.target.clone(),
            retry_after,
        }
    }

    fn report(&self, probe: bool, generation: u64, outcome: Outcome) {
        if self.settings.failure_threshold == 0 {
            return;
        }

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::trace!(downstream = %self.target, "Ignoring stale breaker report");
            return;
        }

        match (inner.phase, outcome) {
            (Phase::Closed { .. }, Outcome::Success) => {
                inner.phase = Phase::Closed { failures: 0 };
            }
            (Phase::Closed { failures }, Outcome::Failure) => {
                let failures = failures + 1;
                if failures >= self.settings.failure_threshold {
                    self.transition(&mut inner, Phase::Open);
                } else {
                    inner.phase = Phase::Closed { failures };
                }
            }
            (Phase::HalfOpen { .. }, Outcome::Success) if probe => {
                self.transition(&mut inner, Phase::Closed { failures: 0 });
            }
            (Phase::HalfOpen { .. }, Outcome::Failure) if probe => {
                self.transition(&mut inner, Phase::Open);
            }
            _ => {}
        }
    }

    fn release_probe(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.generation == generation && inner.phase == (Phase::HalfOpen { probe_in_flight: true }) {
            inner.phase = Phase::HalfOpen { probe_in_flight: false };
            tracing::debug!(downstream = %self.target, "Probe abandoned, slot released");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().phase.state()
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.lock();
        BreakerSnapshot {
            target: self.target.clone(),
            state: inner.phase.state(),
            consecutive_failures: match inner.phase {
                Phase::Closed { failures } => failures,
                _ => self.settings.failure_threshold,
            },
            secs_in_state: inner.since.elapsed().as_secs_f64(),
            failure_threshold: self.settings.failure_threshold,
            open_secs: self.settings.open_duration.as_secs(),
        }
    }
}

/// Admission ticket for one protected call.
///
/// Must be settled with [`CircuitBreakerRegistry::report`]. Dropping an
/// unsettled probe permit frees the half-open probe slot.
#[derive(Debug)]
pub struct Permit {
    breaker: Arc<CircuitBreaker>,
    probe: bool,
    generation: u64,
    settled: bool,
}

impl Permit {
    /// True if this permit is the half-open probe.
    pub fn is_probe(&self) -> bool {
        self.probe
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.settled && self.probe {
            self.breaker.release_probe(self.generation);
        }
    }
}

/// Owns one breaker per downstream target.
#[derive(Debug, Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
}

impl CircuitBreakerRegistry {
    /// Create an empty registry. Unregistered targets get `defaults`.
    pub fn new(defaults: BreakerSettings) -> Self {
        Self {
            breakers: DashMap::new(),
            defaults,
        }
    }

    /// Register a breaker for every route target. The first route naming a target
    /// fixes its settings.
    pub fn from_routes(routes: &RouteTable, defaults: BreakerSettings) -> Self {
        let registry = Self::new(defaults);
        for route in routes.routes() {
            registry.register(&route.target.key(), route.breaker);
        }
        registry
    }

    pub fn register(&self, target: &str, settings: BreakerSettings) {
        match self.breakers.get(target) {
            Some(existing) if existing.settings() != settings => {
                tracing::warn!(
                    downstream = %target,
                    kept = ?existing.settings(),
                    ignored = ?settings,
                    "Conflicting circuit breaker settings for shared target"
                );
            }
            Some(_) => {}
            None => {
                self.breakers
                    .insert(target.to_string(), Arc::new(CircuitBreaker::new(target, settings)));
            }
        }
    }

    fn breaker(&self, target: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(target, self.defaults)))
            .clone()
    }

    /// Ask for permission to call `target`.
    pub fn allow(&self, target: &str) -> Result<Permit, Rejected> {
        self.breaker(target).allow()
    }

    /// Settle a permit with the final outcome of its call.
    pub fn report(&self, mut permit: Permit, outcome: Outcome) {
        permit.settled = true;
        permit.breaker.report(permit.probe, permit.generation, outcome);
    }

    pub fn state(&self, target: &str) -> Option<CircuitState> {
        self.breakers.get(target).map(|b| b.state())
    }

    pub fn snapshots(&self) -> Vec<BreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.iter().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        snapshots
    }
}
