//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to downstream:
//!     → circuit_breaker.rs (permit or fail fast)
//!     → timeouts.rs (enforce per-attempt deadline)
//!     → On transient failure: backoff.rs (jittered delay) and retry
//!     → circuit_breaker.rs (one outcome report per call)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - Retry, backoff and breaking form one policy (retries.rs), not stacked layers
//! - Circuit breaker prevents cascading failures

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use circuit_breaker::{BreakerSettings, CircuitBreakerRegistry, CircuitState, Outcome, Permit};
pub use retries::{ResiliencePolicyEngine, RetryPolicy};
