//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap each downstream attempt with its route's deadline
//! - Cancel the in-flight call cleanly on timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; dropping the future aborts the request
//! - Timeout errors are distinct from other errors
//! - Timed-out requests end as 504 Gateway Timeout once retries are exhausted

use std::future::Future;
use std::time::Duration;

/// Result of a deadline-bounded operation.
#[derive(Debug, PartialEq, Eq)]
pub enum Deadline<T> {
    Completed(T),
    Elapsed,
}

/// Run `fut` to completion or until `limit` elapses, whichever comes first.
pub async fn with_deadline<F, T>(limit: Duration, fut: F) -> Deadline<T>
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(value) => Deadline::Completed(value),
        Err(_) => Deadline::Elapsed,
    }
}
