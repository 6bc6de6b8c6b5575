//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Cacheable request (route TTL > 0, GET/HEAD)
//!     → fingerprint.rs (method, normalized path, sorted query, vary headers)
//!     → response.rs (lookup: HIT returns stored response)
//!     → On MISS: single_flight.rs (optional; collapse concurrent misses)
//!     → Downstream call, then response.rs (store if storable)
//! ```
//!
//! # Design Decisions
//! - Entries expire by TTL; expired entries are never served
//! - Bounded by entry count and total bytes, evicting expired first then LRU
//! - Only successful responses are stored; `no-store`, `private` and
//!   `Set-Cookie` responses bypass the cache

pub mod fingerprint;
pub mod response;
pub mod single_flight;

pub use fingerprint::Fingerprint;
pub use response::{CacheStats, CacheStatus, CachedResponse, ResponseCache, X_CACHE};
pub use single_flight::{Flight, FlightResult, SingleFlight};
