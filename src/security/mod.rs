//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → body limit (security.max_body_size, enforced by the dispatcher)
//!     → headers.rs (strip hop-by-hop, allow-list, add X-Forwarded-*)
//!     → Forward downstream
//!
//! Downstream response:
//!     → headers.rs (strip hop-by-hop)
//!     → Client
//! ```
//!
//! # Design Decisions
//! - No trust in client input: connection-scoped headers never cross the gateway
//! - Authentication is left to the downstream services

pub mod headers;
