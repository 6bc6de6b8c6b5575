//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware, panic boundary)
//!     → request.rs (request ID)
//!     → ops.rs (local operational endpoints) or dispatcher.rs (proxy fallback)
//!     → dispatcher.rs → routing → cache → resilience → client.rs
//!     → error.rs (every failure leaves as a JSON error envelope)
//!     → Send to client
//! ```

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod ops;
pub mod request;
pub mod server;

pub use client::{DownstreamRequest, HyperUpstream, Upstream, UpstreamError};
pub use dispatcher::Dispatcher;
pub use error::{ErrorEnvelope, GatewayError};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
