//! Reverse-proxy API gateway library.

pub mod admin;
pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod security;

pub use config::GatewayConfig;
pub use http::{Dispatcher, GatewayError, HttpServer};
pub use lifecycle::Shutdown;
pub use routing::RouteTable;
