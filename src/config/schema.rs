//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Service identity reported by the operational endpoints.
    pub service: ServiceConfig,

    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions mapping upstream requests to downstream targets.
    pub routes: Vec<RouteConfig>,

    /// Gateway-wide timeout defaults.
    pub timeouts: TimeoutConfig,

    /// Retry defaults for routes that do not override them.
    pub retries: RetryConfig,

    /// Circuit breaker defaults for routes that do not override them.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub security: SecurityConfig,

    pub admin: AdminConfig,

    pub operational: OperationalConfig,
}

/// Service identity.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Name returned by `/`, `/info` and `/healthcheck`.
    pub name: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "api-gateway".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A single route: upstream (method, path pattern) to a downstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// HTTP methods this route answers. Empty means any method.
    #[serde(default)]
    pub methods: Vec<String>,

    /// Upstream path pattern, e.g. `/users/{id}` or `/static/{*rest}`.
    pub path: String,

    /// Where matching requests are forwarded.
    pub downstream: DownstreamConfig,

    /// Per-attempt timeout in milliseconds (falls back to `timeouts.request_ms`).
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Cache TTL in seconds. Zero disables caching for the route.
    #[serde(default)]
    pub cache_ttl_secs: u64,

    #[serde(default)]
    pub retry_count: Option<u32>,

    #[serde(default)]
    pub retry_base_delay_ms: Option<u64>,

    #[serde(default)]
    pub retry_max_delay_ms: Option<u64>,

    /// Consecutive failures before the target's breaker opens. Zero disables it.
    #[serde(default)]
    pub breaker_threshold: Option<u32>,

    /// Breaker cool-down in seconds.
    #[serde(default)]
    pub breaker_open_secs: Option<u64>,

    /// Request headers forwarded downstream. Empty forwards everything
    /// except hop-by-hop headers.
    #[serde(default)]
    pub forward_headers: Vec<String>,
}

impl RouteConfig {
    /// Route answering any method with every override left at the gateway default.
    pub fn new(name: &str, path: &str, host: &str, port: u16, downstream_path: &str) -> Self {
        Self {
            name: name.to_string(),
            methods: Vec::new(),
            path: path.to_string(),
            downstream: DownstreamConfig {
                scheme: default_scheme(),
                host: host.to_string(),
                port,
                path: downstream_path.to_string(),
            },
            timeout_ms: None,
            cache_ttl_secs: 0,
            retry_count: None,
            retry_base_delay_ms: None,
            retry_max_delay_ms: None,
            breaker_threshold: None,
            breaker_open_secs: None,
            forward_headers: Vec::new(),
        }
    }
}

/// Downstream target of a route.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownstreamConfig {
    #[serde(default = "default_scheme")]
    pub scheme: String,

    pub host: String,

    pub port: u16,

    /// Downstream path template, e.g. `/api/users/{id}`.
    pub path: String,
}

fn default_scheme() -> String {
    "http".to_string()
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-attempt downstream timeout in milliseconds.
    pub request_ms: u64,

    /// Downstream connection establishment timeout in milliseconds.
    pub connect_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_ms: 30_000,
            connect_ms: 5_000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Number of retries after the first attempt.
    pub count: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 0,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening. Zero disables breaking.
    pub failure_threshold: u32,

    /// Cool-down in seconds before a probe is admitted.
    pub open_secs: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_secs: 30,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,

    /// Collapse concurrent misses on the same fingerprint into one downstream call.
    pub single_flight: bool,

    /// Maximum number of entries (0 = unbounded).
    pub max_entries: usize,

    /// Maximum total body bytes (0 = unbounded).
    pub max_bytes: usize,

    /// Largest response body that will be stored.
    pub max_body_bytes: usize,

    /// Request headers that take part in the fingerprint.
    pub vary_headers: Vec<String>,

    /// Interval of the background expiry sweep (0 disables it).
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            single_flight: false,
            max_entries: 10_000,
            max_bytes: 64 * 1024 * 1024,
            max_body_bytes: 1024 * 1024,
            vary_headers: vec!["accept".to_string(), "accept-encoding".to_string()],
            sweep_interval_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Security hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,
    /// Allow cross-origin requests from any origin.
    pub cors_enabled: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
            cors_enabled: true,
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the read-only admin API.
    pub enabled: bool,

    /// Admin API bind address. Keep it on loopback.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Local operational endpoints (`/`, `/info`, `/status`, `/healthcheck`).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OperationalConfig {
    pub enabled: bool,
}

impl Default for OperationalConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
