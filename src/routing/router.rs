//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Compile route configuration into immutable routes
//! - Order routes by specificity, rejecting ambiguous tables
//! - Look up the most specific route for a (method, path) pair
//!
//! # Design Decisions
//! - Immutable after construction (thread-safe without locks)
//! - O(n) scan over routes sorted most-specific first; first match wins
//! - Ambiguity is a startup error, never resolved at request time

use std::cmp::Ordering;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderName, Method};
use thiserror::Error;
use url::Url;

use crate::config::{GatewayConfig, RouteConfig};
use crate::resilience::circuit_breaker::BreakerSettings;
use crate::resilience::retries::RetryPolicy;
use crate::routing::matcher::{Captures, PathPattern, PathTemplate, PatternError};

/// Error raised while building the route table.
#[derive(Debug, Clone, Error)]
pub enum RouteTableError {
    #[error("route `{route}`: {source}")]
    InvalidPattern {
        route: String,
        #[source]
        source: PatternError,
    },

    #[error("route `{route}`: invalid method `{method}`")]
    InvalidMethod { route: String, method: String },

    #[error("route `{route}`: invalid header name `{header}`")]
    InvalidHeader { route: String, header: String },

    #[error("route `{route}`: malformed downstream target: {reason}")]
    InvalidTarget { route: String, reason: String },

    #[error("route `{route}`: downstream template uses `{{{placeholder}}}` which the path does not capture")]
    UnknownPlaceholder { route: String, placeholder: String },

    #[error("route name `{0}` is defined more than once")]
    DuplicateName(String),

    #[error("routes `{first}` and `{second}` match the same requests with equal specificity")]
    Ambiguous { first: String, second: String },
}

/// Downstream target of a route.
#[derive(Debug, Clone)]
pub struct Target {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: PathTemplate,
}

impl Target {
    /// Identity used for circuit breaking: `scheme://host:port`.
    pub fn key(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// `host:port`, used for the outbound `Host` header and URI authority.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A compiled, immutable route.
#[derive(Debug, Clone)]
pub struct Route {
    pub name: String,
    /// Accepted methods. Empty accepts any method.
    pub methods: Vec<Method>,
    pub pattern: PathPattern,
    pub target: Target,
    /// Per-attempt downstream timeout.
    pub timeout: Duration,
    /// Zero disables caching.
    pub cache_ttl: Duration,
    pub retry: RetryPolicy,
    pub breaker: BreakerSettings,
    /// Allow-list of forwarded request headers. Empty forwards all end-to-end headers.
    pub forward_headers: Vec<HeaderName>,
}

impl Route {
    /// Compile a route from configuration, falling back to the gateway-wide defaults.
    pub fn from_config(config: &RouteConfig, defaults: &GatewayConfig) -> Result<Self, RouteTableError> {
        let name = config.name.clone();

        let methods = config
            .methods
            .iter()
            .map(|m| {
                Method::from_str(&m.to_ascii_uppercase()).map_err(|_| RouteTableError::InvalidMethod {
                    route: name.clone(),
                    method: m.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pattern = PathPattern::parse(&config.path).map_err(|source| RouteTableError::InvalidPattern {
            route: name.clone(),
            source,
        })?;

        let target = parse_target(&name, config)?;
        for placeholder in target.path.placeholders() {
            if !pattern.capture_names().any(|n| n == placeholder) {
                return Err(RouteTableError::UnknownPlaceholder {
                    route: name.clone(),
                    placeholder: placeholder.to_string(),
                });
            }
        }

        let forward_headers = config
            .forward_headers
            .iter()
            .map(|h| {
                HeaderName::from_str(&h.to_ascii_lowercase()).map_err(|_| RouteTableError::InvalidHeader {
                    route: name.clone(),
                    header: h.clone(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let retry = RetryPolicy {
            count: config.retry_count.unwrap_or(defaults.retries.count),
            base_delay: Duration::from_millis(
                config.retry_base_delay_ms.unwrap_or(defaults.retries.base_delay_ms),
            ),
            max_delay: Duration::from_millis(
                config.retry_max_delay_ms.unwrap_or(defaults.retries.max_delay_ms),
            ),
        };

        let breaker = BreakerSettings {
            failure_threshold: config
                .breaker_threshold
                .unwrap_or(defaults.circuit_breaker.failure_threshold),
            open_duration: Duration::from_secs(
                config.breaker_open_secs.unwrap_or(defaults.circuit_breaker.open_secs),
            ),
        };

        Ok(Self {
            name,
            methods,
            pattern,
            target,
            timeout: Duration::from_millis(config.timeout_ms.unwrap_or(defaults.timeouts.request_ms)),
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            retry,
            breaker,
            forward_headers,
        })
    }

    /// True if this route accepts the given method.
    pub fn accepts(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    /// True if responses to this method on this route may be cached.
    pub fn is_cacheable(&self, method: &Method) -> bool {
        !self.cache_ttl.is_zero() && (method == Method::GET || method == Method::HEAD)
    }

    fn methods_overlap(&self, other: &Route) -> bool {
        self.methods.is_empty()
            || other.methods.is_empty()
            || self.methods.iter().any(|m| other.methods.contains(m))
    }

    fn rank(&self, other: &Route) -> Ordering {
        self.pattern
            .specificity()
            .cmp(&other.pattern.specificity())
            .then_with(|| self.methods.is_empty().cmp(&other.methods.is_empty()))
    }
}

fn parse_target(route: &str, config: &RouteConfig) -> Result<Target, RouteTableError> {
    let invalid = |reason: String| RouteTableError::InvalidTarget {
        route: route.to_string(),
        reason,
    };
    let downstream = &config.downstream;

    let scheme = downstream.scheme.to_ascii_lowercase();
    if scheme != "http" {
        return Err(invalid(format!("unsupported scheme `{}`", downstream.scheme)));
    }
    if downstream.host.trim().is_empty() {
        return Err(invalid("empty host".to_string()));
    }
    if downstream.port == 0 {
        return Err(invalid("port must be non-zero".to_string()));
    }

    let base = format!("{}://{}:{}", scheme, downstream.host, downstream.port);
    let url = Url::parse(&base).map_err(|e| invalid(format!("{base}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| invalid(format!("{base}: missing host")))?
        .to_string();

    let path = PathTemplate::parse(&downstream.path).map_err(|source| RouteTableError::InvalidPattern {
        route: route.to_string(),
        source,
    })?;

    Ok(Target {
        scheme,
        host,
        port: downstream.port,
        path,
    })
}

/// Result of a successful lookup.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub route: Arc<Route>,
    pub captures: Captures,
}

/// Immutable table of routes, ordered most-specific first.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Build the table, rejecting duplicate names and ambiguous routes.
    pub fn new(routes: Vec<Route>) -> Result<Self, RouteTableError> {
        for (i, a) in routes.iter().enumerate() {
            for b in &routes[i + 1..] {
                if a.name == b.name {
                    return Err(RouteTableError::DuplicateName(a.name.clone()));
                }
                if a.methods_overlap(b) && a.rank(b) == Ordering::Equal && a.pattern.overlaps(&b.pattern) {
                    return Err(RouteTableError::Ambiguous {
                        first: a.name.clone(),
                        second: b.name.clone(),
                    });
                }
            }
        }

        let mut routes: Vec<Arc<Route>> = routes.into_iter().map(Arc::new).collect();
        routes.sort_by(|a, b| a.rank(b));

        Ok(Self { routes })
    }

    /// Compile every configured route.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, RouteTableError> {
        let routes = config
            .routes
            .iter()
            .map(|r| Route::from_config(r, config))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(routes)
    }

    /// Find the most specific route for the request.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        self.routes
            .iter()
            .filter(|route| route.accepts(method))
            .find_map(|route| {
                route.pattern.matches(path).map(|captures| RouteMatch {
                    route: Arc::clone(route),
                    captures,
                })
            })
    }

    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
