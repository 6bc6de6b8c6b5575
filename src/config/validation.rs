//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile every route so malformed patterns and targets surface at load time
//! - Validate value ranges (timeouts > 0, delays ordered, addresses parse)
//! - Detect conflicting routes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use std::str::FromStr;

use axum::http::HeaderName;
use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::{Route, RouteTable, RouteTableError};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Route(#[from] RouteTableError),

    #[error("{field}: {reason}")]
    Field { field: String, reason: String },
}

impl ValidationError {
    fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::Field {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Check `config` and report every problem found.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_address("listener.bind_address", &config.listener.bind_address, &mut errors);
    if config.admin.enabled {
        check_address("admin.bind_address", &config.admin.bind_address, &mut errors);
    }
    if config.observability.metrics_enabled {
        check_address(
            "observability.metrics_address",
            &config.observability.metrics_address,
            &mut errors,
        );
    }

    if config.timeouts.request_ms == 0 {
        errors.push(ValidationError::field("timeouts.request_ms", "must be greater than zero"));
    }
    if config.timeouts.connect_ms == 0 {
        errors.push(ValidationError::field("timeouts.connect_ms", "must be greater than zero"));
    }
    if config.retries.max_delay_ms < config.retries.base_delay_ms {
        errors.push(ValidationError::field(
            "retries.max_delay_ms",
            "must not be smaller than retries.base_delay_ms",
        ));
    }
    if config.security.max_body_size == 0 {
        errors.push(ValidationError::field("security.max_body_size", "must be greater than zero"));
    }
    for name in &config.cache.vary_headers {
        if HeaderName::from_str(&name.to_ascii_lowercase()).is_err() {
            errors.push(ValidationError::field(
                "cache.vary_headers",
                format!("invalid header name `{}`", name),
            ));
        }
    }

    let mut names = HashSet::new();
    let mut compiled = Vec::with_capacity(config.routes.len());
    for (i, route) in config.routes.iter().enumerate() {
        let field = |name: &str| format!("routes[{}].{}", i, name);

        if route.name.trim().is_empty() {
            errors.push(ValidationError::field(field("name"), "must not be empty"));
        } else if !names.insert(route.name.as_str()) {
            errors.push(RouteTableError::DuplicateName(route.name.clone()).into());
            continue;
        }
        if route.timeout_ms == Some(0) {
            errors.push(ValidationError::field(field("timeout_ms"), "must be greater than zero"));
        }
        let base = route.retry_base_delay_ms.unwrap_or(config.retries.base_delay_ms);
        let max = route.retry_max_delay_ms.unwrap_or(config.retries.max_delay_ms);
        if max < base {
            errors.push(ValidationError::field(
                field("retry_max_delay_ms"),
                format!("{} is smaller than the base delay {}", max, base),
            ));
        }

        match Route::from_config(route, config) {
            Ok(route) => compiled.push(route),
            Err(e) => errors.push(e.into()),
        }
    }

    // Ambiguity can only be judged once every route compiled
    if errors.is_empty() {
        if let Err(e) = RouteTable::new(compiled) {
            errors.push(e.into());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_address(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    if let Err(e) = value.parse::<SocketAddr>() {
        errors.push(ValidationError::field(field, format!("`{}`: {}", value, e)));
    }
}
