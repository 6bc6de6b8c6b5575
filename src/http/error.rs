//! Error normalization at the edge of the gateway.
//!
//! # Responsibilities
//! - Define the failures the request pipeline can raise
//! - Map every failure to a status code and a client-safe message
//! - Write the `{"statusCode": .., "message": ..}` envelope
//! - Turn panics inside the pipeline into the same envelope
//!
//! # Design Decisions
//! - Components below the boundary never write to the client; they return `GatewayError`
//! - Internal detail goes to the log only, never to the response body

use std::any::Any;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body written for every failed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status_code: status.as_u16(),
            message: message.into(),
        }
    }
}

impl IntoResponse for ErrorEnvelope {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self)).into_response()
    }
}

/// Failures surfaced by the request pipeline.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("no route matches {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("downstream {target} timed out after {attempts} attempt(s)")]
    DownstreamTimeout { target: String, attempts: u32 },

    #[error("downstream {target} unavailable: {reason}")]
    DownstreamUnavailable { target: String, reason: String },

    #[error("request body exceeds {limit} bytes")]
    PayloadTooLarge { limit: usize },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn internal(err: impl std::fmt::Display) -> Self {
        GatewayError::Internal(err.to_string())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            GatewayError::DownstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::DownstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show the caller. Downstream identities stay in the logs.
    pub fn client_message(&self) -> String {
        match self {
            GatewayError::RouteNotFound { method, path } => {
                format!("No route found for {} {}", method, path)
            }
            GatewayError::DownstreamTimeout { .. } => "Downstream service timed out".to_string(),
            GatewayError::DownstreamUnavailable { .. } => "Downstream service unavailable".to_string(),
            GatewayError::PayloadTooLarge { limit } => {
                format!("Request body exceeds {} bytes", limit)
            }
            GatewayError::Internal(_) => "An unexpected error occurred".to_string(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope::new(self.status_code(), self.client_message())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match &self {
            GatewayError::Internal(detail) => {
                tracing::error!(error = %detail, "Unhandled error in request pipeline");
            }
            GatewayError::RouteNotFound { .. } | GatewayError::PayloadTooLarge { .. } => {
                tracing::debug!(error = %self, "Request rejected");
            }
            _ => tracing::warn!(error = %self, "Downstream failure"),
        }
        self.envelope().into_response()
    }
}

/// Panic handler for `CatchPanicLayer`: log the payload, answer with a generic 500.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    };

    GatewayError::Internal(format!("panic: {}", detail)).into_response()
}
