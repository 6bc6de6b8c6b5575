//! Downstream HTTP client.
//!
//! # Responsibilities
//! - Send one outbound request to a downstream target
//! - Surface connection failures as a typed error
//!
//! # Design Decisions
//! - `Upstream` is the seam between the resilience layer and the network, so
//!   retry/breaker behavior can be exercised without sockets
//! - Requests are rebuilt from a buffered `DownstreamRequest` for every attempt
//! - Deadlines are applied by the caller, not the client

use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Method, Request, Response, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;

/// Failure to obtain a response from downstream.
#[derive(Debug, Clone, Error)]
#[error("downstream request failed: {0}")]
pub struct UpstreamError(pub String);

/// Something that can deliver a request to a downstream service.
#[async_trait]
pub trait Upstream: Send + Sync + 'static {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError>;
}

/// Outbound request with a buffered body, replayable across retries.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl DownstreamRequest {
    /// Build a fresh `Request` for one attempt.
    pub fn to_request(&self) -> Request<Body> {
        let mut request = Request::new(Body::from(self.body.clone()));
        *request.method_mut() = self.method.clone();
        *request.uri_mut() = self.uri.clone();
        *request.headers_mut() = self.headers.clone();
        request
    }
}

/// `Upstream` backed by the pooled hyper client.
#[derive(Clone)]
pub struct HyperUpstream {
    client: Client<HttpConnector, Body>,
}

impl HyperUpstream {
    pub fn new(connect_timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(connect_timeout));
        connector.set_nodelay(true);

        let client = Client::builder(TokioExecutor::new()).build(connector);
        Self { client }
    }
}

#[async_trait]
impl Upstream for HyperUpstream {
    async fn send(&self, request: Request<Body>) -> Result<Response<Body>, UpstreamError> {
        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| UpstreamError(e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[tokio::test]
    async fn test_request_is_replayable() {
        let mut headers = HeaderMap::new();
        headers.insert("x-test", HeaderValue::from_static("1"));
        let downstream = DownstreamRequest {
            method: Method::POST,
            uri: "http://api1:8080/api/values".parse().unwrap(),
            headers,
            body: Bytes::from_static(b"payload"),
        };

        for _ in 0..2 {
            let request = downstream.to_request();
            assert_eq!(request.method(), Method::POST);
            assert_eq!(request.uri().path(), "/api/values");
            assert_eq!(request.headers()["x-test"], "1");
            let body = axum::body::to_bytes(request.into_body(), 1024).await.unwrap();
            assert_eq!(&body[..], b"payload");
        }
    }

    #[tokio::test]
    async fn test_connection_refused_is_upstream_error() {
        // Bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let upstream = HyperUpstream::new(Duration::from_secs(1));
        let request = Request::builder()
            .uri(format!("http://{}/", addr))
            .body(Body::empty())
            .unwrap();
        assert!(upstream.send(request).await.is_err());
    }
}
