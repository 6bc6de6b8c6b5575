//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the operational handlers and the proxy fallback
//! - Wire up middleware (panic boundary, tracing, request ID, CORS)
//! - Bind server to listener with graceful shutdown
//! - Run background tasks (cache sweeper, admin API)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    response::{IntoResponse, Response},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{Any, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::admin;
use crate::cache::ResponseCache;
use crate::config::GatewayConfig;
use crate::http::client::{HyperUpstream, Upstream};
use crate::http::dispatcher::Dispatcher;
use crate::http::error::handle_panic;
use crate::http::ops;
use crate::http::request::{request_id, MakeRequestUuid};
use crate::lifecycle::Shutdown;
use crate::resilience::{BreakerSettings, CircuitBreakerRegistry, ResiliencePolicyEngine};
use crate::routing::RouteTable;

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    dispatcher: Dispatcher,
}

impl HttpServer {
    /// Create a server forwarding through the pooled hyper client.
    pub fn new(config: GatewayConfig, routes: RouteTable) -> Self {
        let upstream = HyperUpstream::new(Duration::from_millis(config.timeouts.connect_ms));
        Self::with_upstream(config, routes, Arc::new(upstream))
    }

    /// Create a server forwarding through `upstream`.
    pub fn with_upstream(config: GatewayConfig, routes: RouteTable, upstream: Arc<dyn Upstream>) -> Self {
        let routes = Arc::new(routes);
        let defaults = BreakerSettings {
            failure_threshold: config.circuit_breaker.failure_threshold,
            open_duration: Duration::from_secs(config.circuit_breaker.open_secs),
        };
        let breakers = Arc::new(CircuitBreakerRegistry::from_routes(&routes, defaults));
        let engine = ResiliencePolicyEngine::new(breakers, upstream);
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        let dispatcher = Dispatcher::new(routes, cache, engine, config.security.max_body_size);

        let router = Self::build_router(&config, dispatcher.clone());
        Self {
            router,
            config,
            dispatcher,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(config: &GatewayConfig, dispatcher: Dispatcher) -> Router {
        let proxy = Router::new().fallback(proxy_handler).with_state(dispatcher);

        let mut router = if config.operational.enabled {
            ops::router(&config.service.name, proxy.clone()).merge(proxy)
        } else {
            proxy
        };

        if config.security.cors_enabled {
            router = router.layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            );
        }

        router.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                    tracing::info_span!(
                        "request",
                        method = %request.method(),
                        uri = %request.uri(),
                        request_id = %request_id(request),
                    )
                }))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CatchPanicLayer::custom(handle_panic)),
        )
    }

    /// The fully layered router, e.g. for driving with `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires, accepting connections on `listener`.
    pub async fn run(self, listener: TcpListener, shutdown: &Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.dispatcher.routes().len(),
            "HTTP server starting"
        );

        let sweeper = {
            let cache = Arc::clone(self.dispatcher.cache());
            let rx = shutdown.subscribe();
            tokio::spawn(async move { cache.run_sweeper(rx).await })
        };

        if self.config.admin.enabled {
            let admin_listener = TcpListener::bind(&self.config.admin.bind_address).await?;
            let admin_router = admin::router(self.dispatcher.clone(), &self.config);
            let mut rx = shutdown.subscribe();
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");
            tokio::spawn(async move {
                let served = axum::serve(admin_listener, admin_router)
                    .with_graceful_shutdown(async move {
                        let _ = rx.recv().await;
                    })
                    .await;
                if let Err(e) = served {
                    tracing::error!(error = %e, "Admin API failed");
                }
            });
        }

        let mut rx = shutdown.subscribe();
        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = rx.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        if let Err(e) = sweeper.await {
            tracing::warn!(error = %e, "Cache sweeper task failed");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Proxy fallback: every request not served locally goes through the dispatcher.
async fn proxy_handler(State(dispatcher): State<Dispatcher>, request: Request<Body>) -> Response {
    let client = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    match dispatcher.handle(request, client).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{header, StatusCode};
    use tower::ServiceExt;

    use crate::config::RouteConfig;
    use crate::http::error::ErrorEnvelope;
    use crate::http::request::X_REQUEST_ID;
    use crate::resilience::retries::tests::{ScriptedUpstream, Step};

    fn server(upstream: Arc<ScriptedUpstream>) -> HttpServer {
        let config = GatewayConfig {
            routes: vec![RouteConfig::new("values", "/api/{*rest}", "service-b", 5000, "/api/{rest}")],
            ..GatewayConfig::default()
        };
        let routes = RouteTable::from_config(&config).unwrap();
        HttpServer::with_upstream(config, routes, upstream)
    }

    async fn envelope(response: Response) -> ErrorEnvelope {
        let body = axum::body::to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_route_answers_with_envelope() {
        let server = server(ScriptedUpstream::new([]));
        let response = server
            .router()
            .oneshot(Request::builder().uri("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(response.headers().get(X_REQUEST_ID).is_some());
        let envelope = envelope(response).await;
        assert_eq!(envelope.status_code, 404);
        assert_eq!(envelope.message, "No route found for GET /nowhere");
    }

    #[tokio::test]
    async fn test_proxied_response_and_request_id() {
        let upstream = ScriptedUpstream::always(Step::Status(200, "ServiceB -> Value"));
        let server = server(upstream.clone());
        let response = server
            .router()
            .oneshot(
                Request::builder()
                    .uri("/api/values")
                    .header(X_REQUEST_ID, "trace-me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[X_REQUEST_ID], "trace-me");
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"ServiceB -> Value");

        let calls = upstream.calls.lock().unwrap();
        assert_eq!(calls[0].1.uri().path(), "/api/values");
        assert_eq!(calls[0].1.headers()[X_REQUEST_ID], "trace-me");
    }

    #[tokio::test]
    async fn test_operational_endpoints_answer_locally() {
        let upstream = ScriptedUpstream::new([]);
        let server = server(upstream.clone());
        let response = server
            .router()
            .oneshot(Request::builder().uri("/healthcheck").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"api-gateway is healthy");
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_get_on_operational_path_is_dispatched() {
        let upstream = ScriptedUpstream::new([]);
        let response = server(upstream.clone())
            .router()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/healthcheck")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let envelope = envelope(response).await;
        assert_eq!(envelope.message, "No route found for POST /healthcheck");
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn test_non_get_on_operational_path_reaches_catch_all_route() {
        let upstream = ScriptedUpstream::always(Step::Status(200, "posted"));
        let config = GatewayConfig {
            routes: vec![RouteConfig::new("all", "/{*rest}", "service-b", 5000, "/{rest}")],
            ..GatewayConfig::default()
        };
        let routes = RouteTable::from_config(&config).unwrap();
        let router = HttpServer::with_upstream(config, routes, upstream.clone()).router();

        for uri in ["/", "/info", "/healthcheck"] {
            let response = router
                .clone()
                .oneshot(Request::builder().method("POST").uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "POST {uri}");
        }
        assert_eq!(upstream.call_count(), 3);
    }

    #[tokio::test]
    async fn test_downstream_failures_mapped_to_status() {
        let server = server(ScriptedUpstream::always(Step::Status(500, "stack trace here")));
        let response = server
            .router()
            .oneshot(Request::builder().uri("/api/values/badcode").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let envelope = envelope(response).await;
        assert_eq!(envelope.message, "Downstream service unavailable");
    }

    #[tokio::test]
    async fn test_panics_become_internal_error_envelope() {
        let router = Router::new()
            .route("/boom", axum::routing::get(|| async { panic!("secret detail") as &'static str }))
            .layer(CatchPanicLayer::custom(handle_panic));
        let response = router
            .oneshot(Request::builder().uri("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let envelope = envelope(response.into_response()).await;
        assert_eq!(envelope.message, "An unexpected error occurred");
    }
}
