//! Read-only operator API.
//!
//! Served on its own listener (loopback by default) and never behind the
//! proxy fallback. There is no authentication; keep it off public interfaces.

pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};

use self::handlers::*;
use crate::config::GatewayConfig;
use crate::http::Dispatcher;

#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Dispatcher,
    pub service: Arc<str>,
    pub started: Instant,
}

pub fn router(dispatcher: Dispatcher, config: &GatewayConfig) -> Router {
    let state = AdminState {
        dispatcher,
        service: Arc::from(config.service.name.as_str()),
        started: Instant::now(),
    };

    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/routes", get(get_routes))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/cache", get(get_cache))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::config::RouteConfig;
    use crate::http::HttpServer;
    use crate::resilience::retries::tests::{ScriptedUpstream, Step};
    use crate::routing::RouteTable;

    fn admin() -> Router {
        let mut route = RouteConfig::new("values", "/api/values", "service-b", 5000, "/api/values");
        route.cache_ttl_secs = 30;
        let config = GatewayConfig {
            routes: vec![route],
            ..GatewayConfig::default()
        };
        let routes = RouteTable::from_config(&config).unwrap();
        let server = HttpServer::with_upstream(config.clone(), routes, ScriptedUpstream::always(Step::Status(200, "ok")));
        router(server.dispatcher().clone(), &config)
    }

    async fn get_json(router: Router, uri: &str) -> Value {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_status_and_routes() {
        let status = get_json(admin(), "/admin/status").await;
        assert_eq!(status["service"], "api-gateway");
        assert_eq!(status["routes"], 1);

        let routes = get_json(admin(), "/admin/routes").await;
        assert_eq!(routes[0]["name"], "values");
        assert_eq!(routes[0]["downstream"], "http://service-b:5000/api/values");
        assert_eq!(routes[0]["cache_ttl_secs"], 30);
    }

    #[tokio::test]
    async fn test_breakers_and_cache() {
        let breakers = get_json(admin(), "/admin/breakers").await;
        assert_eq!(breakers[0]["target"], "http://service-b:5000");
        assert_eq!(breakers[0]["state"], "closed");

        let cache = get_json(admin(), "/admin/cache").await;
        assert_eq!(cache["entries"], 0);
        assert_eq!(cache["hits"], 0);
    }
}
