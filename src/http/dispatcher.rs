//! Request dispatch: route → cache → resilient downstream call → cache.
//!
//! # Responsibilities
//! - Match the inbound request against the route table
//! - Serve cacheable requests from the response cache
//! - Build the downstream request (path rewrite, header policy)
//! - Delegate the call to the resilience policy engine
//! - Populate the cache from successful downstream responses
//!
//! # Design Decisions
//! - Never writes to the client; every failure is returned as `GatewayError`
//! - Request bodies are buffered once so retries can replay them
//! - Non-cacheable responses are streamed through untouched except for hop-by-hop headers

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::http::request::Parts;
use axum::http::{header, HeaderName, HeaderValue, Method, Request, Response, Uri};
use http_body_util::{BodyExt, LengthLimitError, Limited};

use crate::cache::{CacheStatus, CachedResponse, Fingerprint, Flight, ResponseCache};
use crate::http::client::DownstreamRequest;
use crate::http::error::GatewayError;
use crate::observability::metrics;
use crate::resilience::{CircuitBreakerRegistry, ResiliencePolicyEngine};
use crate::routing::matcher::Captures;
use crate::routing::{Route, RouteMatch, RouteTable};
use crate::security::headers::{append_forwarded, outbound_headers, strip_hop_by_hop};

/// Downstream response for a cacheable route.
enum Fetched {
    /// Small enough to buffer; may be stored and shared.
    Buffered(CachedResponse),
    /// Declared larger than the cacheable limit; streamed to this caller only.
    Streamed(Response<Body>),
}

/// Orchestrates a single request through routing, caching and resilience.
#[derive(Clone)]
pub struct Dispatcher {
    routes: Arc<RouteTable>,
    cache: Arc<ResponseCache>,
    engine: ResiliencePolicyEngine,
    vary: Arc<[HeaderName]>,
    max_body_size: usize,
}

impl Dispatcher {
    pub fn new(
        routes: Arc<RouteTable>,
        cache: Arc<ResponseCache>,
        engine: ResiliencePolicyEngine,
        max_body_size: usize,
    ) -> Self {
        let vary = cache
            .config()
            .vary_headers
            .iter()
            .filter_map(|name| match HeaderName::from_str(&name.to_ascii_lowercase()) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid cache vary header");
                    None
                }
            })
            .collect();

        Self {
            routes,
            cache,
            engine,
            vary,
            max_body_size,
        }
    }

    pub fn routes(&self) -> &Arc<RouteTable> {
        &self.routes
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        self.engine.breakers()
    }

    /// Handle one inbound request. `client` is the peer address, if known.
    pub async fn handle(
        &self,
        request: Request<Body>,
        client: Option<IpAddr>,
    ) -> Result<Response<Body>, GatewayError> {
        let start = Instant::now();
        let method = request.method().clone();

        let Some(matched) = self.routes.lookup(&method, request.uri().path()) else {
            metrics::record_request(method.as_str(), 404, "none", start);
            return Err(GatewayError::RouteNotFound {
                method: method.to_string(),
                path: request.uri().path().to_string(),
            });
        };

        tracing::debug!(
            route = %matched.route.name,
            method = %method,
            path = %request.uri().path(),
            "Route matched"
        );

        let route_name = matched.route.name.clone();
        let result = self.dispatch(matched, request, client).await;

        let status = match &result {
            Ok(response) => response.status(),
            Err(e) => e.status_code(),
        };
        metrics::record_request(method.as_str(), status.as_u16(), &route_name, start);
        result
    }

    async fn dispatch(
        &self,
        matched: RouteMatch,
        request: Request<Body>,
        client: Option<IpAddr>,
    ) -> Result<Response<Body>, GatewayError> {
        let RouteMatch { route, captures } = matched;
        let (parts, body) = request.into_parts();
        let body = self.buffer_body(&parts, body).await?;
        let downstream = build_downstream_request(&route, &captures, &parts, body, client)?;

        if !(self.cache.is_enabled() && route.is_cacheable(&parts.method)) {
            let response = self.engine.execute(&route, &downstream).await?;
            return Ok(strip_response(response));
        }

        let fingerprint = Fingerprint::new(&parts.method, &parts.uri, &parts.headers, &self.vary);
        self.dispatch_cacheable(&route, &downstream, fingerprint).await
    }

    async fn dispatch_cacheable(
        &self,
        route: &Route,
        downstream: &DownstreamRequest,
        fingerprint: Fingerprint,
    ) -> Result<Response<Body>, GatewayError> {
        loop {
            if let Some(hit) = self.cache.get(&fingerprint) {
                tracing::debug!(route = %route.name, fingerprint = %fingerprint, "Cache hit");
                return Ok(hit.into_response(CacheStatus::Hit));
            }
            tracing::debug!(route = %route.name, fingerprint = %fingerprint, "Cache miss");

            if !self.cache.single_flight_enabled() {
                return self.fetch_and_store(route, downstream, &fingerprint).await;
            }

            match self.cache.join_flight(&fingerprint) {
                Flight::Leader(leader) => {
                    // A previous leader may have stored the entry since our lookup
                    if let Some(hit) = self.cache.peek(&fingerprint) {
                        return Ok(hit.into_response(CacheStatus::Hit));
                    }
                    return match self.fetch(route, downstream).await {
                        Ok(Fetched::Buffered(response)) => {
                            self.store(route, &fingerprint, &response);
                            leader.complete(&Ok(response.clone()));
                            Ok(response.into_response(CacheStatus::Miss))
                        }
                        // Dropping the leader sends followers back to the lookup
                        Ok(Fetched::Streamed(response)) => Ok(response),
                        Err(e) => {
                            leader.complete(&Err(e.clone()));
                            Err(e)
                        }
                    };
                }
                Flight::Follower(follower) => match follower.wait().await {
                    Some(Ok(response)) => {
                        tracing::debug!(route = %route.name, fingerprint = %fingerprint, "Shared in-flight response");
                        metrics::record_cache_lookup("shared");
                        return Ok(response.into_response(CacheStatus::Shared));
                    }
                    Some(Err(e)) => return Err(e),
                    None => continue,
                },
            }
        }
    }

    async fn fetch_and_store(
        &self,
        route: &Route,
        downstream: &DownstreamRequest,
        fingerprint: &Fingerprint,
    ) -> Result<Response<Body>, GatewayError> {
        match self.fetch(route, downstream).await? {
            Fetched::Buffered(response) => {
                self.store(route, fingerprint, &response);
                Ok(response.into_response(CacheStatus::Miss))
            }
            Fetched::Streamed(response) => Ok(response),
        }
    }

    fn store(&self, route: &Route, fingerprint: &Fingerprint, response: &CachedResponse) {
        if !self.cache.put(fingerprint.clone(), response.clone(), route.cache_ttl) {
            tracing::debug!(
                route = %route.name,
                status = %response.status,
                "Response not cacheable, skipping store"
            );
        }
    }

    async fn fetch(&self, route: &Route, downstream: &DownstreamRequest) -> Result<Fetched, GatewayError> {
        let response = strip_response(self.engine.execute(route, downstream).await?);
        let limit = self.cache.config().max_body_bytes;

        let declared = response
            .headers()
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        let head = downstream.method == Method::HEAD;
        if !head && declared.is_some_and(|len| len > limit) {
            let mut response = response;
            response
                .headers_mut()
                .insert(crate::cache::X_CACHE, HeaderValue::from_static(CacheStatus::Miss.as_str()));
            return Ok(Fetched::Streamed(response));
        }

        let (parts, body) = response.into_parts();
        let body = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return Err(GatewayError::Internal(format!(
                    "buffering downstream response for route {}: {}",
                    route.name, e
                )))
            }
        };

        // A HEAD response declares the length of the body it omits
        let mut headers = parts.headers;
        if !head {
            headers.remove(header::CONTENT_LENGTH);
        }
        Ok(Fetched::Buffered(CachedResponse::new(parts.status, headers, body)))
    }

    async fn buffer_body(&self, parts: &Parts, body: Body) -> Result<Bytes, GatewayError> {
        let too_large = GatewayError::PayloadTooLarge {
            limit: self.max_body_size,
        };

        let declared = parts
            .headers
            .get(header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok());
        if declared.is_some_and(|len| len > self.max_body_size) {
            return Err(too_large);
        }

        match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(too_large),
            Err(e) => Err(GatewayError::internal(format!("reading request body: {}", e))),
        }
    }
}

/// Rewrite the inbound request for the route's downstream target.
fn build_downstream_request(
    route: &Route,
    captures: &Captures,
    parts: &Parts,
    body: Bytes,
    client: Option<IpAddr>,
) -> Result<DownstreamRequest, GatewayError> {
    let path = route.target.path.render(captures);
    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{}?{}", path, query),
        None => path,
    };

    let authority = route.target.authority();
    let uri = Uri::builder()
        .scheme(route.target.scheme.as_str())
        .authority(authority.as_str())
        .path_and_query(path_and_query)
        .build()
        .map_err(|e| GatewayError::internal(format!("building downstream uri for {}: {}", route.name, e)))?;

    let mut headers = outbound_headers(&parts.headers, &route.forward_headers);
    append_forwarded(&mut headers, client, parts.headers.get(header::HOST), "http");
    let host = HeaderValue::from_str(&authority).map_err(GatewayError::internal)?;
    headers.insert(header::HOST, host);

    Ok(DownstreamRequest {
        method: parts.method.clone(),
        uri,
        headers,
        body,
    })
}

fn strip_response(response: Response<Body>) -> Response<Body> {
    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    Response::from_parts(parts, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::http::StatusCode;

    use crate::cache::X_CACHE;
    use crate::config::{CacheConfig, GatewayConfig, RouteConfig};
    use crate::http::error::ErrorEnvelope;
    use crate::resilience::retries::tests::{ScriptedUpstream, Step};
    use crate::resilience::CircuitState;
    use crate::security::headers::{X_FORWARDED_FOR, X_FORWARDED_HOST};

    fn config(cache: CacheConfig) -> GatewayConfig {
        let mut users = RouteConfig::new("users", "/users/{id}", "api1", 8080, "/api/users/{id}");
        users.methods = vec!["GET".into(), "HEAD".into()];
        users.cache_ttl_secs = 10;

        let mut orders = RouteConfig::new("orders", "/orders/{*rest}", "api2", 9090, "/v2/{rest}");
        orders.retry_count = Some(1);
        orders.retry_base_delay_ms = Some(10);

        GatewayConfig {
            routes: vec![users, orders],
            cache,
            ..GatewayConfig::default()
        }
    }

    fn dispatcher_with(upstream: Arc<ScriptedUpstream>, cache: CacheConfig) -> Dispatcher {
        dispatcher_from(config(cache), upstream)
    }

    fn dispatcher_from(config: GatewayConfig, upstream: Arc<ScriptedUpstream>) -> Dispatcher {
        let routes = Arc::new(RouteTable::from_config(&config).unwrap());
        let breakers = Arc::new(CircuitBreakerRegistry::from_routes(&routes, Default::default()));
        let engine = ResiliencePolicyEngine::new(breakers, upstream);
        let cache = Arc::new(ResponseCache::new(config.cache.clone()));
        Dispatcher::new(routes, cache, engine, 64)
    }

    fn dispatcher(upstream: Arc<ScriptedUpstream>) -> Dispatcher {
        dispatcher_with(upstream, CacheConfig::default())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::HOST, "gateway.local")
            .body(Body::empty())
            .unwrap()
    }

    async fn body_of(response: Response<Body>) -> Bytes {
        axum::body::to_bytes(response.into_body(), 1024).await.unwrap()
    }

    #[tokio::test]
    async fn test_request_rewritten_for_downstream() {
        let upstream = ScriptedUpstream::always(Step::Status(200, "ok"));
        let dispatcher = dispatcher(upstream.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/orders/42/items?expand=true")
            .header(header::HOST, "gateway.local")
            .header(header::CONNECTION, "close")
            .header("x-tenant", "acme")
            .body(Body::from("{}"))
            .unwrap();
        let response = dispatcher
            .handle(request, Some("10.1.2.3".parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(X_CACHE).is_none());

        let calls = upstream.calls.lock().unwrap();
        let (_, sent) = &calls[0];
        assert_eq!(sent.method(), Method::POST);
        assert_eq!(sent.uri().to_string(), "http://api2:9090/v2/42/items?expand=true");
        assert_eq!(sent.headers()[header::HOST], "api2:9090");
        assert_eq!(sent.headers()["x-tenant"], "acme");
        assert_eq!(sent.headers()[X_FORWARDED_FOR], "10.1.2.3");
        assert_eq!(sent.headers()[X_FORWARDED_HOST], "gateway.local");
        assert!(sent.headers().get(header::CONNECTION).is_none());
    }

    #[tokio::test]
    async fn test_unmatched_request_is_route_not_found() {
        let upstream = ScriptedUpstream::new([]);
        let dispatcher = dispatcher(upstream.clone());

        let err = dispatcher.handle(get("/missing"), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::RouteNotFound { .. }));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        // Method not accepted by the only matching pattern
        let delete = Request::builder()
            .method(Method::DELETE)
            .uri("/users/1")
            .body(Body::empty())
            .unwrap();
        assert!(matches!(
            dispatcher.handle(delete, None).await,
            Err(GatewayError::RouteNotFound { .. })
        ));
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let upstream = ScriptedUpstream::new([]);
        let dispatcher = dispatcher(upstream.clone());

        let request = Request::builder()
            .method(Method::POST)
            .uri("/orders/1")
            .body(Body::from(vec![b'x'; 65]))
            .unwrap();
        let err = dispatcher.handle(request, None).await.unwrap_err();
        assert!(matches!(err, GatewayError::PayloadTooLarge { limit: 64 }));
        assert_eq!(upstream.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_until_ttl_expires() {
        let upstream = ScriptedUpstream::new([Step::Status(200, "first"), Step::Status(200, "second")]);
        let dispatcher = dispatcher(upstream.clone());

        let a = dispatcher.handle(get("/users/7"), None).await.unwrap();
        assert_eq!(a.headers()[X_CACHE], "MISS");
        assert_eq!(body_of(a).await, "first");

        tokio::time::advance(Duration::from_secs(5)).await;
        let b = dispatcher.handle(get("/users/7"), None).await.unwrap();
        assert_eq!(b.headers()[X_CACHE], "HIT");
        assert_eq!(b.headers()[header::CONTENT_TYPE], "text/plain");
        assert_eq!(body_of(b).await, "first");
        assert_eq!(upstream.call_count(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        let c = dispatcher.handle(get("/users/7"), None).await.unwrap();
        assert_eq!(c.headers()[X_CACHE], "MISS");
        assert_eq!(body_of(c).await, "second");
        assert_eq!(upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn test_error_responses_not_cached() {
        let upstream = ScriptedUpstream::new([Step::Status(404, "nope"), Step::Status(200, "found")]);
        let dispatcher = dispatcher(upstream.clone());

        let first = dispatcher.handle(get("/users/1"), None).await.unwrap();
        assert_eq!(first.status(), StatusCode::NOT_FOUND);

        let second = dispatcher.handle(get("/users/1"), None).await.unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(upstream.call_count(), 2);
    }

    #[tokio::test]
    async fn test_downstream_failure_propagates() {
        let upstream = ScriptedUpstream::always(Step::Refuse);
        let dispatcher = dispatcher(upstream.clone());

        let err = dispatcher.handle(get("/orders/1"), None).await.unwrap_err();
        assert!(matches!(err, GatewayError::DownstreamUnavailable { .. }));
        assert_eq!(upstream.call_count(), 2, "one retry configured for the route");

        let envelope = err.envelope();
        assert_eq!(envelope, ErrorEnvelope::new(StatusCode::SERVICE_UNAVAILABLE, "Downstream service unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight_collapses_concurrent_misses() {
        let upstream = ScriptedUpstream::new([Step::Slow(200, "only", Duration::from_millis(50))]);
        let dispatcher = dispatcher_with(
            upstream.clone(),
            CacheConfig {
                single_flight: true,
                ..CacheConfig::default()
            },
        );

        let (a, b) = tokio::join!(
            dispatcher.handle(get("/users/3"), None),
            dispatcher.handle(get("/users/3"), None)
        );
        let (a, b) = (a.unwrap(), b.unwrap());

        let mut statuses = vec![
            a.headers()[X_CACHE].to_str().unwrap().to_string(),
            b.headers()[X_CACHE].to_str().unwrap().to_string(),
        ];
        statuses.sort();
        assert_eq!(statuses, ["MISS", "SHARED"]);
        assert_eq!(body_of(a).await, "only");
        assert_eq!(body_of(b).await, "only");
        assert_eq!(upstream.call_count(), 1);
    }

    #[tokio::test]
    async fn test_head_keeps_downstream_content_length() {
        let upstream = ScriptedUpstream::new([Step::Declared(200, 17)]);
        let dispatcher = dispatcher(upstream.clone());
        let head = || {
            Request::builder()
                .method(Method::HEAD)
                .uri("/users/5")
                .body(Body::empty())
                .unwrap()
        };

        let miss = dispatcher.handle(head(), None).await.unwrap();
        assert_eq!(miss.headers()[X_CACHE], "MISS");
        assert_eq!(miss.headers()[header::CONTENT_LENGTH], "17");

        let hit = dispatcher.handle(head(), None).await.unwrap();
        assert_eq!(hit.headers()[X_CACHE], "HIT");
        assert_eq!(hit.headers()[header::CONTENT_LENGTH], "17");
        assert!(body_of(hit).await.is_empty());
        assert_eq!(upstream.call_count(), 1);
        assert_eq!(upstream.calls.lock().unwrap()[0].1.method(), Method::HEAD);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_probe_frees_half_open_slot() {
        let mut flaky = RouteConfig::new("flaky", "/flaky", "api3", 7070, "/flaky");
        flaky.breaker_threshold = Some(1);
        flaky.breaker_open_secs = Some(30);
        flaky.retry_count = Some(0);
        let config = GatewayConfig {
            routes: vec![flaky],
            ..GatewayConfig::default()
        };
        let upstream = ScriptedUpstream::new([Step::Refuse, Step::Hang, Step::Status(200, "recovered")]);
        let dispatcher = dispatcher_from(config, upstream.clone());
        let target = "http://api3:7070";

        assert!(dispatcher.handle(get("/flaky"), None).await.is_err());
        assert_eq!(dispatcher.breakers().state(target), Some(CircuitState::Open));

        tokio::time::advance(Duration::from_secs(30)).await;
        // The client goes away while the probe is in flight
        let abandoned = tokio::time::timeout(Duration::from_millis(100), dispatcher.handle(get("/flaky"), None)).await;
        assert!(abandoned.is_err());
        assert_eq!(upstream.call_count(), 2);
        assert_eq!(dispatcher.breakers().state(target), Some(CircuitState::HalfOpen));

        let response = dispatcher.handle(get("/flaky"), None).await.unwrap();
        assert_eq!(body_of(response).await, "recovered");
        assert_eq!(upstream.call_count(), 3);
        assert_eq!(dispatcher.breakers().state(target), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_takes_over_when_leader_is_cancelled() {
        let upstream = ScriptedUpstream::new([Step::Hang, Step::Status(200, "second")]);
        let dispatcher = dispatcher_with(
            upstream.clone(),
            CacheConfig {
                single_flight: true,
                ..CacheConfig::default()
            },
        );

        let leader = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.handle(get("/users/9"), None).await }
        });
        while upstream.call_count() == 0 {
            tokio::task::yield_now().await;
        }
        let follower = tokio::spawn({
            let dispatcher = dispatcher.clone();
            async move { dispatcher.handle(get("/users/9"), None).await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.cache().stats().in_flight, 1);

        leader.abort();
        assert!(leader.await.unwrap_err().is_cancelled());

        let response = follower.await.unwrap().unwrap();
        assert_eq!(response.headers()[X_CACHE], "MISS");
        assert_eq!(body_of(response).await, "second");
        assert_eq!(upstream.call_count(), 2);
        assert_eq!(dispatcher.cache().stats().in_flight, 0);
        let again = dispatcher.handle(get("/users/9"), None).await.unwrap();
        assert_eq!(again.headers()[X_CACHE], "HIT");
        assert_eq!(upstream.call_count(), 2);
    }
}
