//! TTL-bounded response cache with LRU eviction.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::{self, Instant};

use crate::cache::fingerprint::Fingerprint;
use crate::cache::single_flight::{Flight, SingleFlight};
use crate::config::CacheConfig;
use crate::observability::metrics;

/// Header reporting how a cacheable response was served.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Cache status for responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Served from a concurrent identical request's downstream call.
    Shared,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
            CacheStatus::Shared => "SHARED",
        }
    }
}

/// A fully buffered downstream response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub content_type: Option<HeaderValue>,
}

impl CachedResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        let content_type = headers.get(header::CONTENT_TYPE).cloned();
        Self {
            status,
            headers,
            body,
            content_type,
        }
    }

    /// Approximate memory footprint used for the byte bound.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.as_str().len() + v.len())
                .sum::<usize>()
    }

    pub fn into_response(self, status: CacheStatus) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static(status.as_str()));
        response
    }
}

#[derive(Debug)]
struct CacheEntry {
    response: CachedResponse,
    expires_at: Instant,
    last_access: u64,
    size: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<Fingerprint, CacheEntry>,
    /// last_access tick → key, oldest first.
    recency: BTreeMap<u64, Fingerprint>,
    tick: u64,
    bytes: usize,
}

impl CacheState {
    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn remove(&mut self, key: &Fingerprint) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.last_access);
        self.bytes -= entry.size;
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<Fingerprint> = self
            .entries
            .iter()
            .filter(|(_, e)| e.expires_at <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        expired.len()
    }

    fn evict_lru(&mut self) -> bool {
        let Some((_, key)) = self.recency.pop_first() else {
            return false;
        };
        if let Some(entry) = self.entries.remove(&key) {
            self.bytes -= entry.size;
        }
        true
    }
}

/// Counters exposed to the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub hits: u64,
    pub misses: u64,
    pub in_flight: usize,
}

/// Response cache keyed by request fingerprint.
///
/// Owns its state exclusively; callers only see `get`/`put` and friends.
#[derive(Debug)]
pub struct ResponseCache {
    state: Mutex<CacheState>,
    config: CacheConfig,
    flights: SingleFlight,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            config,
            flights: SingleFlight::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn single_flight_enabled(&self) -> bool {
        self.config.single_flight
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up a fresh entry. Expired entries are removed and count as a miss.
    pub fn get(&self, key: &Fingerprint) -> Option<CachedResponse> {
        let now = Instant::now();
        let mut state = self.lock();

        let expired = match state.entries.get(key) {
            Some(entry) => entry.expires_at <= now,
            None => {
                drop(state);
                self.record(false);
                return None;
            }
        };
        if expired {
            state.remove(key);
            drop(state);
            tracing::debug!(fingerprint = %key, "Cache entry expired");
            self.record(false);
            return None;
        }

        let tick = state.next_tick();
        let (old_tick, response) = match state.entries.get_mut(key) {
            Some(entry) => {
                let old = entry.last_access;
                entry.last_access = tick;
                (old, entry.response.clone())
            }
            None => return None,
        };
        state.recency.remove(&old_tick);
        state.recency.insert(tick, key.clone());
        drop(state);

        self.record(true);
        Some(response)
    }

    /// Fresh entry for `key` without touching recency or hit counters.
    pub fn peek(&self, key: &Fingerprint) -> Option<CachedResponse> {
        let now = Instant::now();
        self.lock()
            .entries
            .get(key)
            .filter(|entry| entry.expires_at > now)
            .map(|entry| entry.response.clone())
    }

    /// True if this response may be stored at all.
    pub fn is_storable(&self, response: &CachedResponse) -> bool {
        if !response.status.is_success() || response.body.len() > self.config.max_body_bytes {
            return false;
        }
        if response.headers.contains_key(header::SET_COOKIE) {
            return false;
        }
        let cache_control = response
            .headers
            .get(header::CACHE_CONTROL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        !(cache_control.contains("no-store") || cache_control.contains("private"))
    }

    /// Store `response` until now + `ttl`. Returns true if it was stored.
    pub fn put(&self, key: Fingerprint, response: CachedResponse, ttl: Duration) -> bool {
        if !self.config.enabled || ttl.is_zero() || !self.is_storable(&response) {
            return false;
        }
        let size = response.size();
        if self.config.max_bytes > 0 && size > self.config.max_bytes {
            return false;
        }

        let now = Instant::now();
        let mut state = self.lock();
        state.remove(&key);

        let tick = state.next_tick();
        state.recency.insert(tick, key.clone());
        state.bytes += size;
        state.entries.insert(
            key.clone(),
            CacheEntry {
                response,
                expires_at: now + ttl,
                last_access: tick,
                size,
            },
        );

        if self.over_capacity(&state) {
            // Expiry takes precedence over recency.
            state.purge_expired(now);
        }
        let mut evicted = 0;
        while self.over_capacity(&state) && state.evict_lru() {
            evicted += 1;
        }
        let entries = state.entries.len();
        drop(state);

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted least recently used cache entries");
        }
        tracing::debug!(fingerprint = %key, ttl = ?ttl, "Cached response");
        metrics::record_cache_size(entries);
        true
    }

    fn over_capacity(&self, state: &CacheState) -> bool {
        (self.config.max_entries > 0 && state.entries.len() > self.config.max_entries)
            || (self.config.max_bytes > 0 && state.bytes > self.config.max_bytes)
    }

    pub fn remove(&self, key: &Fingerprint) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let mut state = self.lock();
        let removed = state.purge_expired(Instant::now());
        let entries = state.entries.len();
        drop(state);
        metrics::record_cache_size(entries);
        removed
    }

    /// Become leader or follower for a miss on `key`.
    pub fn join_flight(&self, key: &Fingerprint) -> Flight {
        self.flights.join(key)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, bytes) = {
            let state = self.lock();
            (state.entries.len(), state.bytes)
        };
        CacheStats {
            entries,
            bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            in_flight: self.flights.in_flight(),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_cache_lookup(if hit { "hit" } else { "miss" });
    }

    /// Periodically remove expired entries until shutdown.
    pub async fn run_sweeper(&self, mut shutdown: broadcast::Receiver<()>) {
        if self.config.sweep_interval_secs == 0 {
            tracing::info!("Cache sweeper disabled");
            return;
        }

        let mut ticker = time::interval(Duration::from_secs(self.config.sweep_interval_secs));
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let removed = self.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired cache entries");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
