//! Collapsing of concurrent cache misses.
//!
//! The first caller for a fingerprint leads and performs the downstream work;
//! callers arriving while it runs follow and receive the leader's result.
//! A leader that is dropped without completing releases its followers, who
//! then retry the lookup themselves.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::watch;

use crate::cache::fingerprint::Fingerprint;
use crate::cache::response::CachedResponse;
use crate::http::error::GatewayError;

/// Result shared from a leader to its followers.
pub type FlightResult = Result<CachedResponse, GatewayError>;

type FlightMap = DashMap<Fingerprint, (u64, watch::Receiver<Option<FlightResult>>)>;

/// Registry of in-flight downstream fetches keyed by fingerprint.
#[derive(Debug, Default)]
pub struct SingleFlight {
    flights: Arc<FlightMap>,
    next_id: AtomicU64,
}

/// Role assigned by [`SingleFlight::join`].
#[derive(Debug)]
pub enum Flight {
    Leader(FlightLeader),
    Follower(FlightFollower),
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, key: &Fingerprint) -> Flight {
        match self.flights.entry(key.clone()) {
            Entry::Occupied(entry) => Flight::Follower(FlightFollower {
                rx: entry.get().1.clone(),
            }),
            Entry::Vacant(entry) => {
                let (tx, rx) = watch::channel(None);
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entry.insert((id, rx));
                Flight::Leader(FlightLeader {
                    flights: Arc::clone(&self.flights),
                    key: key.clone(),
                    id,
                    tx,
                })
            }
        }
    }

    /// Number of fetches currently in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }
}

/// The caller responsible for the downstream fetch.
#[derive(Debug)]
pub struct FlightLeader {
    flights: Arc<FlightMap>,
    key: Fingerprint,
    id: u64,
    tx: watch::Sender<Option<FlightResult>>,
}

impl FlightLeader {
    /// Publish the result to every follower.
    pub fn complete(self, result: &FlightResult) {
        // No receivers left is fine; the map entry still holds one.
        let _ = self.tx.send(Some(result.clone()));
    }
}

impl Drop for FlightLeader {
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, (id, _)| *id == self.id);
    }
}

/// A caller waiting on someone else's fetch.
#[derive(Debug)]
pub struct FlightFollower {
    rx: watch::Receiver<Option<FlightResult>>,
}

impl FlightFollower {
    /// Wait for the leader. `None` means the leader gave up without a result.
    pub async fn wait(mut self) -> Option<FlightResult> {
        let result = match self.rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        result
    }
}
