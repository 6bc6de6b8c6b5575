//! Request fingerprints used as cache keys.

use std::fmt;

use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use crate::routing::matcher::normalize_path;

/// Identity of a cacheable request: method, normalized path, sorted query
/// and the values of the designated vary headers.
///
/// Components are kept apart rather than joined into one string, so no
/// choice of path, query or header bytes can make two requests share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    method: Method,
    path: String,
    query: Vec<String>,
    vary: Vec<(HeaderName, Vec<HeaderValue>)>,
}

impl Fingerprint {
    pub fn new(method: &Method, uri: &Uri, headers: &HeaderMap, vary: &[HeaderName]) -> Self {
        let mut query: Vec<String> = uri
            .query()
            .map(|q| q.split('&').filter(|p| !p.is_empty()).map(str::to_string).collect())
            .unwrap_or_default();
        query.sort_unstable();

        let vary = vary
            .iter()
            .map(|name| (name.clone(), headers.get_all(name).iter().cloned().collect()))
            .collect();

        Self {
            method: method.clone(),
            path: normalize_path(uri.path()),
            query,
            vary,
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)?;
        if !self.query.is_empty() {
            write!(f, "?{}", self.query.join("&"))?;
        }
        for (name, values) in &self.vary {
            write!(f, " {}={:?}", name, values)?;
        }
        Ok(())
    }
}
