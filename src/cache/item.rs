use std::time::{Duration, SystemTime};

use crate::http::HttpResponse;
use crate::http::cache_control::freshness_lifetime;

/// A stored response and the moment it was stored.
///
/// Freshness is derived from the headers and the timestamp on every call;
/// nothing about staleness is cached on the item.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheItem {
    response: HttpResponse,
    cached_at: SystemTime,
}

impl CacheItem {
    pub fn new(response: HttpResponse) -> Self {
        Self::with_timestamp(response, SystemTime::now())
    }

    pub fn with_timestamp(response: HttpResponse, cached_at: SystemTime) -> Self {
        Self {
            response,
            cached_at,
        }
    }

    pub fn response(&self) -> &HttpResponse {
        &self.response
    }

    pub fn into_response(self) -> HttpResponse {
        self.response
    }

    pub fn cached_at(&self) -> SystemTime {
        self.cached_at
    }

    /// Current age: how far the response's `Date` lagged the store time plus
    /// the time spent in storage.
    ///
    /// The `Age` header is not consulted. Revalidation rewrites it to the
    /// distance from the first stored `Date`, which would otherwise make a
    /// refreshed entry stale again immediately.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        let resident = now.duration_since(self.cached_at).unwrap_or(Duration::ZERO);
        let apparent = self
            .response
            .date()
            .and_then(|date| self.cached_at.duration_since(date).ok())
            .unwrap_or(Duration::ZERO);
        apparent.saturating_add(resident)
    }

    pub fn age(&self) -> Duration {
        self.age_at(SystemTime::now())
    }

    pub fn freshness_lifetime(&self) -> Duration {
        freshness_lifetime(self.response.headers(), self.cached_at)
    }

    pub fn is_stale_at(&self, now: SystemTime) -> bool {
        self.age_at(now) >= self.freshness_lifetime()
    }

    pub fn is_stale(&self) -> bool {
        self.is_stale_at(SystemTime::now())
    }
}
