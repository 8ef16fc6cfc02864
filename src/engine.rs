//! The request-level caching protocol: lookup, revalidation, merge and
//! invalidation on top of a [`CacheStorage`] and a [`ResponseResolver`].

use std::io;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use http::header::DATE;
use http::{HeaderValue, Method, StatusCode};
use tracing::{debug, trace, warn};

use crate::cache::{CacheItem, CacheStorage};
use crate::error::CacheError;
use crate::http::cache_control::{
    is_cacheable, is_cacheable_request, is_safe_method, request_wants_reload,
};
use crate::http::headers::{etags_match, merge_revalidated, revalidation_age, with_stale_warning};
use crate::http::{CacheRequest, HttpResponse};
use crate::metrics::{self, LookupResult, RevalidationResult};

/// Performs the network exchange for a request the cache cannot answer.
///
/// Timeouts and retries belong to the implementation; the cache awaits
/// whatever it returns.
#[async_trait]
pub trait ResponseResolver: Send + Sync {
    async fn resolve(&self, request: &CacheRequest) -> io::Result<HttpResponse>;
}

#[derive(Clone)]
pub struct HttpCache {
    storage: Arc<dyn CacheStorage>,
    resolver: Arc<dyn ResponseResolver>,
}

impl HttpCache {
    pub fn new(storage: Arc<dyn CacheStorage>, resolver: Arc<dyn ResponseResolver>) -> Self {
        Self { storage, resolver }
    }

    pub fn storage(&self) -> &Arc<dyn CacheStorage> {
        &self.storage
    }

    /// Answers `request` from the cache where HTTP caching rules allow it,
    /// resolving and storing otherwise.
    pub async fn do_cached_request(
        &self,
        request: &CacheRequest,
    ) -> Result<HttpResponse, CacheError> {
        self.execute(request, false).await
    }

    /// Like [`HttpCache::do_cached_request`] but always goes to the resolver,
    /// storing the result when it is cacheable.
    pub async fn do_cached_request_forced(
        &self,
        request: &CacheRequest,
    ) -> Result<HttpResponse, CacheError> {
        self.execute(request, true).await
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.storage
            .clear()
            .await
            .map_err(|err| CacheError::storage("clear", err))
    }

    async fn execute(
        &self,
        request: &CacheRequest,
        force: bool,
    ) -> Result<HttpResponse, CacheError> {
        let response = if is_cacheable_request(request.method(), request.headers()) {
            self.get_from_cache(request, force).await?
        } else {
            if !is_safe_method(request.method()) {
                self.invalidate_uri(request).await;
            }
            self.resolve(request).await?
        };

        if request.method() == Method::HEAD && response.body().is_some() {
            return Ok(response.without_body());
        }
        Ok(response)
    }

    async fn get_from_cache(
        &self,
        request: &CacheRequest,
        force: bool,
    ) -> Result<HttpResponse, CacheError> {
        if force || request_wants_reload(request.headers()) {
            trace!(uri = %request.uri(), force, "unconditional resolve");
            metrics::record_cache_lookup(LookupResult::Miss);
            return self.handle_resolve(request, request, None).await;
        }

        let lookup = match self.storage.get_for_request(request).await {
            Ok(lookup) => lookup,
            Err(err) => {
                warn!(error = %err, uri = %request.uri(), "cache lookup failed; treating as miss");
                None
            }
        };

        let Some((_key, item)) = lookup else {
            debug!(uri = %request.uri(), "cache miss");
            metrics::record_cache_lookup(LookupResult::Miss);
            return self.handle_resolve(request, request, None).await;
        };

        if item.is_stale() {
            debug!(
                uri = %request.uri(),
                age = item.age().as_secs(),
                "cache entry stale; revalidating"
            );
            metrics::record_cache_lookup(LookupResult::Stale);
            let conditional = request.with_conditionals_from(item.response());
            return self.handle_resolve(request, &conditional, Some(item)).await;
        }

        debug!(uri = %request.uri(), "cache hit");
        metrics::record_cache_lookup(LookupResult::Hit);
        Ok(rewrite_not_modified(request, item.response()))
    }

    /// Resolves `outgoing` and reconciles the result with `prior`.
    ///
    /// `request` is the caller's request and determines the storage key;
    /// `outgoing` may carry revalidation conditionals on top of it.
    async fn handle_resolve(
        &self,
        request: &CacheRequest,
        outgoing: &CacheRequest,
        prior: Option<CacheItem>,
    ) -> Result<HttpResponse, CacheError> {
        let resolved = match self.resolver.resolve(outgoing).await {
            Ok(resolved) => resolved,
            Err(err) => {
                let Some(item) = prior else {
                    return Err(transport_error(request, err));
                };
                warn!(
                    error = %err,
                    uri = %request.uri(),
                    "revalidation failed; serving stale response"
                );
                metrics::record_cache_revalidation(RevalidationResult::Failed);
                return Ok(with_stale_warning(item.response()));
            }
        };

        if request.method() == Method::HEAD {
            return match prior {
                Some(item) => Ok(self.merge_and_store(request, &item, &resolved).await),
                None => Ok(resolved),
            };
        }

        if is_cacheable(request.method(), resolved.status(), resolved.headers()) {
            if prior.is_some() {
                metrics::record_cache_revalidation(RevalidationResult::Updated);
            }
            return Ok(self.store(request, resolved).await);
        }

        match prior {
            Some(item) if resolved.status() == StatusCode::NOT_MODIFIED => {
                trace!(uri = %request.uri(), "not modified; refreshing stored headers");
                metrics::record_cache_revalidation(RevalidationResult::NotModified);
                Ok(self.merge_and_store(request, &item, &resolved).await)
            }
            Some(item) if resolved.status() == StatusCode::OK => {
                debug!(uri = %request.uri(), "uncacheable replacement; invalidating stored entry");
                if let Err(err) = self.storage.invalidate_item(request.uri(), &item).await {
                    warn!(
                        error = %err,
                        uri = %request.uri(),
                        "failed to invalidate replaced entry"
                    );
                }
                metrics::record_cache_invalidation();
                Ok(resolved)
            }
            _ => Ok(resolved),
        }
    }

    async fn resolve(&self, request: &CacheRequest) -> Result<HttpResponse, CacheError> {
        self.resolver
            .resolve(request)
            .await
            .map_err(|err| transport_error(request, err))
    }

    async fn store(&self, request: &CacheRequest, response: HttpResponse) -> HttpResponse {
        match self.storage.insert(request, response.clone()).await {
            Ok(stored) => {
                metrics::record_cache_store();
                stored
            }
            Err(err) => {
                warn!(error = %err, uri = %request.uri(), "failed to store response");
                metrics::record_cache_store_error();
                response
            }
        }
    }

    /// Refreshes the stored headers of `item` from `resolved`, keeping the
    /// stored body, and writes the result back.
    async fn merge_and_store(
        &self,
        request: &CacheRequest,
        item: &CacheItem,
        resolved: &HttpResponse,
    ) -> HttpResponse {
        let cached = item.response();
        let now = SystemTime::now();
        let age = revalidation_age(resolved, cached, item.cached_at(), now);
        let mut headers = merge_revalidated(cached.headers(), resolved.headers(), age);
        if resolved.date().is_none()
            && let Ok(date) = HeaderValue::from_str(&httpdate::fmt_http_date(now))
        {
            // An undated revalidation vouches for the entry as of now.
            headers.insert(DATE, date);
        }
        let merged = cached.with_headers(headers);
        match self.storage.update(request, merged.clone()).await {
            Ok(stored) => {
                metrics::record_cache_store();
                stored
            }
            Err(err) => {
                warn!(error = %err, uri = %request.uri(), "failed to store revalidated response");
                metrics::record_cache_store_error();
                merged
            }
        }
    }

    async fn invalidate_uri(&self, request: &CacheRequest) {
        debug!(
            method = %request.method(),
            uri = %request.uri(),
            "unsafe method; invalidating uri"
        );
        if let Err(err) = self.storage.invalidate_uri(request.uri()).await {
            warn!(error = %err, uri = %request.uri(), "failed to invalidate uri");
            return;
        }
        metrics::record_cache_invalidation();
    }
}

/// Answers a `GET` whose `If-None-Match` already names the cached entity with
/// a body-less `304`. A bare `*` does not count as naming it.
fn rewrite_not_modified(request: &CacheRequest, cached: &HttpResponse) -> HttpResponse {
    if request.method() != Method::GET {
        return cached.clone();
    }
    let Some(etag) = cached.etag() else {
        return cached.clone();
    };
    let named = request
        .if_none_match()
        .iter()
        .filter(|tag| tag.as_str() != "*")
        .any(|tag| etags_match(tag, etag));
    if named {
        cached.not_modified()
    } else {
        cached.clone()
    }
}

fn transport_error(request: &CacheRequest, source: io::Error) -> CacheError {
    CacheError::Transport {
        method: request.method().clone(),
        uri: request.uri().clone(),
        source,
    }
}
