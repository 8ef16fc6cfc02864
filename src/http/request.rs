use http::header::{IF_MODIFIED_SINCE, IF_NONE_MATCH};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};

use super::headers::entity_tags;
use super::response::HttpResponse;
use super::uri::normalize_uri;

/// Identity of the credentials a request was sent with.
///
/// Only the identifier takes part in caching, as the value recorded for the
/// synthetic `Authorization` Vary entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Challenge {
    identifier: String,
}

impl Challenge {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }
}

/// An outgoing request as seen by the cache. Never mutated once built.
#[derive(Debug, Clone)]
pub struct CacheRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    challenge: Option<Challenge>,
}

impl CacheRequest {
    pub fn builder(method: Method, uri: Uri) -> CacheRequestBuilder {
        CacheRequestBuilder::new(method, uri)
    }

    pub fn get(uri: Uri) -> Self {
        Self::builder(Method::GET, uri).build()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn normalized_uri(&self) -> Uri {
        normalize_uri(&self.uri)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    /// First value of `name` as text, if present and valid UTF-8.
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// Entity tags listed in `If-None-Match`, with weak prefixes removed.
    pub fn if_none_match(&self) -> Vec<String> {
        entity_tags(&self.headers, IF_NONE_MATCH)
    }

    /// Returns a copy of this request with `name` set to `value`, replacing
    /// any previous values.
    pub fn with_header(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut next = self.clone();
        next.headers.insert(name, value);
        next
    }

    /// Returns a conditional copy of this request for revalidating `cached`.
    ///
    /// Prefers `If-None-Match` from the cached `ETag` and falls back to
    /// `If-Modified-Since` from `Last-Modified`. Without either validator the
    /// request is returned unchanged.
    pub fn with_conditionals_from(&self, cached: &HttpResponse) -> Self {
        if let Some(etag) = cached.headers().get(http::header::ETAG) {
            return self.with_header(IF_NONE_MATCH, etag.clone());
        }
        if let Some(last_modified) = cached.headers().get(http::header::LAST_MODIFIED) {
            return self.with_header(IF_MODIFIED_SINCE, last_modified.clone());
        }
        self.clone()
    }
}

/// Builder-style construction of a [`CacheRequest`].
#[derive(Debug)]
pub struct CacheRequestBuilder {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    challenge: Option<Challenge>,
}

impl CacheRequestBuilder {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            challenge: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn challenge(mut self, challenge: Challenge) -> Self {
        self.challenge = Some(challenge);
        self
    }

    pub fn build(self) -> CacheRequest {
        CacheRequest {
            method: self.method,
            uri: self.uri,
            headers: self.headers,
            challenge: self.challenge,
        }
    }
}
