use std::time::SystemTime;

use bytes::Bytes;
use http::header::{DATE, ETAG, LAST_MODIFIED};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use super::cache_control::header_date;

/// A response as stored and returned by the cache. Header rewrites produce a
/// new value.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Option<Bytes>) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn builder(status: StatusCode) -> HttpResponseBuilder {
        HttpResponseBuilder::new(status)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Option<Bytes>) {
        (self.status, self.headers, self.body)
    }

    pub fn etag(&self) -> Option<&str> {
        self.headers.get(ETAG)?.to_str().ok().map(str::trim)
    }

    pub fn date(&self) -> Option<SystemTime> {
        header_date(&self.headers, DATE)
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        header_date(&self.headers, LAST_MODIFIED)
    }

    /// Same status and body with `headers` in place of the current ones.
    pub fn with_headers(&self, headers: HeaderMap) -> Self {
        Self {
            status: self.status,
            headers,
            body: self.body.clone(),
        }
    }

    /// Same status and headers without a body, as sent in answer to `HEAD`.
    pub fn without_body(&self) -> Self {
        Self {
            status: self.status,
            headers: self.headers.clone(),
            body: None,
        }
    }

    /// A body-less `304 Not Modified` carrying this response's headers.
    pub fn not_modified(&self) -> Self {
        Self {
            status: StatusCode::NOT_MODIFIED,
            headers: self.headers.clone(),
            body: None,
        }
    }
}

#[derive(Debug)]
pub struct HttpResponseBuilder {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
}

impl HttpResponseBuilder {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn build(self) -> HttpResponse {
        HttpResponse::new(self.status, self.headers, self.body)
    }
}
