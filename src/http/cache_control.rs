use std::time::{Duration, SystemTime};

use http::header::{CACHE_CONTROL, DATE, EXPIRES, PRAGMA, VARY};
use http::{HeaderMap, Method, StatusCode};

#[derive(Debug, Clone, Default)]
pub struct CacheControl {
    pub public: bool,
    pub private: bool,
    pub no_cache: bool,
    pub no_store: bool,
    pub max_age: Option<Duration>,
    pub s_maxage: Option<Duration>,
    pub must_revalidate: bool,
}

pub fn parse_cache_control(headers: &HeaderMap) -> CacheControl {
    let mut cc = CacheControl::default();

    for value in headers.get_all(CACHE_CONTROL) {
        if let Ok(s) = value.to_str() {
            for part in s.split(',') {
                let part = part.trim();
                if part.eq_ignore_ascii_case("public") {
                    cc.public = true;
                } else if part.eq_ignore_ascii_case("private") {
                    cc.private = true;
                } else if part.eq_ignore_ascii_case("no-cache") {
                    cc.no_cache = true;
                } else if part.eq_ignore_ascii_case("no-store") {
                    cc.no_store = true;
                } else if part.eq_ignore_ascii_case("must-revalidate") {
                    cc.must_revalidate = true;
                } else if let Some(secs) = directive_seconds(part, "max-age") {
                    cc.max_age = Some(secs);
                } else if let Some(secs) = directive_seconds(part, "s-maxage") {
                    cc.s_maxage = Some(secs);
                }
            }
        }
    }
    cc
}

fn directive_seconds(part: &str, name: &str) -> Option<Duration> {
    let (directive, value) = part.split_once('=')?;
    if !directive.trim().eq_ignore_ascii_case(name) {
        return None;
    }
    let value = value.trim().trim_matches('"');
    value.parse::<u64>().ok().map(Duration::from_secs)
}

/// Whether a request may be answered from, or stored into, the cache.
pub fn is_cacheable_request(method: &Method, headers: &HeaderMap) -> bool {
    if method != Method::GET && method != Method::HEAD {
        return false;
    }
    !parse_cache_control(headers).no_store
}

/// Whether the caller asked for an end-to-end reload.
pub fn request_wants_reload(headers: &HeaderMap) -> bool {
    if parse_cache_control(headers).no_cache {
        return true;
    }
    headers.get_all(PRAGMA).iter().any(|value| {
        value
            .to_str()
            .map(|s| {
                s.split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("no-cache"))
            })
            .unwrap_or(false)
    })
}

pub fn is_safe_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

pub fn is_cacheable(method: &Method, status: StatusCode, headers: &HeaderMap) -> bool {
    // Only cache GET and HEAD
    if method != Method::GET && method != Method::HEAD {
        return false;
    }

    // Only cache specific status codes (RFC 7231 / 9110)
    if !matches!(
        status,
        StatusCode::OK
            | StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::NON_AUTHORITATIVE_INFORMATION
            | StatusCode::NO_CONTENT
            | StatusCode::RESET_CONTENT
            | StatusCode::PARTIAL_CONTENT
    ) {
        return false;
    }

    if varies_on_everything(headers) {
        return false;
    }

    let cc = parse_cache_control(headers);

    // no-cache responses must be revalidated on every use, which this cache
    // does not model, so they are treated like no-store.
    if cc.no_store || cc.no_cache || cc.private {
        return false;
    }

    if cc.max_age.is_some() || cc.s_maxage.is_some() || cc.public {
        return true;
    }

    headers.contains_key(EXPIRES)
}

fn varies_on_everything(headers: &HeaderMap) -> bool {
    headers.get_all(VARY).iter().any(|value| {
        value
            .to_str()
            .map(|s| s.split(',').any(|name| name.trim() == "*"))
            .unwrap_or(false)
    })
}

/// Freshness lifetime from `max-age`, else `Expires - Date`, else zero.
///
/// `received_at` stands in for a missing `Date` header.
pub fn freshness_lifetime(headers: &HeaderMap, received_at: SystemTime) -> Duration {
    let cc = parse_cache_control(headers);
    if let Some(max_age) = cc.max_age {
        return max_age;
    }

    if let Some(expires) = header_date(headers, EXPIRES) {
        let date = header_date(headers, DATE).unwrap_or(received_at);
        return expires.duration_since(date).unwrap_or(Duration::ZERO);
    }

    Duration::ZERO
}

pub fn header_date(headers: &HeaderMap, name: http::header::HeaderName) -> Option<SystemTime> {
    let value = headers.get(name)?.to_str().ok()?;
    httpdate::parse_http_date(value.trim()).ok()
}
