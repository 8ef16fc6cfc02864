use std::time::{Duration, SystemTime};

use http::header::{
    AGE, CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, CONTENT_LOCATION, CONTENT_RANGE,
    CONTENT_TYPE, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION, TE, TRAILER, TRANSFER_ENCODING,
    UPGRADE, WARNING,
};
use http::{HeaderMap, HeaderName, HeaderValue};

use super::response::HttpResponse;

const KEEP_ALIVE: &str = "keep-alive";
const CONTENT_MD5: &str = "content-md5";

const STALE_WARNING: &str = "110 - \"Response is Stale\"";
const REVALIDATION_FAILED_WARNING: &str = "111 - \"Revalidation Failed\"";

/// Headers a revalidation response must not copy onto the stored response:
/// hop-by-hop fields and the framing of the stored representation.
const UNMODIFIABLE_HEADERS: [HeaderName; 13] = [
    CONNECTION,
    PROXY_AUTHENTICATE,
    PROXY_AUTHORIZATION,
    TE,
    TRAILER,
    TRANSFER_ENCODING,
    UPGRADE,
    CONTENT_LENGTH,
    CONTENT_ENCODING,
    CONTENT_RANGE,
    CONTENT_TYPE,
    CONTENT_LOCATION,
    AGE,
];

fn is_unmodifiable(name: &HeaderName) -> bool {
    UNMODIFIABLE_HEADERS.contains(name)
        || name.as_str() == KEEP_ALIVE
        || name.as_str() == CONTENT_MD5
}

/// Copy of `headers` without the fields a revalidation may not overwrite.
pub fn strip_unmodifiable(headers: &HeaderMap) -> HeaderMap {
    let mut stripped = HeaderMap::new();
    for (name, value) in headers.iter() {
        if !is_unmodifiable(name) {
            stripped.append(name.clone(), value.clone());
        }
    }
    stripped
}

/// Overlays `resolved` onto `cached` (resolved wins per header name), drops
/// any stale `Age` and inserts `age` in its place.
pub fn merge_revalidated(cached: &HeaderMap, resolved: &HeaderMap, age: Duration) -> HeaderMap {
    let mut merged = cached.clone();
    let overlay = strip_unmodifiable(resolved);
    for name in overlay.keys() {
        merged.remove(name);
    }
    for (name, value) in overlay.iter() {
        merged.append(name.clone(), value.clone());
    }
    merged.remove(AGE);
    merged.insert(AGE, HeaderValue::from(age.as_secs()));
    merged
}

/// Age to advertise after a revalidation.
///
/// The difference between the two `Date` headers when both are present,
/// otherwise the time the cached response has spent in storage.
pub fn revalidation_age(
    resolved: &HttpResponse,
    cached: &HttpResponse,
    cached_at: SystemTime,
    now: SystemTime,
) -> Duration {
    match (resolved.date(), cached.date()) {
        (Some(resolved_date), Some(cached_date)) => resolved_date
            .duration_since(cached_date)
            .unwrap_or(Duration::ZERO),
        _ => now.duration_since(cached_at).unwrap_or(Duration::ZERO),
    }
}

/// Value of the `Age` header in seconds, if present and well formed.
pub fn age_header(headers: &HeaderMap) -> Option<Duration> {
    let value = headers.get(AGE)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Marks a stale response served because revalidation failed.
pub fn with_stale_warning(response: &HttpResponse) -> HttpResponse {
    let mut headers = response.headers().clone();
    headers.append(WARNING, HeaderValue::from_static(STALE_WARNING));
    headers.append(WARNING, HeaderValue::from_static(REVALIDATION_FAILED_WARNING));
    response.with_headers(headers)
}

/// Entity tags from every `name` header, split on commas outside quotes.
/// Weak tags are returned without their `W/` prefix.
pub fn entity_tags(headers: &HeaderMap, name: HeaderName) -> Vec<String> {
    let mut tags = Vec::new();
    for value in headers.get_all(name) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        let mut current = String::new();
        let mut quoted = false;
        for ch in value.chars() {
            match ch {
                '"' => {
                    quoted = !quoted;
                    current.push(ch);
                }
                ',' if !quoted => {
                    push_tag(&mut tags, &current);
                    current.clear();
                }
                _ => current.push(ch),
            }
        }
        push_tag(&mut tags, &current);
    }
    tags
}

fn push_tag(tags: &mut Vec<String>, raw: &str) {
    let tag = raw.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag).trim();
    if !tag.is_empty() {
        tags.push(tag.to_string());
    }
}

/// Weak comparison of two entity tags.
pub fn etags_match(left: &str, right: &str) -> bool {
    let left = left.trim();
    let right = right.trim();
    left.strip_prefix("W/").unwrap_or(left) == right.strip_prefix("W/").unwrap_or(right)
}
