#![no_main]

use std::time::SystemTime;

use http::header::{CACHE_CONTROL, IF_NONE_MATCH};
use http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;

use httpcache::http::cache_control::{freshness_lifetime, parse_cache_control};
use httpcache::http::headers::entity_tags;

fuzz_target!(|data: &[u8]| {
    let Ok(value) = HeaderValue::from_bytes(data) else {
        return;
    };

    let mut headers = HeaderMap::new();
    headers.insert(CACHE_CONTROL, value.clone());
    headers.insert(IF_NONE_MATCH, value);

    let _ = parse_cache_control(&headers);
    let _ = freshness_lifetime(&headers, SystemTime::now());
    for tag in entity_tags(&headers, IF_NONE_MATCH) {
        assert!(!tag.is_empty());
    }
});
