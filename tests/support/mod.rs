#![allow(dead_code)]

pub mod logging;
pub mod resolver;
pub mod storage;

use std::time::SystemTime;

use http::header::{CACHE_CONTROL, DATE, ETAG};
use http::{HeaderValue, Method, StatusCode, Uri};

use httpcache::{CacheRequest, HttpResponse};

pub use resolver::ScriptedResolver;
pub use storage::{CountingStorage, FailingStorage, GatedStorage};

pub fn uri(path: &str) -> Uri {
    format!("http://example.com{path}")
        .parse()
        .expect("valid test uri")
}

pub fn get(path: &str) -> CacheRequest {
    CacheRequest::get(uri(path))
}

pub fn request(method: Method, path: &str) -> CacheRequest {
    CacheRequest::builder(method, uri(path)).build()
}

pub fn http_date(at: SystemTime) -> HeaderValue {
    HeaderValue::from_str(&httpdate::fmt_http_date(at)).expect("valid http date")
}

pub fn cache_control(value: &'static str) -> HeaderValue {
    HeaderValue::from_static(value)
}

/// A `200` carrying `Cache-Control: max-age=<max_age>` and `body`.
pub fn fresh_response(max_age: u64, body: &'static str) -> HttpResponse {
    HttpResponse::builder(StatusCode::OK)
        .header(
            CACHE_CONTROL,
            HeaderValue::from_str(&format!("max-age={max_age}")).expect("valid cache-control"),
        )
        .body(body)
        .build()
}

/// Like [`fresh_response`] with an `ETag` and a `Date`.
pub fn tagged_response(
    max_age: u64,
    etag: &'static str,
    date: SystemTime,
    body: &'static str,
) -> HttpResponse {
    HttpResponse::builder(StatusCode::OK)
        .header(
            CACHE_CONTROL,
            HeaderValue::from_str(&format!("max-age={max_age}")).expect("valid cache-control"),
        )
        .header(ETAG, HeaderValue::from_static(etag))
        .header(DATE, http_date(date))
        .body(body)
        .build()
}

pub fn not_modified(date: SystemTime) -> HttpResponse {
    HttpResponse::builder(StatusCode::NOT_MODIFIED)
        .header(DATE, http_date(date))
        .build()
}

pub fn body_text(response: &HttpResponse) -> String {
    response
        .body()
        .map(|body| String::from_utf8_lossy(body).into_owned())
        .unwrap_or_default()
}
