//! HTTP message values and the header rules the cache applies to them.

pub mod cache_control;
pub mod headers;
pub mod request;
pub mod response;
pub mod uri;

pub use request::{CacheRequest, CacheRequestBuilder, Challenge};
pub use response::{HttpResponse, HttpResponseBuilder};
pub use uri::normalize_uri;
