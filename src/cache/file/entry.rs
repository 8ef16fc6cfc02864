use std::time::{Duration, SystemTime};

use anyhow::{Result, anyhow};
use bytes::Bytes;
use http::header::HeaderName;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};

use crate::cache::{CacheItem, Key, KeyProperties};
use crate::http::HttpResponse;

/// A header value as written to disk: text when it is visible ASCII, raw
/// bytes otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(super) enum StoredValue {
    Text(String),
    Raw(Vec<u8>),
}

impl StoredValue {
    fn new(value: &HeaderValue) -> Self {
        match value.to_str() {
            Ok(text) => StoredValue::Text(text.to_string()),
            Err(_) => StoredValue::Raw(value.as_bytes().to_vec()),
        }
    }

    fn as_bytes(&self) -> &[u8] {
        match self {
            StoredValue::Text(text) => text.as_bytes(),
            StoredValue::Raw(bytes) => bytes,
        }
    }
}

/// On-disk metadata of one stored entry. The body lives in a sibling file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(super) struct PersistedItem {
    pub key: KeyProperties,
    pub status: u16,
    pub headers: Vec<(String, StoredValue)>,
    pub cached_at_ms: u64,
    #[serde(default)]
    pub body_hash: Option<String>,
    #[serde(default)]
    pub body_length: u64,
}

impl PersistedItem {
    pub(super) fn new(key: &Key, item: &CacheItem) -> Self {
        let response = item.response();
        let body = response.body();
        Self {
            key: key.to_properties(),
            status: response.status().as_u16(),
            headers: headermap_to_vec(response.headers()),
            cached_at_ms: item
                .cached_at()
                .duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
            body_hash: body.map(|body| blake3::hash(body).to_hex().to_string()),
            body_length: body.map(|body| body.len() as u64).unwrap_or(0),
        }
    }

    pub(super) fn cached_at(&self) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_millis(self.cached_at_ms)
    }

    /// Rebuilds the stored item around `body`, which must already be verified
    /// against `body_hash`.
    pub(super) fn to_item(&self, body: Option<Bytes>) -> Result<CacheItem> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|_| anyhow!("invalid stored status {}", self.status))?;
        let response = HttpResponse::new(status, to_headermap(&self.headers)?, body);
        Ok(CacheItem::with_timestamp(response, self.cached_at()))
    }
}

pub(super) fn valid_body_hash(value: &str) -> bool {
    value.len() == 64 && value.as_bytes().iter().all(|b| b.is_ascii_hexdigit())
}

pub(super) fn to_headermap(items: &[(String, StoredValue)]) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in items {
        let name = HeaderName::try_from(name.as_str())
            .map_err(|_| anyhow!("invalid stored header name {name:?}"))?;
        let value = HeaderValue::from_bytes(value.as_bytes())
            .map_err(|_| anyhow!("invalid stored value for header {name}"))?;
        map.append(name, value);
    }
    Ok(map)
}

pub(super) fn headermap_to_vec(map: &HeaderMap) -> Vec<(String, StoredValue)> {
    map.iter()
        .map(|(name, value)| (name.as_str().to_string(), StoredValue::new(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Vary;
    use http::header::{CACHE_CONTROL, ETAG};

    #[test]
    fn persisted_item_restores_response() -> Result<()> {
        let response = HttpResponse::builder(StatusCode::OK)
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .header(ETAG, HeaderValue::from_static("\"v1\""))
            .body("payload")
            .build();
        let cached_at = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let item = CacheItem::with_timestamp(response, cached_at);
        let key = Key::new(&"http://example.com/a".parse()?, Vary::empty());

        let persisted = PersistedItem::new(&key, &item);
        assert_eq!(persisted.body_length, 7);
        assert!(valid_body_hash(persisted.body_hash.as_deref().unwrap()));

        let json = serde_json::to_vec(&persisted)?;
        let decoded: PersistedItem = serde_json::from_slice(&json)?;
        let restored = decoded.to_item(item.response().body().cloned())?;
        assert_eq!(restored, item);
        assert_eq!(Key::from_properties(&decoded.key)?, key);
        Ok(())
    }

    #[test]
    fn opaque_header_bytes_survive_json() -> Result<()> {
        let title = HeaderValue::from_bytes(b"caf\xe9")?;
        let response = HttpResponse::builder(StatusCode::OK)
            .header(HeaderName::from_static("x-title"), title.clone())
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .build();
        let item = CacheItem::with_timestamp(response, SystemTime::UNIX_EPOCH);
        let key = Key::new(&"http://example.com/a".parse()?, Vary::empty());

        let persisted = PersistedItem::new(&key, &item);
        assert!(persisted.headers.contains(&(
            "x-title".to_string(),
            StoredValue::Raw(b"caf\xe9".to_vec())
        )));
        assert!(persisted.headers.contains(&(
            "cache-control".to_string(),
            StoredValue::Text("max-age=60".to_string())
        )));

        let decoded: PersistedItem = serde_json::from_slice(&serde_json::to_vec(&persisted)?)?;
        let restored = decoded.to_item(None)?;
        assert_eq!(restored.response().headers().get("x-title"), Some(&title));
        assert_eq!(restored, item);
        Ok(())
    }

    #[test]
    fn rejects_invalid_status() {
        let persisted = PersistedItem {
            key: KeyProperties {
                version: 1,
                uri: Some("http://example.com/".to_string()),
                vary: Some(String::new()),
            },
            status: 42,
            headers: Vec::new(),
            cached_at_ms: 0,
            body_hash: None,
            body_length: 0,
        };
        assert!(persisted.to_item(None).is_err());
    }
}
