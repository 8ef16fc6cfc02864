use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use http::Uri;
use parking_lot::RwLock;
use tracing::trace;

use super::{CacheItem, CacheStorage, Key, VaryOptions};
use crate::http::{CacheRequest, HttpResponse, normalize_uri};

/// Unbounded in-process storage. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<Key, CacheItem>>,
    options: VaryOptions,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vary_options(mut self, options: VaryOptions) -> Self {
        self.options = options;
        self
    }

    fn put(&self, request: &CacheRequest, response: HttpResponse) -> HttpResponse {
        let key = Key::create(request, &response, self.options);
        trace!(key = %key, "storing in memory");
        self.entries
            .write()
            .insert(key, CacheItem::new(response.clone()));
        response
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        Ok(self.put(request, response))
    }

    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        Ok(self.put(request, response))
    }

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        let uri = request.normalized_uri();
        let guard = self.entries.read();
        let found = guard
            .iter()
            .filter(|(key, _)| key.matches(&uri, request))
            .max_by_key(|(_, item)| item.cached_at())
            .map(|(key, item)| (key.clone(), item.clone()));
        Ok(found)
    }

    async fn invalidate_uri(&self, uri: &Uri) -> Result<()> {
        let uri = normalize_uri(uri);
        self.entries.write().retain(|key, _| key.uri() != &uri);
        Ok(())
    }

    async fn invalidate_key(&self, key: &Key) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()> {
        let uri = normalize_uri(uri);
        self.entries
            .write()
            .retain(|key, stored| key.uri() != &uri || stored.response() != item.response());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }

    fn size(&self) -> usize {
        self.entries.read().len()
    }

    fn keys(&self) -> Vec<Key> {
        self.entries.read().keys().cloned().collect()
    }

    fn vary_options(&self) -> VaryOptions {
        self.options
    }
}
