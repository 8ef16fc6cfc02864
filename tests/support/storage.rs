use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use http::Uri;
use parking_lot::Mutex;
use tokio::sync::Notify;

use httpcache::cache::{CacheItem, CacheStorage, Key, MemoryStorage, VaryOptions};
use httpcache::{CacheRequest, HttpResponse};

/// Backing store wrapper that records key deletions and key lookups.
pub struct CountingStorage {
    inner: Arc<dyn CacheStorage>,
    gets: AtomicUsize,
    deleted: Mutex<Vec<Key>>,
}

impl CountingStorage {
    pub fn new(inner: Arc<dyn CacheStorage>) -> Self {
        Self {
            inner,
            gets: AtomicUsize::new(0),
            deleted: Mutex::new(Vec::new()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn deleted_keys(&self) -> Vec<Key> {
        self.deleted.lock().clone()
    }
}

#[async_trait]
impl CacheStorage for CountingStorage {
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.inner.insert(request, response).await
    }

    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.inner.update(request, response).await
    }

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }

    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        self.inner.get_for_request(request).await
    }

    async fn invalidate_uri(&self, uri: &Uri) -> Result<()> {
        self.inner.invalidate_uri(uri).await
    }

    async fn invalidate_key(&self, key: &Key) -> Result<()> {
        self.deleted.lock().push(key.clone());
        self.inner.invalidate_key(key).await
    }

    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()> {
        self.inner.invalidate_item(uri, item).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn keys(&self) -> Vec<Key> {
        self.inner.keys()
    }

    fn vary_options(&self) -> VaryOptions {
        self.inner.vary_options()
    }
}

/// In-memory storage whose next armed `get` pauses after loading, until
/// released.
#[derive(Default)]
pub struct GatedStorage {
    inner: MemoryStorage,
    armed: AtomicBool,
    loaded: Notify,
    release: Notify,
}

impl GatedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Waits until the armed `get` has loaded its item.
    pub async fn loaded(&self) {
        self.loaded.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl CacheStorage for GatedStorage {
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.inner.insert(request, response).await
    }

    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.inner.update(request, response).await
    }

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>> {
        let item = self.inner.get(key).await?;
        if self.armed.swap(false, Ordering::SeqCst) {
            self.loaded.notify_one();
            self.release.notified().await;
        }
        Ok(item)
    }

    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        self.inner.get_for_request(request).await
    }

    async fn invalidate_uri(&self, uri: &Uri) -> Result<()> {
        self.inner.invalidate_uri(uri).await
    }

    async fn invalidate_key(&self, key: &Key) -> Result<()> {
        self.inner.invalidate_key(key).await
    }

    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()> {
        self.inner.invalidate_item(uri, item).await
    }

    async fn clear(&self) -> Result<()> {
        self.inner.clear().await
    }

    fn size(&self) -> usize {
        self.inner.size()
    }

    fn keys(&self) -> Vec<Key> {
        self.inner.keys()
    }

    fn vary_options(&self) -> VaryOptions {
        self.inner.vary_options()
    }
}

/// Storage whose every operation fails.
#[derive(Default)]
pub struct FailingStorage;

#[async_trait]
impl CacheStorage for FailingStorage {
    async fn insert(
        &self,
        _request: &CacheRequest,
        _response: HttpResponse,
    ) -> Result<HttpResponse> {
        bail!("insert failed")
    }

    async fn update(
        &self,
        _request: &CacheRequest,
        _response: HttpResponse,
    ) -> Result<HttpResponse> {
        bail!("update failed")
    }

    async fn get(&self, _key: &Key) -> Result<Option<CacheItem>> {
        bail!("get failed")
    }

    async fn get_for_request(&self, _request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        bail!("lookup failed")
    }

    async fn invalidate_uri(&self, _uri: &Uri) -> Result<()> {
        bail!("invalidate failed")
    }

    async fn invalidate_key(&self, _key: &Key) -> Result<()> {
        bail!("invalidate failed")
    }

    async fn invalidate_item(&self, _uri: &Uri, _item: &CacheItem) -> Result<()> {
        bail!("invalidate failed")
    }

    async fn clear(&self) -> Result<()> {
        bail!("clear failed")
    }

    fn size(&self) -> usize {
        0
    }

    fn keys(&self) -> Vec<Key> {
        Vec::new()
    }

    fn vary_options(&self) -> VaryOptions {
        VaryOptions::default()
    }
}
