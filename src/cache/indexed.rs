use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use http::Uri;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::index::CacheIndex;
use super::locks::KeyLocks;
use super::{CacheItem, CacheStorage, Key, VaryOptions};
use crate::http::{CacheRequest, HttpResponse, normalize_uri};

pub const DEFAULT_INDEX_CAPACITY: usize = 1000;

/// Called with every key the index drops for capacity, before the key is
/// removed from the backing store.
pub type EvictionHook = Arc<dyn Fn(&Key) + Send + Sync>;

/// Bounded LRU index composed over a backing store.
///
/// Capacity evictions from the index are propagated to the backing store, so
/// the index capacity bounds both layers. `size()` and `keys()` reflect index
/// occupancy, not the number of entries in the backing store, and
/// `get_for_request` only finds entries that are currently indexed.
///
/// Keys are derived with the backing store's vary options.
pub struct IndexedStorage {
    backing: Arc<dyn CacheStorage>,
    index: Mutex<CacheIndex>,
    locks: KeyLocks,
    options: VaryOptions,
    on_evict: Option<EvictionHook>,
}

impl IndexedStorage {
    pub fn new(backing: Arc<dyn CacheStorage>, capacity: NonZeroUsize) -> Self {
        let options = backing.vary_options();
        Self {
            backing,
            index: Mutex::new(CacheIndex::new(capacity)),
            locks: KeyLocks::new(),
            options,
            on_evict: None,
        }
    }

    pub fn with_default_capacity(backing: Arc<dyn CacheStorage>) -> Self {
        let capacity = NonZeroUsize::new(DEFAULT_INDEX_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::new(backing, capacity)
    }

    pub fn with_eviction_hook(mut self, hook: EvictionHook) -> Self {
        self.on_evict = Some(hook);
        self
    }

    pub fn backing(&self) -> &Arc<dyn CacheStorage> {
        &self.backing
    }

    /// Publishes entries already held by the backing store into the index,
    /// up to its free capacity. Returns how many were loaded.
    pub async fn warm(&self) -> Result<usize> {
        let free = {
            let index = self.index.lock();
            index.capacity().saturating_sub(index.len())
        };
        let mut loaded = 0;
        for key in self.backing.keys() {
            if loaded >= free {
                break;
            }
            let guard = self.locks.lock(key.uri()).await;
            let indexed = self.index.lock().contains(&key);
            if indexed {
                continue;
            }
            let Some(item) = self.backing.get(&key).await? else {
                continue;
            };
            let evicted = self.publish(key, item);
            drop(guard);
            if let Some(evicted) = evicted {
                self.propagate_eviction(evicted).await;
            }
            loaded += 1;
        }
        debug!(loaded, "warmed index from backing store");
        Ok(loaded)
    }

    async fn store(
        &self,
        request: &CacheRequest,
        response: HttpResponse,
        replace: bool,
    ) -> Result<HttpResponse> {
        let key = Key::create(request, &response, self.options);
        let guard = self.locks.lock(key.uri()).await;
        let stored = if replace {
            self.backing.update(request, response).await?
        } else {
            self.backing.insert(request, response).await?
        };
        trace!(key = %key, "publishing into index");
        let evicted = self.publish(key, CacheItem::new(stored.clone()));
        drop(guard);

        if let Some(evicted) = evicted {
            self.propagate_eviction(evicted).await;
        }
        Ok(stored)
    }

    async fn propagate_eviction(&self, key: Key) {
        if let Some(hook) = &self.on_evict {
            hook(&key);
        }
        let _guard = self.locks.lock(key.uri()).await;
        // Re-inserted after it was pushed out.
        let reinserted = self.index.lock().contains(&key);
        if reinserted {
            trace!(key = %key, "evicted key was re-indexed; keeping backing entry");
            return;
        }
        crate::metrics::record_cache_eviction();
        debug!(key = %key, "evicted from index");
        if let Err(err) = self.backing.invalidate_key(&key).await {
            warn!(error = %err, key = %key, "failed to remove evicted entry from backing store");
        }
    }

    /// Inserts into the index and returns the key pushed out for capacity.
    /// Callers hold the stripe lock of `key` and propagate the eviction
    /// after releasing it.
    fn publish(&self, key: Key, item: CacheItem) -> Option<Key> {
        self.index
            .lock()
            .insert(key, item)
            .map(|(evicted, _)| evicted)
    }
}

impl fmt::Debug for IndexedStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedStorage")
            .field("indexed", &self.index.lock().len())
            .field("options", &self.options)
            .field("eviction_hook", &self.on_evict.is_some())
            .finish()
    }
}

#[async_trait]
impl CacheStorage for IndexedStorage {
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.store(request, response, false).await
    }

    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.store(request, response, true).await
    }

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>> {
        let cached = self.index.lock().get(key);
        if let Some(item) = cached {
            return Ok(Some(item));
        }

        let guard = self.locks.lock(key.uri()).await;
        let Some(item) = self.backing.get(key).await? else {
            return Ok(None);
        };
        trace!(key = %key, "loaded from backing store");
        let evicted = self.publish(key.clone(), item.clone());
        drop(guard);

        if let Some(evicted) = evicted {
            self.propagate_eviction(evicted).await;
        }
        Ok(Some(item))
    }

    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        let uri = request.normalized_uri();
        let matched = self.index.lock().find(&uri, request);
        let Some(key) = matched else {
            return Ok(None);
        };

        let guard = self.locks.lock(&uri).await;
        let loaded = self.backing.get(&key).await?;
        let Some(item) = loaded else {
            // Evicted or invalidated between the scan and the load.
            trace!(key = %key, "indexed key missing from backing store");
            self.index.lock().remove(&key);
            return Ok(None);
        };
        let evicted = self.publish(key.clone(), item.clone());
        drop(guard);

        if let Some(evicted) = evicted {
            self.propagate_eviction(evicted).await;
        }
        Ok(Some((key, item)))
    }

    async fn invalidate_uri(&self, uri: &Uri) -> Result<()> {
        let uri = normalize_uri(uri);
        let _guard = self.locks.lock(&uri).await;
        let removed = self.index.lock().remove_uri(&uri);
        debug!(uri = %uri, indexed = removed.len(), "invalidating uri");
        self.backing.invalidate_uri(&uri).await
    }

    async fn invalidate_key(&self, key: &Key) -> Result<()> {
        let _guard = self.locks.lock(key.uri()).await;
        self.index.lock().remove(key);
        self.backing.invalidate_key(key).await
    }

    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()> {
        let uri = normalize_uri(uri);
        let _guard = self.locks.lock(&uri).await;
        let removed = self.index.lock().remove_matching(&uri, item);
        debug!(uri = %uri, indexed = removed.len(), "invalidating item");
        self.backing.invalidate_item(&uri, item).await
    }

    async fn clear(&self) -> Result<()> {
        self.index.lock().clear();
        self.backing.clear().await
    }

    fn size(&self) -> usize {
        self.index.lock().len()
    }

    fn keys(&self) -> Vec<Key> {
        self.index.lock().keys()
    }

    fn vary_options(&self) -> VaryOptions {
        self.options
    }

    async fn shutdown(&self) -> Result<()> {
        self.backing.shutdown().await
    }
}
