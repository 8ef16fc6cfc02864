use std::num::NonZeroUsize;

use http::Uri;
use lru::LruCache;

use super::{CacheItem, Key};
use crate::http::CacheRequest;

/// Bounded in-memory view over a backing store, ordered by recency.
#[derive(Debug)]
pub(super) struct CacheIndex {
    lru: LruCache<Key, CacheItem>,
}

impl CacheIndex {
    pub(super) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            lru: LruCache::new(capacity),
        }
    }

    /// Looks up `key`, promoting it to most recently used.
    pub(super) fn get(&mut self, key: &Key) -> Option<CacheItem> {
        self.lru.get(key).cloned()
    }

    /// Finds the freshest entry able to answer `request`. Does not promote.
    pub(super) fn find(&self, uri: &Uri, request: &CacheRequest) -> Option<Key> {
        self.lru
            .iter()
            .filter(|(key, _)| key.matches(uri, request))
            .max_by_key(|(_, item)| item.cached_at())
            .map(|(key, _)| key.clone())
    }

    pub(super) fn contains(&self, key: &Key) -> bool {
        self.lru.contains(key)
    }

    /// Inserts or replaces `key`. Returns the entry pushed out to make room,
    /// never the replaced value of `key` itself.
    pub(super) fn insert(&mut self, key: Key, item: CacheItem) -> Option<(Key, CacheItem)> {
        let inserted = key.clone();
        match self.lru.push(key, item) {
            Some((evicted, item)) if evicted != inserted => Some((evicted, item)),
            _ => None,
        }
    }

    pub(super) fn remove(&mut self, key: &Key) -> Option<CacheItem> {
        self.lru.pop(key)
    }

    pub(super) fn remove_uri(&mut self, uri: &Uri) -> Vec<Key> {
        let keys: Vec<Key> = self
            .lru
            .iter()
            .filter(|(key, _)| key.uri() == uri)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.lru.pop(key);
        }
        keys
    }

    pub(super) fn remove_matching(&mut self, uri: &Uri, item: &CacheItem) -> Vec<Key> {
        let keys: Vec<Key> = self
            .lru
            .iter()
            .filter(|(key, stored)| key.uri() == uri && stored.response() == item.response())
            .map(|(key, _)| key.clone())
            .collect();
        for key in &keys {
            self.lru.pop(key);
        }
        keys
    }

    pub(super) fn clear(&mut self) {
        self.lru.clear();
    }

    pub(super) fn capacity(&self) -> usize {
        self.lru.cap().get()
    }

    pub(super) fn len(&self) -> usize {
        self.lru.len()
    }

    pub(super) fn keys(&self) -> Vec<Key> {
        self.lru.iter().map(|(key, _)| key.clone()).collect()
    }
}
