//! Cache keys, stored items and the storage variants behind them.

use anyhow::Result;
use async_trait::async_trait;
use http::Uri;

mod file;
mod index;
mod indexed;
mod item;
mod key;
mod locks;
mod memory;
mod vary;

pub use file::FileStorage;
pub use indexed::{DEFAULT_INDEX_CAPACITY, EvictionHook, IndexedStorage};
pub use item::CacheItem;
pub use key::{KEY_FORMAT_VERSION, Key, KeyParseError, KeyProperties};
pub use memory::MemoryStorage;
pub use vary::{Vary, VaryOptions};

use crate::http::{CacheRequest, HttpResponse};

/// Key to item persistence shared by every storage variant.
///
/// A miss is `Ok(None)`, never an error. Invalidating something that is not
/// stored is a no-op.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Stores a new response to `request` and returns the stored response.
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse>;

    /// Replaces the stored response to `request` and returns the stored response.
    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse>;

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>>;

    /// Finds an entry whose URI and Vary match `request`.
    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>>;

    /// Removes every entry stored under `uri`, whatever its Vary.
    async fn invalidate_uri(&self, uri: &Uri) -> Result<()>;

    async fn invalidate_key(&self, key: &Key) -> Result<()>;

    /// Removes the entries under `uri` holding the same response as `item`.
    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    fn size(&self) -> usize;

    fn keys(&self) -> Vec<Key>;

    /// Options this storage derives Vary mappings and keys with.
    fn vary_options(&self) -> VaryOptions;

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
