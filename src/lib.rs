pub mod cache;
pub mod engine;
pub mod error;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod settings;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use crate::cache::{CacheItem, CacheStorage, Key};
pub use crate::engine::{HttpCache, ResponseResolver};
pub use crate::error::CacheError;
pub use crate::http::{CacheRequest, HttpResponse};

use crate::cache::{FileStorage, IndexedStorage, MemoryStorage};
use crate::settings::Settings;

/// Builds the configured storage stack: a bounded index over a file store
/// when `storage_dir` is set, over an in-memory store otherwise. Entries
/// already on disk are loaded into the index up to its capacity.
pub async fn open_storage(settings: &Settings) -> Result<Arc<dyn CacheStorage>> {
    settings.validate()?;
    let options = settings.vary_options();
    let backing: Arc<dyn CacheStorage> = match &settings.storage_dir {
        Some(dir) => Arc::new(FileStorage::open(dir, options).await?),
        None => Arc::new(MemoryStorage::new().with_vary_options(options)),
    };
    info!(
        storage_dir = ?settings.storage_dir,
        index_capacity = settings.index_capacity,
        vary_authorization = settings.vary_authorization,
        "cache storage ready"
    );
    let indexed = IndexedStorage::new(backing, settings.index_capacity_nonzero()?);
    indexed.warm().await?;
    Ok(Arc::new(indexed))
}
