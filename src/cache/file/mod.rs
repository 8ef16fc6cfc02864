//! Durable storage of cache entries on the local filesystem.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use http::Uri;
use parking_lot::RwLock;
use tokio::fs as async_fs;
use tokio::task;
use tracing::{debug, trace, warn};

mod entry;
mod maintenance;
mod store;

use entry::PersistedItem;
use maintenance::{prepare_versioned_dir, spawn_dir_cleanup};
use store::FileStore;

use super::locks::KeyLocks;
use super::{CacheItem, CacheStorage, Key, VaryOptions};
use crate::http::{CacheRequest, HttpResponse, normalize_uri};

/// Stores each entry as a JSON metadata file plus a body file, sharded by
/// the key's storage id under a versioned layout directory.
///
/// The set of stored keys is kept in memory and rebuilt from disk on open.
#[derive(Debug, Clone)]
pub struct FileStorage {
    state: Arc<FileState>,
}

#[derive(Debug)]
struct FileState {
    store: FileStore,
    catalog: RwLock<HashMap<Uri, Vec<Key>>>,
    locks: KeyLocks,
    options: VaryOptions,
}

impl FileStorage {
    pub async fn open(root: impl AsRef<Path>, options: VaryOptions) -> Result<Self> {
        let (disk_dir, cleanup_dirs) = prepare_versioned_dir(root.as_ref()).await?;
        spawn_dir_cleanup(cleanup_dirs);

        let state = Arc::new(FileState {
            store: FileStore::new(disk_dir),
            catalog: RwLock::new(HashMap::new()),
            locks: KeyLocks::new(),
            options,
        });
        let rebuild = {
            let state = state.clone();
            task::spawn_blocking(move || state.rebuild_from_disk())
        };
        rebuild
            .await
            .map_err(|err| anyhow!("storage rebuild task failed: {err}"))??;
        debug!(
            path = %state.store.disk_dir().display(),
            entries = state.len(),
            "opened file storage"
        );

        Ok(Self { state })
    }

    pub fn disk_dir(&self) -> &Path {
        self.state.store.disk_dir()
    }

    async fn put(
        &self,
        request: &CacheRequest,
        response: HttpResponse,
        replace: bool,
    ) -> Result<HttpResponse> {
        let state = &self.state;
        let key = Key::create(request, &response, state.options);
        let storage_id = key.storage_id();
        let item = CacheItem::new(response);
        let persisted = PersistedItem::new(&key, &item);

        let _guard = state.locks.lock(key.uri()).await;
        let keep_body = replace && state.body_unchanged(&storage_id, &persisted).await;
        if !keep_body {
            match item.response().body() {
                Some(body) => state.store.write_body_async(&storage_id, body).await?,
                None => {
                    let _ = async_fs::remove_file(state.store.body_path(&storage_id)).await;
                }
            }
        }
        state.store.write_metadata_async(&storage_id, &persisted).await?;
        state.catalog_insert(key.clone());
        trace!(key = %key, replace, kept_body = keep_body, "stored on disk");

        Ok(item.into_response())
    }
}

impl FileState {
    fn len(&self) -> usize {
        self.catalog.read().values().map(Vec::len).sum()
    }

    fn catalog_insert(&self, key: Key) {
        let mut catalog = self.catalog.write();
        let keys = catalog.entry(key.uri().clone()).or_default();
        if !keys.contains(&key) {
            keys.push(key);
        }
    }

    fn catalog_remove(&self, key: &Key) {
        let mut catalog = self.catalog.write();
        if let Some(keys) = catalog.get_mut(key.uri()) {
            keys.retain(|candidate| candidate != key);
            if keys.is_empty() {
                catalog.remove(key.uri());
            }
        }
    }

    fn keys_for(&self, uri: &Uri) -> Vec<Key> {
        self.catalog.read().get(uri).cloned().unwrap_or_default()
    }

    async fn body_unchanged(&self, storage_id: &str, next: &PersistedItem) -> bool {
        let Ok(Some(data)) = self.store.read_metadata_async(storage_id).await else {
            return false;
        };
        let Ok(current) = serde_json::from_slice::<PersistedItem>(&data) else {
            return false;
        };
        current.body_hash.is_some() && current.body_hash == next.body_hash
    }

    /// Loads and verifies the entry for `key`. Entries that fail to parse,
    /// belong to another key or fail the body hash check are removed.
    async fn load(&self, key: &Key) -> Result<Option<CacheItem>> {
        let storage_id = key.storage_id();
        let Some(data) = self.store.read_metadata_async(&storage_id).await? else {
            return Ok(None);
        };

        let persisted: PersistedItem = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, key = %key, "failed to parse stored metadata; removing entry");
                self.discard(key, &storage_id).await;
                return Ok(None);
            }
        };
        match Key::from_properties(&persisted.key) {
            Ok(stored) if &stored == key => {}
            Ok(stored) => {
                warn!(expected = %key, actual = %stored, "stored key mismatch; removing entry");
                self.discard(key, &storage_id).await;
                return Ok(None);
            }
            Err(err) => {
                warn!(error = %err, key = %key, "invalid stored key; removing entry");
                self.discard(key, &storage_id).await;
                return Ok(None);
            }
        }

        let body = match persisted.body_hash.as_deref() {
            None => None,
            Some(expected) => {
                let body = self.store.read_body_async(&storage_id).await?;
                match body {
                    Some(body) if blake3::hash(&body).to_hex().as_str() == expected => Some(body),
                    _ => {
                        warn!(key = %key, "stored body missing or corrupt; removing entry");
                        self.discard(key, &storage_id).await;
                        return Ok(None);
                    }
                }
            }
        };

        match persisted.to_item(body) {
            Ok(item) => Ok(Some(item)),
            Err(err) => {
                warn!(error = %err, key = %key, "invalid stored response; removing entry");
                self.discard(key, &storage_id).await;
                Ok(None)
            }
        }
    }

    async fn discard(&self, key: &Key, storage_id: &str) {
        self.catalog_remove(key);
        self.store.remove_entry_files_async(storage_id).await;
    }
}

#[async_trait]
impl CacheStorage for FileStorage {
    async fn insert(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.put(request, response, false).await
    }

    async fn update(&self, request: &CacheRequest, response: HttpResponse) -> Result<HttpResponse> {
        self.put(request, response, true).await
    }

    async fn get(&self, key: &Key) -> Result<Option<CacheItem>> {
        let _guard = self.state.locks.lock(key.uri()).await;
        self.state.load(key).await
    }

    async fn get_for_request(&self, request: &CacheRequest) -> Result<Option<(Key, CacheItem)>> {
        let uri = request.normalized_uri();
        let candidates: Vec<Key> = self
            .state
            .keys_for(&uri)
            .into_iter()
            .filter(|key| key.matches(&uri, request))
            .collect();
        if candidates.is_empty() {
            return Ok(None);
        }

        let _guard = self.state.locks.lock(&uri).await;
        let mut found: Option<(Key, CacheItem)> = None;
        for key in candidates {
            let Some(item) = self.state.load(&key).await? else {
                continue;
            };
            let newer = found
                .as_ref()
                .map(|(_, best)| item.cached_at() > best.cached_at())
                .unwrap_or(true);
            if newer {
                found = Some((key, item));
            }
        }
        Ok(found)
    }

    async fn invalidate_uri(&self, uri: &Uri) -> Result<()> {
        let uri = normalize_uri(uri);
        let _guard = self.state.locks.lock(&uri).await;
        let keys = self.state.catalog.write().remove(&uri).unwrap_or_default();
        for key in &keys {
            self.state
                .store
                .remove_entry_files_async(&key.storage_id())
                .await;
        }
        trace!(uri = %uri, removed = keys.len(), "invalidated uri on disk");
        Ok(())
    }

    async fn invalidate_key(&self, key: &Key) -> Result<()> {
        let _guard = self.state.locks.lock(key.uri()).await;
        self.state.discard(key, &key.storage_id()).await;
        Ok(())
    }

    async fn invalidate_item(&self, uri: &Uri, item: &CacheItem) -> Result<()> {
        let uri = normalize_uri(uri);
        let _guard = self.state.locks.lock(&uri).await;
        for key in self.state.keys_for(&uri) {
            let stored = self.state.load(&key).await?;
            if stored.is_some_and(|stored| stored.response() == item.response()) {
                self.state.discard(&key, &key.storage_id()).await;
            }
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        let keys: Vec<Key> = {
            let mut catalog = self.state.catalog.write();
            catalog.drain().flat_map(|(_, keys)| keys).collect()
        };
        for key in &keys {
            let _guard = self.state.locks.lock(key.uri()).await;
            self.state
                .store
                .remove_entry_files_async(&key.storage_id())
                .await;
        }
        debug!(removed = keys.len(), "cleared file storage");
        Ok(())
    }

    fn size(&self) -> usize {
        self.state.len()
    }

    fn keys(&self) -> Vec<Key> {
        self.state.catalog.read().values().flatten().cloned().collect()
    }

    fn vary_options(&self) -> VaryOptions {
        self.state.options
    }

    async fn shutdown(&self) -> Result<()> {
        let state = self.state.clone();
        task::spawn_blocking(move || state.store.remove_temp_files())
            .await
            .map_err(|err| anyhow!("storage shutdown task failed: {err}"))?
    }
}

impl FileStorage {
    #[cfg(test)]
    fn entry_paths(&self, key: &Key) -> (std::path::PathBuf, std::path::PathBuf) {
        let id = key.storage_id();
        (self.state.store.body_path(&id), self.state.store.meta_path(&id))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::cache::Vary;
    use http::header::{ACCEPT, CACHE_CONTROL, ETAG, VARY};
    use http::{HeaderValue, Method, StatusCode};
    use tempfile::TempDir;

    fn request(path: &str) -> CacheRequest {
        CacheRequest::get(format!("http://example.com{path}").parse().unwrap())
    }

    fn response(body: &'static str) -> HttpResponse {
        HttpResponse::builder(StatusCode::OK)
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .header(ETAG, HeaderValue::from_static("\"v1\""))
            .body(body)
            .build()
    }

    fn key(path: &str) -> Key {
        Key::new(&format!("http://example.com{path}").parse().unwrap(), Vary::empty())
    }

    #[tokio::test]
    async fn stores_and_loads_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;

        storage.insert(&request("/a"), response("payload")).await?;
        let item = storage.get(&key("/a")).await?.expect("stored entry");
        assert_eq!(item.response().body().unwrap().as_ref(), b"payload");
        assert_eq!(item.response().etag(), Some("\"v1\""));
        assert_eq!(storage.size(), 1);

        let (body_path, meta_path) = storage.entry_paths(&key("/a"));
        assert!(body_path.exists());
        assert!(meta_path.exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&meta_path)?.permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
        Ok(())
    }

    #[tokio::test]
    async fn opaque_header_values_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        let title = HeaderValue::from_bytes(b"caf\xe9")?;
        let original = HttpResponse::builder(StatusCode::OK)
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
            .header(http::HeaderName::from_static("x-title"), title.clone())
            .body("payload")
            .build();

        let returned = storage.insert(&request("/a"), original).await?;
        let loaded = storage.get(&key("/a")).await?.expect("stored entry");
        assert_eq!(loaded.response().headers().get("x-title"), Some(&title));
        assert_eq!(loaded.response(), &returned);

        drop(storage);
        let reopened = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        let restored = reopened.get(&key("/a")).await?.expect("restored entry");
        assert_eq!(restored.response().headers().get("x-title"), Some(&title));
        Ok(())
    }

    #[tokio::test]
    async fn reopen_restores_persisted_entries() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        storage.insert(&request("/persist"), response("persisted")).await?;
        drop(storage);

        let reopened = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        assert_eq!(reopened.keys(), vec![key("/persist")]);
        let (_, item) = reopened
            .get_for_request(&request("/persist"))
            .await?
            .expect("entry should be restored from disk");
        assert_eq!(item.response().body().unwrap().as_ref(), b"persisted");
        Ok(())
    }

    #[tokio::test]
    async fn reopen_drops_entries_with_corrupted_body() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        storage.insert(&request("/corrupt"), response("body")).await?;
        let (body_path, meta_path) = storage.entry_paths(&key("/corrupt"));
        fs::write(&body_path, b"tampered")?;
        drop(storage);

        let reopened = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        assert_eq!(reopened.size(), 0);
        assert!(!meta_path.exists());
        assert!(reopened.get(&key("/corrupt")).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn get_drops_entry_with_corrupted_body() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        storage.insert(&request("/a"), response("body")).await?;
        let (body_path, meta_path) = storage.entry_paths(&key("/a"));
        fs::write(&body_path, b"tampered")?;

        assert!(storage.get(&key("/a")).await?.is_none());
        assert!(!meta_path.exists());
        assert_eq!(storage.size(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn reopen_skips_invalid_key_material() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        let shard_dir = storage.disk_dir().join("aa").join("bb");
        fs::create_dir_all(&shard_dir)?;
        let meta_path = shard_dir.join(format!("aabb{}.meta", "0".repeat(60)));
        let persisted = serde_json::json!({
            "key": { "version": 1, "uri": "/relative", "vary": "" },
            "status": 200,
            "headers": [],
            "cached_at_ms": 0,
        });
        fs::write(&meta_path, serde_json::to_vec(&persisted)?)?;
        drop(storage);

        let reopened = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        assert_eq!(reopened.size(), 0);
        assert!(!meta_path.exists(), "invalid key metadata should be removed");
        Ok(())
    }

    #[tokio::test]
    async fn open_removes_leftover_temp_files() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        let temp = storage.disk_dir().join("tmp_orphan");
        fs::write(&temp, b"partial")?;
        drop(storage);

        let _reopened = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        assert!(!temp.exists());
        Ok(())
    }

    #[tokio::test]
    async fn update_keeps_body_and_replaces_headers() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        storage.insert(&request("/a"), response("body")).await?;

        let refreshed = HttpResponse::builder(StatusCode::OK)
            .header(CACHE_CONTROL, HeaderValue::from_static("max-age=120"))
            .header(ETAG, HeaderValue::from_static("\"v1\""))
            .body("body")
            .build();
        storage.update(&request("/a"), refreshed).await?;

        let item = storage.get(&key("/a")).await?.expect("updated entry");
        assert_eq!(item.response().body().unwrap().as_ref(), b"body");
        assert_eq!(
            item.response().headers().get(CACHE_CONTROL).unwrap(),
            "max-age=120"
        );
        assert_eq!(storage.size(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn invalidate_uri_removes_every_variant() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        let varying = |body: &'static str| {
            HttpResponse::builder(StatusCode::OK)
                .header(CACHE_CONTROL, HeaderValue::from_static("max-age=60"))
                .header(VARY, HeaderValue::from_static("Accept"))
                .body(body)
                .build()
        };
        for accept in ["text/html", "text/plain"] {
            let request = CacheRequest::builder(Method::GET, "http://example.com/a".parse()?)
                .header(ACCEPT, HeaderValue::from_static(accept))
                .build();
            storage.insert(&request, varying(accept)).await?;
        }
        storage.insert(&request("/b"), response("other")).await?;
        assert_eq!(storage.size(), 3);

        storage
            .invalidate_uri(&"http://EXAMPLE.com:80/a".parse()?)
            .await?;
        assert_eq!(storage.keys(), vec![key("/b")]);

        storage.invalidate_key(&key("/b")).await?;
        storage.invalidate_key(&key("/b")).await?;
        assert_eq!(storage.size(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn clear_removes_files() -> Result<()> {
        let dir = TempDir::new()?;
        let storage = FileStorage::open(dir.path(), VaryOptions::default()).await?;
        storage.insert(&request("/a"), response("a")).await?;
        let (body_path, meta_path) = storage.entry_paths(&key("/a"));

        storage.clear().await?;
        assert_eq!(storage.size(), 0);
        assert!(!body_path.exists());
        assert!(!meta_path.exists());
        Ok(())
    }
}
