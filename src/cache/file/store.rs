use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use blake3::Hasher;
use bytes::Bytes;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use super::PersistedItem;

pub(super) const TEMP_PREFIX: &str = "tmp_";

/// Path layout and file I/O of one versioned storage directory.
#[derive(Debug, Clone)]
pub(super) struct FileStore {
    disk_dir: PathBuf,
}

impl FileStore {
    pub(super) fn new(disk_dir: PathBuf) -> Self {
        Self { disk_dir }
    }

    pub(super) fn disk_dir(&self) -> &Path {
        &self.disk_dir
    }

    pub(super) fn body_path(&self, storage_id: &str) -> PathBuf {
        let (first, remainder) = storage_id.split_at(2);
        let (second, _) = remainder.split_at(2);
        self.disk_dir.join(first).join(second).join(storage_id)
    }

    pub(super) fn meta_path(&self, storage_id: &str) -> PathBuf {
        let mut path = self.body_path(storage_id);
        path.set_extension("meta");
        path
    }

    fn temp_path(&self) -> PathBuf {
        self.disk_dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }

    pub(super) fn remove_temp_files(&self) -> Result<()> {
        if !self.disk_dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.disk_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|name| name.starts_with(TEMP_PREFIX))
                    .unwrap_or(false)
            {
                fs::remove_file(&path).ok();
            }
        }
        Ok(())
    }

    pub(super) fn body_hash_matches(&self, path: &Path, expected_hex: &str) -> bool {
        let mut file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return false,
        };
        let mut hasher = Hasher::new();
        let mut buf = [0u8; 8192];
        loop {
            match std::io::Read::read(&mut file, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buf[..n]);
                }
                Err(_) => return false,
            }
        }
        hasher.finalize().to_hex().to_string() == expected_hex
    }

    pub(super) fn remove_entry_files_from_meta(&self, meta_path: &Path) {
        fs::remove_file(meta_path).ok();
        if let Some(stem) = meta_path.file_stem().and_then(|s| s.to_str()) {
            fs::remove_file(meta_path.with_file_name(stem)).ok();
        }
    }

    pub(super) async fn remove_entry_files_async(&self, storage_id: &str) {
        let _ = async_fs::remove_file(self.meta_path(storage_id)).await;
        let _ = async_fs::remove_file(self.body_path(storage_id)).await;
        self.prune_empty_shards(storage_id).await;
    }

    async fn dir_is_empty(path: &Path) -> bool {
        let mut entries = match async_fs::read_dir(path).await {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        matches!(entries.next_entry().await, Ok(None))
    }

    async fn prune_empty_shards(&self, storage_id: &str) {
        let body_path = self.body_path(storage_id);
        let Some(shard2) = body_path.parent().map(Path::to_path_buf) else {
            return;
        };
        if Self::dir_is_empty(&shard2).await {
            let _ = async_fs::remove_dir(&shard2).await;
        }
        let Some(shard1) = shard2.parent().map(Path::to_path_buf) else {
            return;
        };
        if shard1 == self.disk_dir {
            return;
        }
        if Self::dir_is_empty(&shard1).await {
            let _ = async_fs::remove_dir(&shard1).await;
        }
    }

    /// Reads the metadata of `storage_id`; `Ok(None)` when there is none.
    pub(super) async fn read_metadata_async(&self, storage_id: &str) -> Result<Option<Vec<u8>>> {
        let meta_path = self.meta_path(storage_id);
        match async_fs::read(&meta_path).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read cache metadata {}", meta_path.display())),
        }
    }

    pub(super) async fn read_body_async(&self, storage_id: &str) -> Result<Option<Bytes>> {
        let body_path = self.body_path(storage_id);
        match async_fs::read(&body_path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err)
                .with_context(|| format!("failed to read cache body {}", body_path.display())),
        }
    }

    pub(super) async fn write_body_async(&self, storage_id: &str, body: &[u8]) -> Result<()> {
        self.write_atomic(&self.body_path(storage_id), body).await
    }

    pub(super) async fn write_metadata_async(
        &self,
        storage_id: &str,
        item: &PersistedItem,
    ) -> Result<()> {
        let data = serde_json::to_vec(item)?;
        self.write_atomic(&self.meta_path(storage_id), &data).await
    }

    /// Writes `data` to a temp file and renames it over `path`.
    async fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<()> {
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create cache shard {}", parent.display()))?;
        }
        let temp_path = self.temp_path();
        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options
            .open(&temp_path)
            .await
            .with_context(|| format!("failed to create cache file {}", temp_path.display()))?;
        file.write_all(data).await?;
        file.flush().await?;
        drop(file);

        if let Err(err) = async_fs::rename(&temp_path, path).await {
            async_fs::remove_file(&temp_path).await.ok();
            return Err(err)
                .with_context(|| format!("failed to move cache file into {}", path.display()));
        }
        Ok(())
    }
}
