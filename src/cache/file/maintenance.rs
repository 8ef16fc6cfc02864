use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs as async_fs;
use tracing::{debug, warn};

use super::entry::valid_body_hash;
use super::{FileState, PersistedItem};
use crate::cache::Key;

const LAYOUT_VERSION: u32 = 1;
const VERSION_PREFIX: &str = "v";
const TOMBSTONE_PREFIX: &str = "tombstone-";

pub(super) fn version_dir(root: &Path) -> PathBuf {
    root.join(format!("{VERSION_PREFIX}{LAYOUT_VERSION}"))
}

fn parse_layout_version(name: &str) -> Option<u32> {
    let version = name.strip_prefix(VERSION_PREFIX)?;
    if version.is_empty() || !version.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    version.parse().ok()
}

fn tombstone_dir_name(version_name: &str) -> String {
    format!("{TOMBSTONE_PREFIX}{version_name}-{}", uuid::Uuid::new_v4())
}

/// Creates the active layout directory under `root` and tombstones the
/// directories of other layout versions. Returns the active directory and
/// the directories left to delete.
pub(super) async fn prepare_versioned_dir(root: &Path) -> Result<(PathBuf, Vec<PathBuf>)> {
    async_fs::create_dir_all(root)
        .await
        .with_context(|| format!("failed to create storage root {}", root.display()))?;

    let active_name = format!("{VERSION_PREFIX}{LAYOUT_VERSION}");
    let active_dir = version_dir(root);
    async_fs::create_dir_all(&active_dir)
        .await
        .with_context(|| format!("failed to create storage dir {}", active_dir.display()))?;

    let mut cleanup_dirs = Vec::new();
    let mut entries = match async_fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Ok((active_dir, cleanup_dirs));
        }
        Err(err) => return Err(err.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str == active_name {
            continue;
        }
        if name_str.starts_with(TOMBSTONE_PREFIX) {
            cleanup_dirs.push(entry.path());
            continue;
        }
        if parse_layout_version(&name_str).is_some() {
            let tombstone_path = root.join(tombstone_dir_name(&name_str));
            if let Err(err) = async_fs::rename(entry.path(), &tombstone_path).await {
                warn!(
                    error = %err,
                    path = %entry.path().display(),
                    "failed to tombstone old storage dir"
                );
                continue;
            }
            cleanup_dirs.push(tombstone_path);
        }
    }

    Ok((active_dir, cleanup_dirs))
}

pub(super) fn spawn_dir_cleanup(dirs: Vec<PathBuf>) {
    for dir in dirs {
        tokio::spawn(async move {
            match async_fs::remove_dir_all(&dir).await {
                Ok(()) => {
                    crate::metrics::record_cache_cleanup_dir();
                    debug!(path = %dir.display(), "removed old storage dir");
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(
                        error = %err,
                        path = %dir.display(),
                        "failed to remove old storage dir"
                    );
                }
            }
        });
    }
}

impl FileState {
    /// Walks the shard tree, dropping temp files, orphaned bodies and
    /// entries that fail validation, and fills the catalog with the rest.
    pub(super) fn rebuild_from_disk(&self) -> Result<()> {
        self.store.remove_temp_files()?;
        self.catalog.write().clear();

        if !self.store.disk_dir().exists() {
            return Ok(());
        }

        for shard1 in fs::read_dir(self.store.disk_dir())? {
            let shard1 = shard1?;
            if !shard1.file_type()?.is_dir() {
                continue;
            }
            for shard2 in fs::read_dir(shard1.path())? {
                let shard2 = shard2?;
                if !shard2.file_type()?.is_dir() {
                    continue;
                }
                let mut meta_files = Vec::new();
                let mut other_files = Vec::new();
                for entry in fs::read_dir(shard2.path())? {
                    let entry = entry?;
                    let path = entry.path();
                    if entry.file_type()?.is_file() {
                        if path.extension().and_then(|ext| ext.to_str()) == Some("meta") {
                            meta_files.push(path);
                        } else {
                            other_files.push(path);
                        }
                    }
                }

                let mut live_ids = HashSet::new();
                for meta in meta_files {
                    if let Some(id) = self.restore_entry_from_meta(&meta) {
                        live_ids.insert(id);
                    }
                }

                for path in other_files {
                    let keep = path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| live_ids.contains(n))
                        .unwrap_or(false);
                    if !keep {
                        fs::remove_file(&path).ok();
                    }
                }

                if fs::read_dir(shard2.path())?.next().is_none() {
                    fs::remove_dir_all(shard2.path()).ok();
                }
            }
            if fs::read_dir(shard1.path())?.next().is_none() {
                fs::remove_dir_all(shard1.path()).ok();
            }
        }
        Ok(())
    }

    fn restore_entry_from_meta(&self, meta_path: &Path) -> Option<String> {
        let data = match fs::read(meta_path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(
                    "failed to read storage metadata {}: {}",
                    meta_path.display(),
                    err
                );
                return None;
            }
        };

        let persisted: PersistedItem = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(
                    "failed to parse storage metadata {}: {}",
                    meta_path.display(),
                    err
                );
                self.store.remove_entry_files_from_meta(meta_path);
                return None;
            }
        };

        let key = match Key::from_properties(&persisted.key) {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    error = %err,
                    path = %meta_path.display(),
                    "invalid persisted key; removing entry"
                );
                self.store.remove_entry_files_from_meta(meta_path);
                return None;
            }
        };

        let storage_id = key.storage_id();
        let file_stem = meta_path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if storage_id != file_stem {
            warn!(
                expected = %storage_id,
                actual = file_stem,
                "storage metadata key mismatch; removing entry"
            );
            self.store.remove_entry_files_from_meta(meta_path);
            return None;
        }

        if let Some(body_hash) = persisted.body_hash.as_deref() {
            if !valid_body_hash(body_hash) {
                warn!(
                    "storage metadata {} has invalid body hash; removing entry",
                    meta_path.display()
                );
                self.store.remove_entry_files_from_meta(meta_path);
                return None;
            }
            let body_path = self.store.body_path(&storage_id);
            if !self.store.body_hash_matches(&body_path, body_hash) {
                warn!(
                    "stored body hash mismatch for {}; removing entry",
                    body_path.display()
                );
                self.store.remove_entry_files_from_meta(meta_path);
                return None;
            }
        }

        self.catalog_insert(key);
        Some(storage_id)
    }
}
