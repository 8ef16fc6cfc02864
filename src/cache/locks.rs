use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use http::Uri;
use tokio::sync::{Mutex, MutexGuard};

const LOCK_STRIPES: usize = 64;

/// Striped per-URI locks.
///
/// Every variant of a URI maps to the same stripe, so URI-wide invalidation
/// and single-key writes are ordered against each other. Unrelated URIs only
/// contend on a stripe collision.
#[derive(Debug)]
pub(super) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(super) fn new() -> Self {
        Self {
            stripes: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(super) async fn lock(&self, uri: &Uri) -> MutexGuard<'_, ()> {
        self.stripes[Self::stripe(uri)].lock().await
    }

    fn stripe(uri: &Uri) -> usize {
        let mut hasher = DefaultHasher::new();
        uri.hash(&mut hasher);
        (hasher.finish() % LOCK_STRIPES as u64) as usize
    }
}
