use std::io;

use http::{Method, Uri};
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Failures surfaced by [`crate::HttpCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    /// The resolver failed and no cached response could stand in.
    #[error("failed to resolve {method} {uri}")]
    Transport {
        method: Method,
        uri: Uri,
        #[source]
        source: io::Error,
    },
    #[error("cache storage failed to {operation}")]
    Storage {
        operation: &'static str,
        #[source]
        source: BoxError,
    },
}

impl CacheError {
    pub(crate) fn storage(operation: &'static str, source: anyhow::Error) -> Self {
        CacheError::Storage {
            operation,
            source: source.into(),
        }
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, CacheError::Transport { .. })
    }
}
