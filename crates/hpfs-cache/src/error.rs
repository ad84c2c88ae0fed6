use std::sync::Arc;

use hpfs_core::VPath;
use hpfs_storage::StoreError;
use thiserror::Error;

/// Result of a cache lookup, shared by every caller of a coalesced load.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("{0}: not found")]
    NotFound(VPath),

    #[error("loading {key} failed: {source}")]
    Load {
        key: VPath,
        #[source]
        source: Arc<StoreError>,
    },

    #[error("load task for {0} aborted")]
    Aborted(VPath),
}

impl CacheError {
    pub fn from_store(key: &VPath, err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => CacheError::NotFound(key.clone()),
            other => CacheError::Load {
                key: key.clone(),
                source: Arc::new(other),
            },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound(_))
    }
}
