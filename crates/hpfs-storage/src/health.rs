//! Backing store health check

use crate::store::{BackingStore, StoreError};

/// Verify the backing root exists and is a directory
pub async fn check_health(store: &BackingStore) -> Result<(), StoreError> {
    let meta = tokio::fs::metadata(store.root())
        .await
        .map_err(|e| StoreError::from_io(hpfs_core::VPath::root(), e))?;
    if !meta.is_dir() {
        return Err(StoreError::Io {
            path: hpfs_core::VPath::root(),
            source: std::io::Error::other(format!(
                "backing root {} is not a directory",
                store.root().display()
            )),
        });
    }
    Ok(())
}

/// Returns true if the backing root is usable, false otherwise (non-panicking)
pub async fn is_healthy(store: &BackingStore) -> bool {
    check_health(store).await.is_ok()
}
