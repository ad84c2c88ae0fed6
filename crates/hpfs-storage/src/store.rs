//! Backing store accessor.
//!
//! Every call goes straight to the real filesystem: `read` performs a full
//! read of the file each time and nothing is buffered here. Caching belongs
//! to `hpfs-cache`; retries, if any, belong to the caller.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hpfs_core::{Attr, NodeKind, VPath};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}: not found")]
    NotFound(VPath),

    #[error("{path}: {source}")]
    Io {
        path: VPath,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    /// Classify an I/O error. `ENOTDIR` counts as absence: a path through a
    /// regular file does not exist.
    pub fn from_io(path: VPath, err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound | io::ErrorKind::NotADirectory => StoreError::NotFound(path),
            _ => StoreError::Io { path, source: err },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Raw OS error code when one is available.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            StoreError::NotFound(_) => None,
            StoreError::Io { source, .. } => source.raw_os_error(),
        }
    }
}

/// One immediate child of a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: NodeKind,
}

/// Read-only view of the mirrored directory.
#[derive(Debug, Clone)]
pub struct BackingStore {
    root: PathBuf,
}

impl BackingStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        BackingStore { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stat an entry, following symlinks.
    pub async fn stat(&self, path: &VPath) -> Result<Attr, StoreError> {
        let meta = tokio::fs::metadata(path.to_fs_path(&self.root))
            .await
            .map_err(|e| StoreError::from_io(path.clone(), e))?;
        Ok(attr_from_metadata(&meta))
    }

    /// Read the whole file.
    pub async fn read(&self, path: &VPath) -> Result<Bytes, StoreError> {
        let data = tokio::fs::read(path.to_fs_path(&self.root))
            .await
            .map_err(|e| StoreError::from_io(path.clone(), e))?;
        debug!(path = %path, bytes = data.len(), "backing read");
        Ok(Bytes::from(data))
    }

    /// List the immediate children of a directory, sorted by name.
    ///
    /// Entries are classified without following symlinks. Names that are not
    /// valid UTF-8 have no `VPath` and are skipped.
    pub async fn read_dir(&self, path: &VPath) -> Result<Vec<DirEntry>, StoreError> {
        let err = |e| StoreError::from_io(path.clone(), e);
        let mut dir = tokio::fs::read_dir(path.to_fs_path(&self.root))
            .await
            .map_err(err)?;

        let mut out = Vec::new();
        while let Some(entry) = dir.next_entry().await.map_err(err)? {
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(raw) => {
                    debug!(dir = %path, name = ?raw, "skipping non-UTF-8 entry");
                    continue;
                }
            };
            let file_type = match entry.file_type().await {
                Ok(ft) => ft,
                // Removed between readdir and lstat
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(err(e)),
            };
            let kind = if file_type.is_dir() {
                NodeKind::Directory
            } else if file_type.is_file() {
                NodeKind::File
            } else {
                NodeKind::Other
            };
            out.push(DirEntry { name, kind });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }
}

fn attr_from_metadata(meta: &std::fs::Metadata) -> Attr {
    Attr {
        size: meta.size(),
        mode: meta.mode(),
        nlink: u32::try_from(meta.nlink()).unwrap_or(u32::MAX),
        uid: meta.uid(),
        gid: meta.gid(),
        atime: meta.accessed().unwrap_or(UNIX_EPOCH),
        mtime: meta.modified().unwrap_or(UNIX_EPOCH),
        ctime: unix_time(meta.ctime(), meta.ctime_nsec()),
    }
}

fn unix_time(secs: i64, nsecs: i64) -> SystemTime {
    let nsecs = u32::try_from(nsecs).unwrap_or(0);
    match u64::try_from(secs) {
        Ok(secs) => UNIX_EPOCH + Duration::new(secs, nsecs),
        Err(_) => UNIX_EPOCH,
    }
}
