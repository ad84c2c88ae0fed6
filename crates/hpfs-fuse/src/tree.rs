//! Virtual filesystem tree over the backing directory.
//!
//! Nodes are recomputed from their path on every call: attributes and
//! listings come straight from the backing store, file contents come
//! through the distributed cache.

use bytes::Bytes;
use hpfs_cache::DistributedCache;
use hpfs_core::{Attr, NodeKind, VPath};
use hpfs_storage::{BackingStore, DirEntry, StoreError};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FsError {
    #[error("{0}: no such file or directory")]
    NotFound(VPath),

    #[error(transparent)]
    Io(StoreError),
}

impl FsError {
    /// errno for the kernel reply.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound(_) => libc::ENOENT,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<StoreError> for FsError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(path) => FsError::NotFound(path),
            other => FsError::Io(other),
        }
    }
}

/// A backing entry as seen at the time it was stat'ed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub path: VPath,
    pub kind: NodeKind,
    pub attr: Attr,
}

impl Node {
    fn new(path: VPath, attr: Attr) -> Self {
        Node {
            path,
            kind: attr.kind(),
            attr,
        }
    }
}

#[derive(Clone)]
pub struct VirtualTree {
    store: BackingStore,
    cache: DistributedCache,
}

impl VirtualTree {
    pub fn new(store: BackingStore, cache: DistributedCache) -> Self {
        VirtualTree { store, cache }
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn cache(&self) -> &DistributedCache {
        &self.cache
    }

    pub async fn root(&self) -> Result<Node, FsError> {
        self.resolve(&VPath::root()).await
    }

    /// Stat a full path into a node.
    pub async fn resolve(&self, path: &VPath) -> Result<Node, FsError> {
        let attr = self.store.stat(path).await?;
        Ok(Node::new(path.clone(), attr))
    }

    /// Fresh attributes for `node`.
    pub async fn attr(&self, node: &Node) -> Result<Attr, FsError> {
        Ok(self.store.stat(&node.path).await?)
    }

    /// Find `name` inside `dir`. Any failure to stat the child is reported
    /// as not found.
    pub async fn lookup(&self, dir: &Node, name: &str) -> Result<Node, FsError> {
        let path = dir.path.join(name).ok_or_else(|| {
            debug!(dir = %dir.path, name, "rejected lookup name");
            FsError::NotFound(dir.path.clone())
        })?;
        match self.store.stat(&path).await {
            Ok(attr) => Ok(Node::new(path, attr)),
            Err(StoreError::NotFound(path)) => Err(FsError::NotFound(path)),
            Err(e) => {
                warn!(path = %path, "lookup failed, reporting ENOENT: {e}");
                Err(FsError::NotFound(path))
            }
        }
    }

    /// Immediate children of `dir`, re-read from the backing store.
    pub async fn list_children(&self, dir: &Node) -> Result<Vec<DirEntry>, FsError> {
        Ok(self.store.read_dir(&dir.path).await?)
    }

    /// Whole contents of a regular file, through the cache.
    pub async fn read_all(&self, file: &Node) -> Result<Bytes, FsError> {
        if file.kind != NodeKind::File {
            return Err(FsError::NotFound(file.path.clone()));
        }
        self.cache.get(&file.path).await.map_err(|e| {
            if !e.is_not_found() {
                warn!(path = %file.path, "read failed, reporting ENOENT: {e}");
            }
            FsError::NotFound(file.path.clone())
        })
    }
}
