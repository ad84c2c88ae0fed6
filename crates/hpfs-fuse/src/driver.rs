//! FUSE filesystem driver: mounts the virtual tree as a read-only directory.
//!
//! fuse3's path-based interface hands us absolute paths; every request
//! turns the path into a `VPath` and asks the tree. Attributes are passed
//! through from the backing store unchanged.
//!
//! On `open()` the whole file is fetched through the distributed cache and
//! kept in a handle table until `release()`; `read()` slices it.

#[cfg(feature = "fuse")]
mod inner {
    use std::collections::HashMap;
    use std::ffi::OsStr;
    use std::num::NonZeroU32;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use fuse3::path::prelude::*;
    use fuse3::{Errno, FileType, MountOptions};
    use futures_util::stream;
    use hpfs_core::{types, Attr, NodeKind, VPath};
    use tokio::sync::Mutex;
    use tracing::{debug, info};

    use crate::tree::{FsError, Node, VirtualTree};

    /// An open file handle: the whole file, shared with the cache entry.
    struct FileHandle {
        data: Bytes,
    }

    /// The FUSE filesystem driver.
    pub struct HpfsFs {
        tree: VirtualTree,
        attr_ttl: Duration,
        /// Open file handles: fh → file contents
        handles: Arc<Mutex<HashMap<u64, FileHandle>>>,
        /// Monotonically increasing file-handle counter
        next_fh: Arc<AtomicU64>,
    }

    impl HpfsFs {
        pub fn new(tree: VirtualTree, attr_ttl: Duration) -> Self {
            HpfsFs {
                tree,
                attr_ttl,
                handles: Arc::new(Mutex::new(HashMap::new())),
                next_fh: Arc::new(AtomicU64::new(1)),
            }
        }

        async fn node(&self, path: &OsStr) -> fuse3::Result<Node> {
            let path = vpath(path)?;
            self.tree.resolve(&path).await.map_err(errno)
        }

        /// Attributes for `path` from a single stat.
        async fn attr_of(&self, path: &OsStr) -> fuse3::Result<FileAttr> {
            let node = self.node(path).await?;
            Ok(file_attr(&node.attr))
        }
    }

    fn vpath(path: &OsStr) -> fuse3::Result<VPath> {
        let raw = path.to_str().ok_or(Errno::from(libc::ENOENT))?;
        VPath::parse(raw).map_err(|_| Errno::from(libc::ENOENT))
    }

    fn errno(err: FsError) -> Errno {
        Errno::from(err.errno())
    }

    pub(crate) fn file_type(mode: u32) -> FileType {
        match mode & types::S_IFMT {
            types::S_IFDIR => FileType::Directory,
            types::S_IFLNK => FileType::Symlink,
            types::S_IFBLK => FileType::BlockDevice,
            types::S_IFCHR => FileType::CharDevice,
            types::S_IFIFO => FileType::NamedPipe,
            types::S_IFSOCK => FileType::Socket,
            _ => FileType::RegularFile,
        }
    }

    pub(crate) fn file_attr(attr: &Attr) -> FileAttr {
        FileAttr {
            size: attr.size,
            blocks: attr.size.div_ceil(512),
            atime: attr.atime.into(),
            mtime: attr.mtime.into(),
            ctime: attr.ctime.into(),
            #[cfg(target_os = "macos")]
            crtime: attr.mtime.into(),
            kind: file_type(attr.mode),
            perm: attr.perm(),
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: 4096,
            #[cfg(target_os = "macos")]
            flags: 0,
        }
    }

    /// Fixed figures; the mirror is read-only so nothing is ever free.
    pub(crate) fn fs_stats() -> ReplyStatFs {
        ReplyStatFs {
            blocks: 1 << 30, // fake 1T blocks
            bfree: 0,
            bavail: 0,
            files: 1 << 20,
            ffree: 0,
            bsize: 4096,
            namelen: 255,
            frsize: 4096,
        }
    }

    /// `size` bytes of `data` from `offset`, clamped to the end.
    pub(crate) fn slice(data: &Bytes, offset: u64, size: u32) -> Bytes {
        let len = data.len() as u64;
        if offset >= len {
            return Bytes::new();
        }
        let end = offset.saturating_add(u64::from(size)).min(len);
        data.slice(offset as usize..end as usize)
    }

    // ── PathFilesystem impl ────────────────────────────────────────────────────

    impl PathFilesystem for HpfsFs {
        async fn init(&self, _req: Request) -> fuse3::Result<ReplyInit> {
            debug!(backing = %self.tree.store().root().display(), "hpfs-fuse init");
            Ok(ReplyInit {
                max_write: NonZeroU32::new(128 * 1024).unwrap_or(NonZeroU32::MIN),
            })
        }

        async fn destroy(&self, _req: Request) {
            info!("hpfs-fuse unmounted");
        }

        async fn getattr(
            &self,
            _req: Request,
            path: Option<&OsStr>,
            _fh: Option<u64>,
            _flags: u32,
        ) -> fuse3::Result<ReplyAttr> {
            let path = path.ok_or(Errno::from(libc::ENOENT))?;
            Ok(ReplyAttr {
                ttl: self.attr_ttl,
                attr: self.attr_of(path).await?,
            })
        }

        async fn lookup(
            &self,
            _req: Request,
            parent: &OsStr,
            name: &OsStr,
        ) -> fuse3::Result<ReplyEntry> {
            let name = name.to_str().ok_or(Errno::from(libc::ENOENT))?;
            // A parent that cannot be stat'ed has no children
            let dir = self
                .node(parent)
                .await
                .map_err(|_| Errno::from(libc::ENOENT))?;
            let node = self.tree.lookup(&dir, name).await.map_err(errno)?;
            Ok(ReplyEntry {
                ttl: self.attr_ttl,
                attr: file_attr(&node.attr),
            })
        }

        // Directory entry stream types
        type DirEntryStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
        where
            Self: 'a;

        type DirEntryPlusStream<'a>
            = stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
        where
            Self: 'a;

        async fn readdir<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: i64,
        ) -> fuse3::Result<ReplyDirectory<Self::DirEntryStream<'a>>> {
            let dir = self.node(path).await?;
            let children = self.tree.list_children(&dir).await.map_err(errno)?;

            let mut entries: Vec<fuse3::Result<DirectoryEntry>> = Vec::new();
            if offset == 0 {
                entries.push(Ok(DirectoryEntry {
                    kind: FileType::Directory,
                    name: ".".into(),
                    offset: 1,
                }));
            }
            if offset <= 1 {
                entries.push(Ok(DirectoryEntry {
                    kind: FileType::Directory,
                    name: "..".into(),
                    offset: 2,
                }));
            }

            for (i, child) in children.into_iter().enumerate() {
                let next_offset = i as i64 + 3;
                if next_offset <= offset {
                    continue;
                }
                let kind = match child.kind {
                    NodeKind::Directory => FileType::Directory,
                    NodeKind::File => FileType::RegularFile,
                    // Symlinks and specials: report what lookup will see
                    NodeKind::Other => match dir.path.join(&child.name) {
                        Some(path) => match self.tree.resolve(&path).await {
                            Ok(node) => file_type(node.attr.mode),
                            Err(_) => FileType::Symlink,
                        },
                        None => continue,
                    },
                };
                entries.push(Ok(DirectoryEntry {
                    kind,
                    name: child.name.into(),
                    offset: next_offset,
                }));
            }

            Ok(ReplyDirectory {
                entries: stream::iter(entries),
            })
        }

        async fn readdirplus<'a>(
            &'a self,
            _req: Request,
            path: &'a OsStr,
            _fh: u64,
            offset: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>> {
            let dir = self.node(path).await?;
            let children = self.tree.list_children(&dir).await.map_err(errno)?;

            let mut entries: Vec<fuse3::Result<DirectoryEntryPlus>> = Vec::new();
            let offset = offset as i64;

            if offset == 0 {
                entries.push(Ok(DirectoryEntryPlus {
                    kind: FileType::Directory,
                    name: ".".into(),
                    offset: 1,
                    attr: file_attr(&dir.attr),
                    entry_ttl: self.attr_ttl,
                    attr_ttl: self.attr_ttl,
                }));
            }
            if offset <= 1 {
                entries.push(Ok(DirectoryEntryPlus {
                    kind: FileType::Directory,
                    name: "..".into(),
                    offset: 2,
                    attr: file_attr(&dir.attr),
                    entry_ttl: self.attr_ttl,
                    attr_ttl: self.attr_ttl,
                }));
            }

            for (i, child) in children.into_iter().enumerate() {
                let next_offset = i as i64 + 3;
                if next_offset <= offset {
                    continue;
                }
                // Vanished or dangling entries are left out of the listing
                let node = match self.tree.lookup(&dir, &child.name).await {
                    Ok(node) => node,
                    Err(e) => {
                        debug!(dir = %dir.path, name = %child.name, "skipping entry: {e}");
                        continue;
                    }
                };
                let attr = file_attr(&node.attr);
                entries.push(Ok(DirectoryEntryPlus {
                    kind: attr.kind,
                    name: child.name.into(),
                    offset: next_offset,
                    attr,
                    entry_ttl: self.attr_ttl,
                    attr_ttl: self.attr_ttl,
                }));
            }

            Ok(ReplyDirectoryPlus {
                entries: stream::iter(entries),
            })
        }

        async fn opendir(
            &self,
            _req: Request,
            path: &OsStr,
            _flags: u32,
        ) -> fuse3::Result<ReplyOpen> {
            let dir = self.node(path).await?;
            if dir.kind != NodeKind::Directory {
                return Err(Errno::from(libc::ENOTDIR));
            }
            Ok(ReplyOpen { fh: 0, flags: 0 })
        }

        async fn open(&self, _req: Request, path: &OsStr, flags: u32) -> fuse3::Result<ReplyOpen> {
            let accmode = flags as i32 & libc::O_ACCMODE;
            if accmode != libc::O_RDONLY {
                return Err(Errno::from(libc::EROFS));
            }

            let node = self.node(path).await?;
            let data = self.tree.read_all(&node).await.map_err(errno)?;
            debug!(path = %node.path, bytes = data.len(), "opened");

            let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
            self.handles.lock().await.insert(fh, FileHandle { data });

            Ok(ReplyOpen { fh, flags: 0 })
        }

        async fn read(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            offset: u64,
            size: u32,
        ) -> fuse3::Result<ReplyData> {
            let handles = self.handles.lock().await;
            let handle = handles.get(&fh).ok_or(Errno::from(libc::EBADF))?;
            Ok(ReplyData {
                data: slice(&handle.data, offset, size),
            })
        }

        async fn release(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            fh: u64,
            _flags: u32,
            _lock_owner: u64,
            _flush: bool,
        ) -> fuse3::Result<()> {
            self.handles.lock().await.remove(&fh);
            Ok(())
        }

        async fn flush(
            &self,
            _req: Request,
            _path: Option<&OsStr>,
            _fh: u64,
            _lock_owner: u64,
        ) -> fuse3::Result<()> {
            Ok(())
        }

        async fn statfs(&self, _req: Request, _path: &OsStr) -> fuse3::Result<ReplyStatFs> {
            Ok(fs_stats())
        }
    }

    // ── Public mount API ──────────────────────────────────────────────────────

    /// Mount configuration
    pub struct MountConfig {
        pub tree: VirtualTree,
        pub mountpoint: std::path::PathBuf,
        pub fs_name: String,
        pub attr_ttl: Duration,
        pub allow_other: bool,
    }

    /// Mount the filesystem read-only and block until unmounted.
    ///
    /// Call from an async context. Returns when the filesystem is unmounted
    /// (e.g. via `fusermount3 -u <mountpoint>`).
    pub async fn mount(cfg: MountConfig) -> std::io::Result<()> {
        let fs = HpfsFs::new(cfg.tree, cfg.attr_ttl);

        let mut opts = MountOptions::default();
        opts.fs_name(cfg.fs_name);
        opts.read_only(true);
        opts.force_readdir_plus(true);
        if cfg.allow_other {
            opts.allow_other(true);
        }

        info!(
            mountpoint = %cfg.mountpoint.display(),
            "mounting hpfs (unprivileged via fusermount3)"
        );

        let handle = Session::new(opts)
            .mount_with_unprivileged(fs, &cfg.mountpoint)
            .await?;

        handle.await
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use std::time::SystemTime;

        fn attr(mode: u32, size: u64) -> Attr {
            Attr {
                size,
                mode,
                nlink: 1,
                uid: 1000,
                gid: 100,
                atime: SystemTime::UNIX_EPOCH,
                mtime: SystemTime::UNIX_EPOCH,
                ctime: SystemTime::UNIX_EPOCH,
            }
        }

        #[test]
        fn attributes_pass_through() {
            let fa = file_attr(&attr(types::S_IFREG | 0o640, 1025));
            assert_eq!(fa.kind, FileType::RegularFile);
            assert_eq!(fa.perm, 0o640);
            assert_eq!(fa.size, 1025);
            assert_eq!(fa.blocks, 3);
            assert_eq!((fa.uid, fa.gid), (1000, 100));

            assert_eq!(file_attr(&attr(types::S_IFDIR | 0o755, 0)).kind, FileType::Directory);
            assert_eq!(file_type(types::S_IFLNK | 0o777), FileType::Symlink);
            assert_eq!(file_type(types::S_IFIFO | 0o600), FileType::NamedPipe);
        }

        fn fs_over(root: &std::path::Path) -> HpfsFs {
            use hpfs_cache::{CacheOptions, DistributedCache, NoPeers, PeerRouter};
            use hpfs_storage::BackingStore;

            let store = BackingStore::new(root);
            let cache = DistributedCache::new(
                Arc::new(PeerRouter::standalone("127.0.0.1:7450")),
                Arc::new(store.clone()),
                Arc::new(NoPeers),
                CacheOptions::default(),
            );
            HpfsFs::new(VirtualTree::new(store, cache), Duration::from_secs(1))
        }

        #[tokio::test]
        async fn attr_of_reports_backing_attributes() {
            let dir = tempfile::tempdir().unwrap();
            std::fs::write(dir.path().join("f"), b"12345").unwrap();
            let fs = fs_over(dir.path());

            let fa = fs.attr_of(OsStr::new("/f")).await.unwrap();
            assert_eq!(fa.kind, FileType::RegularFile);
            assert_eq!(fa.size, 5);
            assert_eq!(
                fs.attr_of(OsStr::new("/")).await.unwrap().kind,
                FileType::Directory
            );

            let err = fs.attr_of(OsStr::new("/missing")).await.unwrap_err();
            assert_eq!(err, Errno::from(libc::ENOENT));
        }

        #[test]
        fn statfs_figures_are_fixed_and_full() {
            let stats = fs_stats();
            assert_eq!(stats.files, 1 << 20);
            assert_eq!(stats.blocks, 1 << 30);
            assert_eq!((stats.bfree, stats.bavail, stats.ffree), (0, 0, 0));
            // Same answer whatever the cache budget
            assert_eq!(fs_stats().files, stats.files);
        }

        #[test]
        fn slice_clamps_to_file_end() {
            let data = Bytes::from_static(b"hello world");
            assert_eq!(slice(&data, 0, 5), Bytes::from_static(b"hello"));
            assert_eq!(slice(&data, 6, 100), Bytes::from_static(b"world"));
            assert!(slice(&data, 11, 10).is_empty());
            assert!(slice(&data, u64::MAX, u32::MAX).is_empty());
        }
    }
}

#[cfg(feature = "fuse")]
pub use inner::{mount, HpfsFs, MountConfig};
