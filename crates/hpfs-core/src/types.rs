use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use thiserror::Error;

// POSIX file-type bits of `st_mode`. Identical on every platform fuse3 supports.
pub const S_IFMT: u32 = 0o170_000;
pub const S_IFSOCK: u32 = 0o140_000;
pub const S_IFLNK: u32 = 0o120_000;
pub const S_IFREG: u32 = 0o100_000;
pub const S_IFBLK: u32 = 0o060_000;
pub const S_IFDIR: u32 = 0o040_000;
pub const S_IFCHR: u32 = 0o020_000;
pub const S_IFIFO: u32 = 0o010_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid path {path:?}: {reason}")]
pub struct InvalidPath {
    pub path: String,
    pub reason: &'static str,
}

/// A location inside the mirrored tree, relative to its root.
///
/// Components are joined with `/`; the root is the empty path. The string
/// form doubles as the cache key, so two distinct entries must never share
/// one: `parse` normalizes and `join` only ever appends a single component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VPath(String);

impl VPath {
    pub fn root() -> Self {
        VPath(String::new())
    }

    /// Normalize a `/`-separated path. Empty and `.` components are dropped;
    /// `..` is rejected so the result can never escape the root.
    pub fn parse(raw: &str) -> Result<Self, InvalidPath> {
        if raw.contains('\0') {
            return Err(InvalidPath {
                path: raw.to_string(),
                reason: "contains NUL",
            });
        }
        let mut parts = Vec::new();
        for part in raw.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(InvalidPath {
                        path: raw.to_string(),
                        reason: "parent component",
                    })
                }
                p => parts.push(p),
            }
        }
        Ok(VPath(parts.join("/")))
    }

    /// Append one child name. Returns `None` for names that are not a single
    /// plain component.
    pub fn join(&self, name: &str) -> Option<VPath> {
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
            return None;
        }
        if self.0.is_empty() {
            Some(VPath(name.to_string()))
        } else {
            Some(VPath(format!("{}/{}", self.0, name)))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Last component; empty for the root.
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    /// The cache key form (no leading slash).
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve against the backing directory.
    pub fn to_fs_path(&self, root: &Path) -> PathBuf {
        if self.0.is_empty() {
            root.to_path_buf()
        } else {
            root.join(&self.0)
        }
    }
}

impl fmt::Display for VPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0)
    }
}

impl TryFrom<String> for VPath {
    type Error = InvalidPath;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        VPath::parse(&value)
    }
}

impl From<VPath> for String {
    fn from(value: VPath) -> Self {
        value.0
    }
}

/// How the virtual tree treats an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Directory,
    File,
    /// Symlinks (when not followed), devices, fifos, sockets
    Other,
}

impl NodeKind {
    pub fn from_mode(mode: u32) -> Self {
        match mode & S_IFMT {
            S_IFDIR => NodeKind::Directory,
            S_IFREG => NodeKind::File,
            _ => NodeKind::Other,
        }
    }
}

/// Attributes of a backing-store entry, passed through unchanged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    pub size: u64,
    /// Raw `st_mode`: file-type bits plus permissions
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub atime: SystemTime,
    pub mtime: SystemTime,
    pub ctime: SystemTime,
}

impl Attr {
    pub fn kind(&self) -> NodeKind {
        NodeKind::from_mode(self.mode)
    }

    /// Permission bits only (setuid/setgid/sticky included).
    pub fn perm(&self) -> u16 {
        (self.mode & 0o7777) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_normalizes() {
        assert_eq!(VPath::parse("/a//b/./c/").unwrap().as_str(), "a/b/c");
        assert_eq!(VPath::parse("").unwrap(), VPath::root());
        assert_eq!(VPath::parse("/").unwrap(), VPath::root());
        assert_eq!(VPath::parse("./x").unwrap().as_str(), "x");
    }

    #[test]
    fn parse_rejects_escape() {
        assert!(VPath::parse("a/../../etc/passwd").is_err());
        assert!(VPath::parse("..").is_err());
        assert!(VPath::parse("a\0b").is_err());
    }

    #[test]
    fn join_single_component() {
        let root = VPath::root();
        let a = root.join("a").unwrap();
        assert_eq!(a.as_str(), "a");
        assert_eq!(a.join("f").unwrap().as_str(), "a/f");
        assert_eq!(a.join("f").unwrap().name(), "f");

        assert!(a.join("").is_none());
        assert!(a.join(".").is_none());
        assert!(a.join("..").is_none());
        assert!(a.join("x/y").is_none());
    }

    #[test]
    fn join_is_injective() {
        // "a" + "b/c" would collide with "a/b" + "c" if slashes were allowed
        let ab = VPath::parse("a/b").unwrap().join("c").unwrap();
        assert!(VPath::parse("a").unwrap().join("b/c").is_none());
        assert_eq!(ab.as_str(), "a/b/c");

        let x = VPath::parse("ab").unwrap().join("c").unwrap();
        let y = VPath::parse("a").unwrap().join("bc").unwrap();
        assert_ne!(x, y);
    }

    #[test]
    fn display_has_leading_slash() {
        assert_eq!(VPath::root().to_string(), "/");
        assert_eq!(VPath::parse("a/f").unwrap().to_string(), "/a/f");
    }

    #[test]
    fn to_fs_path_joins_root() {
        let root = Path::new("/srv/data");
        assert_eq!(VPath::root().to_fs_path(root), PathBuf::from("/srv/data"));
        assert_eq!(
            VPath::parse("a/f").unwrap().to_fs_path(root),
            PathBuf::from("/srv/data/a/f")
        );
    }

    #[test]
    fn kind_from_mode_bits() {
        assert_eq!(NodeKind::from_mode(S_IFDIR | 0o755), NodeKind::Directory);
        assert_eq!(NodeKind::from_mode(S_IFREG | 0o644), NodeKind::File);
        assert_eq!(NodeKind::from_mode(S_IFLNK | 0o777), NodeKind::Other);
        assert_eq!(NodeKind::from_mode(S_IFIFO | 0o600), NodeKind::Other);
    }

    #[test]
    fn attr_perm_strips_type_bits() {
        let attr = Attr {
            size: 4,
            mode: S_IFREG | 0o644,
            nlink: 1,
            uid: 0,
            gid: 0,
            atime: SystemTime::UNIX_EPOCH,
            mtime: SystemTime::UNIX_EPOCH,
            ctime: SystemTime::UNIX_EPOCH,
        };
        assert_eq!(attr.perm(), 0o644);
        assert_eq!(attr.kind(), NodeKind::File);
    }
}
