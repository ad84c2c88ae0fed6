//! hpfs-fuse: the mirrored directory as a virtual tree, and the async FUSE
//! driver that serves it
//!
//! Linux: fuse3 crate (kernel FUSE)
//! macOS: fuse3 with macFUSE 4.x (feature: macos-fuse)

pub mod driver;
pub mod tree;

// Re-export the mount API when the fuse feature is enabled
#[cfg(feature = "fuse")]
pub use driver::{mount, HpfsFs, MountConfig};

pub use tree::{FsError, Node, VirtualTree};
