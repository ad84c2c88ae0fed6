//! hpfs-storage: read-only access to the mirrored backing directory

pub mod health;
pub mod store;

pub use health::{check_health, is_healthy};
pub use store::{BackingStore, DirEntry, StoreError};
