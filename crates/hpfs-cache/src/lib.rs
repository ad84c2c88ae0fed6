//! hpfs-cache: distributed, size-bounded, read-through content cache
//!
//! Each node owns the keys the hash ring assigns to it. A miss on an owned
//! key is loaded from the backing store once, however many callers are
//! waiting; a miss on someone else's key is forwarded to its owner and the
//! answer kept as a local hot-copy.

pub mod cache;
pub mod error;
pub mod flight;
pub mod peer;
pub mod ring;
pub mod router;
pub mod stats;
pub mod store;
pub mod transport;

pub use cache::{CacheOptions, DistributedCache, Loader};
pub use error::CacheError;
pub use peer::{NoPeers, PeerTransport, TransportError};
pub use ring::{normalize_peer, HashRing, DEFAULT_REPLICAS};
pub use router::{PeerRouter, Route};
pub use stats::CacheStats;
pub use store::ByteStore;
pub use transport::GrpcTransport;
