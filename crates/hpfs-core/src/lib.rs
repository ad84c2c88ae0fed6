pub mod config;
pub mod error;
pub mod types;

pub use error::{HpfsError, HpfsResult};
pub use types::{Attr, InvalidPath, NodeKind, VPath};

/// Generated gRPC types and service traits (from hpfs.proto)
pub mod proto {
    tonic::include_proto!("hpfs");
}
