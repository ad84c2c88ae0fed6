//! The seam between the cache and whatever carries requests between peers.

use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use hpfs_core::VPath;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("peer {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("peer {peer} answered {code}: {message}")]
    Status {
        peer: String,
        code: String,
        message: String,
    },
}

/// Fetches a key's bytes from the peer that owns it.
///
/// Implementations make one attempt; the cache applies its own timeout and
/// recovers from any error by reading the backing store directly.
pub trait PeerTransport: Send + Sync + 'static {
    fn fetch<'a>(&'a self, peer: &'a str, key: &'a VPath)
        -> BoxFuture<'a, Result<Bytes, TransportError>>;
}

/// Transport for a node running without a cluster.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPeers;

impl PeerTransport for NoPeers {
    fn fetch<'a>(
        &'a self,
        peer: &'a str,
        _key: &'a VPath,
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        async move {
            Err(TransportError::Unreachable {
                peer: peer.to_string(),
                reason: "no peer transport configured".into(),
            })
        }
        .boxed()
    }
}
