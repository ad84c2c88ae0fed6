//! tonic gRPC client for the peer cache protocol

use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use futures::future::BoxFuture;
use futures::FutureExt;
use hpfs_core::proto::{peer_cache_client::PeerCacheClient, GetRequest};
use hpfs_core::VPath;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;
use tracing::debug;

use crate::peer::{PeerTransport, TransportError};

/// Forwards cache misses to peers over gRPC.
///
/// One lazily connected channel is kept per peer address.
pub struct GrpcTransport {
    clients: DashMap<String, PeerCacheClient<Channel>>,
    timeout: Duration,
    max_message_bytes: usize,
}

impl GrpcTransport {
    pub fn new(timeout: Duration, max_message_bytes: usize) -> Self {
        GrpcTransport {
            clients: DashMap::new(),
            timeout,
            max_message_bytes,
        }
    }

    /// Drop channels to peers no longer in `peers`.
    pub fn retain_peers(&self, peers: &[String]) {
        self.clients.retain(|addr, _| peers.contains(addr));
    }

    fn client(&self, peer: &str) -> Result<PeerCacheClient<Channel>, TransportError> {
        if let Some(client) = self.clients.get(peer) {
            return Ok(client.clone());
        }

        let endpoint = Endpoint::from_shared(peer.to_string())
            .map_err(|e| TransportError::Unreachable {
                peer: peer.to_string(),
                reason: format!("invalid address: {e}"),
            })?
            .connect_timeout(self.timeout)
            .timeout(self.timeout);

        debug!(peer = %peer, "opening peer channel");
        let client = PeerCacheClient::new(endpoint.connect_lazy())
            .max_decoding_message_size(self.max_message_bytes);
        self.clients.insert(peer.to_string(), client.clone());
        Ok(client)
    }
}

impl PeerTransport for GrpcTransport {
    fn fetch<'a>(
        &'a self,
        peer: &'a str,
        key: &'a VPath,
    ) -> BoxFuture<'a, Result<Bytes, TransportError>> {
        async move {
            let mut client = self.client(peer)?;
            let response = client
                .get(GetRequest {
                    key: key.as_str().to_string(),
                })
                .await
                .map_err(|status| status_error(peer, self.timeout, status))?;
            Ok(Bytes::from(response.into_inner().value))
        }
        .boxed()
    }
}

fn status_error(peer: &str, timeout: Duration, status: tonic::Status) -> TransportError {
    match status.code() {
        Code::DeadlineExceeded | Code::Cancelled => TransportError::Timeout {
            peer: peer.to_string(),
            timeout,
        },
        Code::Unavailable => TransportError::Unreachable {
            peer: peer.to_string(),
            reason: status.message().to_string(),
        },
        code => TransportError::Status {
            peer: peer.to_string(),
            code: format!("{code:?}"),
            message: status.message().to_string(),
        },
    }
}
