//! tonic gRPC server for peer cache requests over TCP

use anyhow::Result;
use hpfs_cache::{CacheError, DistributedCache};
use hpfs_core::proto::{
    peer_cache_server::{PeerCache, PeerCacheServer},
    GetRequest, GetResponse,
};
use hpfs_core::VPath;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, info};

/// Answers `Get` for keys forwarded by other peers.
pub struct PeerCacheImpl {
    cache: DistributedCache,
}

impl PeerCacheImpl {
    pub fn new(cache: DistributedCache) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl PeerCache for PeerCacheImpl {
    async fn get(
        &self,
        request: tonic::Request<GetRequest>,
    ) -> Result<tonic::Response<GetResponse>, tonic::Status> {
        let raw = request.into_inner().key;
        let key = VPath::parse(&raw).map_err(|e| tonic::Status::invalid_argument(e.to_string()))?;
        if key.is_root() {
            return Err(tonic::Status::invalid_argument("empty key"));
        }

        debug!(key = %key, "peer get");
        let value = self.cache.serve_peer(&key).await.map_err(|e| match e {
            CacheError::NotFound(_) => tonic::Status::not_found(e.to_string()),
            CacheError::Load { .. } | CacheError::Aborted(_) => {
                tonic::Status::unavailable(e.to_string())
            }
        })?;
        Ok(tonic::Response::new(GetResponse {
            value: value.to_vec(),
        }))
    }
}

/// Serve the peer cache on an already bound listener.
pub async fn serve(
    listener: TcpListener,
    impl_: PeerCacheImpl,
    max_message_bytes: usize,
) -> Result<()> {
    let addr = listener.local_addr()?;
    let stream = TcpListenerStream::new(listener);

    info!(addr = %addr, "gRPC: peer cache server ready");

    Server::builder()
        .add_service(
            PeerCacheServer::new(impl_)
                .max_encoding_message_size(max_message_bytes)
                .max_decoding_message_size(max_message_bytes),
        )
        .serve_with_incoming(stream)
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}
