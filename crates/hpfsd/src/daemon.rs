//! Daemon lifecycle: startup, health checks, peer server, reload, mount

use anyhow::{Context, Result};
use hpfs_cache::{CacheOptions, DistributedCache, GrpcTransport, PeerRouter};
use hpfs_core::config::HpfsConfig;
use hpfs_fuse::VirtualTree;
use hpfs_storage::BackingStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};

use crate::grpc::PeerCacheImpl;
use crate::ConfigSource;

pub async fn run(source: ConfigSource, config: HpfsConfig) -> Result<()> {
    info!("daemon starting");

    // Backing directory
    let store = BackingStore::new(&config.fuse.backing_dir);
    match hpfs_storage::check_health(&store).await {
        Ok(()) => info!(backing = %config.fuse.backing_dir.display(), "backing directory ready"),
        Err(e) => warn!(backing = %config.fuse.backing_dir.display(), "backing directory: {e}"),
    }

    // Cache and peer routing
    let router = Arc::new(PeerRouter::new(
        &config.peers.self_addr,
        &config.peers.peers,
        config.peers.replicas,
    ));
    let peer_timeout = Duration::from_millis(config.peers.timeout_ms);
    let transport = Arc::new(GrpcTransport::new(
        peer_timeout,
        config.peers.max_message_bytes(),
    ));
    let cache = DistributedCache::new(
        router.clone(),
        Arc::new(store.clone()),
        transport.clone(),
        CacheOptions {
            max_bytes: config.cache.max_bytes(),
            peer_timeout,
        },
    );
    info!(
        self_addr = %router.self_addr(),
        peers = router.peers().len(),
        max_mb = config.cache.max_mb,
        "cache ready"
    );

    // Peer gRPC server
    let listener = tokio::net::TcpListener::bind(&config.peers.listen)
        .await
        .with_context(|| format!("binding peer listener {}", config.peers.listen))?;
    let peer_service = PeerCacheImpl::new(cache.clone());
    let max_message_bytes = config.peers.max_message_bytes();
    tokio::spawn(async move {
        if let Err(e) = crate::grpc::serve(listener, peer_service, max_message_bytes).await {
            error!("peer server failed: {e}");
        }
    });

    // Start Prometheus metrics endpoint
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let mut registry = prometheus_client::registry::Registry::default();
        cache.stats().register(&mut registry);
        let state = crate::metrics::HealthState {
            registry: Arc::new(registry),
            store: store.clone(),
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, state).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    // SIGHUP: re-read the peer list
    let mut hangup = signal(SignalKind::hangup()).context("installing SIGHUP handler")?;
    let reload_router = router.clone();
    let reload_transport = transport.clone();
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            match source.reload() {
                Ok(fresh) => {
                    reload_router.update_peers(&fresh.peers.peers);
                    reload_transport.retain_peers(&reload_router.peers());
                }
                Err(e) => warn!("config reload failed, keeping current peers: {e:#}"),
            }
        }
    });

    let tree = VirtualTree::new(store, cache);

    // Send systemd ready notification
    notify_ready();

    serve_tree(&config, tree).await
}

#[cfg(feature = "fuse")]
async fn serve_tree(config: &HpfsConfig, tree: VirtualTree) -> Result<()> {
    let mount = hpfs_fuse::mount(hpfs_fuse::MountConfig {
        tree,
        mountpoint: config.fuse.mountpoint.clone(),
        fs_name: config.fuse.fs_name.clone(),
        attr_ttl: Duration::from_secs(config.fuse.attr_ttl_secs),
        allow_other: config.fuse.allow_other,
    });

    tokio::select! {
        res = mount => {
            res.with_context(|| format!("mounting {}", config.fuse.mountpoint.display()))?;
            info!("filesystem unmounted, exiting");
        }
        _ = tokio::signal::ctrl_c() => {
            info!(
                mountpoint = %config.fuse.mountpoint.display(),
                "interrupted, releasing mount"
            );
        }
    }
    Ok(())
}

/// Without FUSE the node still serves its share of the cache to peers.
#[cfg(not(feature = "fuse"))]
async fn serve_tree(_config: &HpfsConfig, _tree: VirtualTree) -> Result<()> {
    warn!("built without the fuse feature: serving peers only");
    tokio::signal::ctrl_c().await?;
    info!("interrupted, exiting");
    Ok(())
}

fn notify_ready() {
    // Send sd_notify(READY=1) to systemd if running as a service
    // Uses $NOTIFY_SOCKET env var; no-op if not set
    if let Ok(socket) = std::env::var("NOTIFY_SOCKET") {
        use std::os::unix::net::UnixDatagram;
        if let Ok(sock) = UnixDatagram::unbound() {
            let _ = sock.send_to(b"READY=1\n", &socket);
            tracing::debug!(notify_socket = %socket, "sent systemd READY=1");
        }
    }
}
