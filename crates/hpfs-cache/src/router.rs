//! Peer membership and key routing.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::ring::{normalize_peer, HashRing};

/// Where a key's authoritative copy lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// This node owns the key (or there is no cluster)
    Local,
    /// Another peer owns the key
    Peer(String),
}

/// Routes keys over the current peer set.
///
/// The ring is swapped whole on membership change; a `route` call that
/// started on the old ring finishes on it.
pub struct PeerRouter {
    self_addr: String,
    replicas: usize,
    ring: RwLock<Arc<HashRing>>,
}

impl PeerRouter {
    pub fn new<I, S>(self_addr: &str, peers: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        PeerRouter {
            self_addr: normalize_peer(self_addr),
            replicas,
            ring: RwLock::new(Arc::new(HashRing::new(peers, replicas))),
        }
    }

    /// A router with no peers: every key is local.
    pub fn standalone(self_addr: &str) -> Self {
        Self::new(self_addr, Vec::<String>::new(), crate::ring::DEFAULT_REPLICAS)
    }

    pub fn self_addr(&self) -> &str {
        &self.self_addr
    }

    pub fn route(&self, key: &str) -> Route {
        let ring = self.ring();
        match ring.owner(key) {
            Some(owner) if owner != self.self_addr => Route::Peer(owner.to_string()),
            _ => Route::Local,
        }
    }

    /// Replace the peer set.
    pub fn update_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let ring = Arc::new(HashRing::new(peers, self.replicas));
        info!(
            peers = ring.peers().len(),
            includes_self = ring.peers().contains(&self.self_addr),
            "peer set updated"
        );
        *self.ring.write() = ring;
    }

    /// Snapshot of the current peer set.
    pub fn peers(&self) -> Vec<String> {
        self.ring().peers().to_vec()
    }

    fn ring(&self) -> Arc<HashRing> {
        self.ring.read().clone()
    }
}
