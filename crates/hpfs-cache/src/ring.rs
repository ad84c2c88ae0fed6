//! Consistent hash ring mapping cache keys to peers.
//!
//! Each peer is placed on a 64-bit ring at `replicas` points. A key belongs
//! to the first point at or after its own hash, wrapping at the top. Adding
//! or removing one peer only moves the keys adjacent to that peer's points,
//! roughly `1/n` of the key space.
//!
//! Point positions come from BLAKE3, so every node in the cluster computes
//! the same ring from the same peer list regardless of platform.
//!
//! The ring is immutable once built. Membership changes build a new ring
//! and swap it in (see [`crate::router::PeerRouter`]).

use std::collections::BTreeMap;

/// Virtual points per peer when the config does not say otherwise.
pub const DEFAULT_REPLICAS: usize = 50;

/// Canonical form of a peer address: `host:port` gains an `http://` scheme
/// and a trailing slash is dropped, so `10.0.0.1:7450` and
/// `http://10.0.0.1:7450/` name the same peer.
pub fn normalize_peer(addr: &str) -> String {
    let addr = addr.trim().trim_end_matches('/');
    if addr.is_empty() || addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

#[derive(Debug, Clone, Default)]
pub struct HashRing {
    /// Ring position → index into `peers`
    points: BTreeMap<u64, usize>,
    /// Sorted, de-duplicated, normalized peer addresses
    peers: Vec<String>,
}

impl HashRing {
    /// Build a ring. Input order and duplicates do not affect the result.
    pub fn new<I, S>(peers: I, replicas: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut peers: Vec<String> = peers
            .into_iter()
            .map(|p| normalize_peer(p.as_ref()))
            .filter(|p| !p.is_empty())
            .collect();
        peers.sort();
        peers.dedup();

        let mut points = BTreeMap::new();
        for (idx, peer) in peers.iter().enumerate() {
            for replica in 0..replicas {
                points.insert(position(&format!("{replica}{peer}")), idx);
            }
        }

        HashRing { points, peers }
    }

    /// The peer owning `key`, or `None` for an empty ring.
    pub fn owner(&self, key: &str) -> Option<&str> {
        let hash = position(key);
        let (_, &idx) = self
            .points
            .range(hash..)
            .next()
            .or_else(|| self.points.iter().next())?;
        self.peers.get(idx).map(String::as_str)
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Number of points on the ring.
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

fn position(s: &str) -> u64 {
    let digest = blake3::hash(s.as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(head)
}
