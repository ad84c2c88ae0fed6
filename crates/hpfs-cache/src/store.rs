//! Byte-budgeted LRU store for cached file contents.
//!
//! ```text
//! ByteStore
//!   blobs: DashMap<key, Bytes>            hot path, sharded, no global lock
//!   lru:   Mutex<LruState>                recency order + byte accounting
//! ```
//!
//! A hit reads the blob from the sharded map and then bumps recency. Inserts
//! and evictions hold the LRU mutex for their whole critical section, and
//! every map mutation happens under it, so `used` always equals the sum of
//! the sizes in `blobs`.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use lru::LruCache;
use parking_lot::Mutex;
use tracing::debug;

use crate::stats::CacheStats;

struct LruState {
    /// key → blob size; front = most recently used
    order: LruCache<String, u64>,
    used: u64,
}

pub struct ByteStore {
    blobs: DashMap<String, Bytes>,
    lru: Mutex<LruState>,
    max_bytes: u64,
    stats: Arc<CacheStats>,
}

impl ByteStore {
    pub fn new(max_bytes: u64, stats: Arc<CacheStats>) -> Self {
        ByteStore {
            blobs: DashMap::new(),
            lru: Mutex::new(LruState {
                order: LruCache::unbounded(),
                used: 0,
            }),
            max_bytes,
            stats,
        }
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        let blob = self.blobs.get(key).map(|entry| entry.value().clone())?;
        self.lru.lock().order.get(key);
        Some(blob)
    }

    /// Insert or replace `key`, then evict least-recently-used entries until
    /// the store is back within budget. An entry larger than the whole
    /// budget is dropped on arrival and leaves the other entries alone.
    pub fn insert(&self, key: String, blob: Bytes) {
        let size = blob.len() as u64;
        let mut lru = self.lru.lock();

        if size > self.max_bytes {
            if let Some(old) = lru.order.pop(&key) {
                lru.used = lru.used.saturating_sub(old);
                self.blobs.remove(&key);
            }
            self.stats.evictions.inc();
            debug!(
                key = %key,
                bytes = size,
                max = self.max_bytes,
                "entry exceeds budget, not cached"
            );
            self.update_gauges(&lru);
            return;
        }

        if let Some(old) = lru.order.put(key.clone(), size) {
            lru.used = lru.used.saturating_sub(old);
        }
        lru.used += size;
        self.blobs.insert(key, blob);

        while lru.used > self.max_bytes {
            let Some((victim, victim_size)) = lru.order.pop_lru() else {
                break;
            };
            lru.used = lru.used.saturating_sub(victim_size);
            self.blobs.remove(&victim);
            self.stats.evictions.inc();
            debug!(key = %victim, bytes = victim_size, "evicted");
        }

        self.update_gauges(&lru);
    }

    fn update_gauges(&self, lru: &LruState) {
        self.stats.bytes.set(i64::try_from(lru.used).unwrap_or(i64::MAX));
        self.stats.items.set(i64::try_from(lru.order.len()).unwrap_or(i64::MAX));
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs.contains_key(key)
    }

    pub fn used_bytes(&self) -> u64 {
        self.lru.lock().used
    }

    pub fn len(&self) -> usize {
        self.lru.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store(max: u64) -> ByteStore {
        ByteStore::new(max, Arc::new(CacheStats::default()))
    }

    fn blob(n: usize) -> Bytes {
        Bytes::from(vec![b'x'; n])
    }

    #[test]
    fn insert_and_get() {
        let s = store(100);
        s.insert("a/f".into(), Bytes::from_static(b"data"));
        assert_eq!(s.get("a/f").unwrap(), Bytes::from_static(b"data"));
        assert_eq!(s.used_bytes(), 4);
        assert!(s.get("missing").is_none());
    }

    #[test]
    fn evicts_least_recently_used_first() {
        let s = store(10);
        s.insert("a".into(), blob(4));
        s.insert("b".into(), blob(4));
        // Touch a so b becomes the oldest
        assert!(s.get("a").is_some());
        s.insert("c".into(), blob(4));

        assert!(s.contains("a"));
        assert!(!s.contains("b"));
        assert!(s.contains("c"));
        assert_eq!(s.used_bytes(), 8);
        assert_eq!(s.stats.evictions.get(), 1);
    }

    #[test]
    fn replace_adjusts_accounting() {
        let s = store(100);
        s.insert("a".into(), blob(40));
        s.insert("a".into(), blob(10));
        assert_eq!(s.used_bytes(), 10);
        assert_eq!(s.len(), 1);
        assert_eq!(s.get("a").unwrap().len(), 10);
    }

    #[test]
    fn oversized_entry_is_not_kept() {
        let s = store(8);
        s.insert("small".into(), blob(4));
        s.insert("huge".into(), blob(9));
        assert!(!s.contains("huge"));
        // Resident entries survive an entry that could never fit
        assert!(s.contains("small"));
        assert_eq!(s.used_bytes(), 4);
        assert_eq!(s.len(), 1);
        assert_eq!(s.stats.evictions.get(), 1);

        // Repeated oversized inserts keep the cache intact
        s.insert("huge".into(), blob(9));
        assert!(s.contains("small"));
    }

    #[test]
    fn oversized_replacement_drops_the_old_value() {
        let s = store(8);
        s.insert("a".into(), blob(4));
        s.insert("b".into(), blob(2));
        s.insert("a".into(), blob(20));
        assert!(!s.contains("a"));
        assert!(s.contains("b"));
        assert_eq!(s.used_bytes(), 2);
    }

    #[test]
    fn zero_budget_caches_nothing() {
        let s = store(0);
        s.insert("a".into(), blob(1));
        assert!(s.is_empty());
        // Empty blobs fit in any budget
        s.insert("empty".into(), Bytes::new());
        assert!(s.contains("empty"));
    }

    #[test]
    fn gauges_track_contents() {
        let s = store(100);
        s.insert("a".into(), blob(30));
        s.insert("b".into(), blob(20));
        assert_eq!(s.stats.bytes.get(), 50);
        assert_eq!(s.stats.items.get(), 2);
    }

    proptest! {
        #[test]
        fn never_exceeds_budget(
            budget in 0u64..256,
            ops in prop::collection::vec((0usize..16, 0usize..96, any::<bool>()), 1..200),
        ) {
            let s = store(budget);
            for (key, size, touch) in ops {
                let key = format!("k{key}");
                if touch {
                    s.get(&key);
                }
                s.insert(key, blob(size));
                prop_assert!(s.used_bytes() <= budget);

                let held: u64 = s.blobs.iter().map(|e| e.value().len() as u64).sum();
                prop_assert_eq!(held, s.used_bytes());
                prop_assert_eq!(s.blobs.len(), s.len());
            }
        }
    }
}
