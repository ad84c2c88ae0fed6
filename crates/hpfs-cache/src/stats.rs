//! Cache counters, exportable through a prometheus-client registry.

use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Lookups from the local filesystem
    pub gets: Counter,
    /// Lookups answered from memory (owned entries and hot-copies)
    pub hits: Counter,
    /// Misses that started a load (local or forwarded)
    pub loads: Counter,
    /// Callers that joined a load already in flight
    pub loads_deduped: Counter,
    /// Backing-store reads
    pub local_loads: Counter,
    pub local_load_errors: Counter,
    /// Successful fetches from an owning peer
    pub peer_loads: Counter,
    /// Forwards that failed or timed out and fell back to the backing store
    pub peer_errors: Counter,
    /// Requests served on behalf of other peers
    pub server_requests: Counter,
    pub evictions: Counter,
    /// Bytes currently held
    pub bytes: Gauge,
    /// Entries currently held
    pub items: Gauge,
}

impl CacheStats {
    pub fn register(&self, registry: &mut Registry) {
        let counters = [
            ("hpfs_cache_gets", "Cache lookups", &self.gets),
            ("hpfs_cache_hits", "Lookups served from memory", &self.hits),
            ("hpfs_cache_loads", "Misses that started a load", &self.loads),
            (
                "hpfs_cache_loads_deduped",
                "Callers that joined an in-flight load",
                &self.loads_deduped,
            ),
            ("hpfs_cache_local_loads", "Backing store reads", &self.local_loads),
            ("hpfs_cache_local_load_errors", "Failed backing store reads", &self.local_load_errors),
            ("hpfs_cache_peer_loads", "Values fetched from the owning peer", &self.peer_loads),
            (
                "hpfs_cache_peer_errors",
                "Peer fetches that fell back to a direct read",
                &self.peer_errors,
            ),
            (
                "hpfs_cache_server_requests",
                "Requests served for other peers",
                &self.server_requests,
            ),
            ("hpfs_cache_evictions", "Entries evicted to stay within budget", &self.evictions),
        ];
        for (name, help, counter) in counters {
            registry.register(name, help, counter.clone());
        }
        registry.register("hpfs_cache_bytes", "Bytes held in the cache", self.bytes.clone());
        registry.register("hpfs_cache_items", "Entries held in the cache", self.items.clone());
    }
}
