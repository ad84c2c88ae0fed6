//! Distributed read-through content cache.
//!
//! `get(key)`:
//!
//! 1. Local store hit (owned entry or hot-copy): return it, no I/O.
//! 2. Miss, key owned here: join or start a *local* flight, which reads the
//!    backing store once and populates the store.
//! 3. Miss, key owned by a peer: join or start a *forward* flight, which asks
//!    the owner (bounded by `peer_timeout`) and keeps the answer as a
//!    hot-copy. If the owner cannot answer, the flight reads the backing
//!    store directly and caches nothing.
//!
//! Requests from other peers go through `serve_peer`, which only ever uses
//! local flights. A forward therefore never waits on another forward, even
//! while two nodes briefly disagree about who owns a key.
//!
//! Entries are never invalidated: the mirrored tree is treated as immutable
//! for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use futures::FutureExt;
use hpfs_core::VPath;
use hpfs_storage::{BackingStore, StoreError};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::flight::{FlightGroup, FlightResult};
use crate::peer::PeerTransport;
use crate::router::{PeerRouter, Route};
use crate::stats::CacheStats;
use crate::store::ByteStore;

/// Source of truth for keys this node owns.
pub trait Loader: Send + Sync + 'static {
    fn load<'a>(&'a self, key: &'a VPath) -> BoxFuture<'a, Result<Bytes, StoreError>>;
}

impl Loader for BackingStore {
    fn load<'a>(&'a self, key: &'a VPath) -> BoxFuture<'a, Result<Bytes, StoreError>> {
        self.read(key).boxed()
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Byte budget for owned entries and hot-copies together
    pub max_bytes: u64,
    /// Upper bound on a forwarded get
    pub peer_timeout: Duration,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            max_bytes: 64 << 20,
            peer_timeout: Duration::from_secs(2),
        }
    }
}

/// One per node; cheap to clone.
#[derive(Clone)]
pub struct DistributedCache {
    inner: Arc<Inner>,
}

struct Inner {
    router: Arc<PeerRouter>,
    store: ByteStore,
    loader: Arc<dyn Loader>,
    transport: Arc<dyn PeerTransport>,
    local_flights: FlightGroup,
    forward_flights: FlightGroup,
    peer_timeout: Duration,
    stats: Arc<CacheStats>,
}

impl DistributedCache {
    pub fn new(
        router: Arc<PeerRouter>,
        loader: Arc<dyn Loader>,
        transport: Arc<dyn PeerTransport>,
        options: CacheOptions,
    ) -> Self {
        let stats = Arc::new(CacheStats::default());
        DistributedCache {
            inner: Arc::new(Inner {
                router,
                store: ByteStore::new(options.max_bytes, stats.clone()),
                loader,
                transport,
                local_flights: FlightGroup::new(),
                forward_flights: FlightGroup::new(),
                peer_timeout: options.peer_timeout,
                stats,
            }),
        }
    }

    /// Fetch a file's bytes for the local filesystem.
    pub async fn get(&self, key: &VPath) -> Result<Bytes, CacheError> {
        let inner = &self.inner;
        inner.stats.gets.inc();

        if let Some(blob) = inner.store.get(key.as_str()) {
            inner.stats.hits.inc();
            debug!(key = %key, bytes = blob.len(), "cache hit");
            return Ok(blob);
        }

        match inner.router.route(key.as_str()) {
            Route::Local => self.local_flight(key).await,
            Route::Peer(owner) => self.forward_flight(key, owner).await,
        }
    }

    /// Answer a request forwarded by another peer. Never forwards again.
    pub async fn serve_peer(&self, key: &VPath) -> Result<Bytes, CacheError> {
        let inner = &self.inner;
        inner.stats.server_requests.inc();

        if let Some(blob) = inner.store.get(key.as_str()) {
            inner.stats.hits.inc();
            return Ok(blob);
        }
        self.local_flight(key).await
    }

    pub fn router(&self) -> &Arc<PeerRouter> {
        &self.inner.router
    }

    pub fn stats(&self) -> &Arc<CacheStats> {
        &self.inner.stats
    }

    /// True if `key` is held in memory on this node.
    pub fn is_cached(&self, key: &VPath) -> bool {
        self.inner.store.contains(key.as_str())
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.store.used_bytes()
    }

    pub fn max_bytes(&self) -> u64 {
        self.inner.store.max_bytes()
    }

    /// Loads in flight on this node, local and forwarded.
    pub fn inflight(&self) -> usize {
        self.inner.local_flights.len() + self.inner.forward_flights.len()
    }

    async fn local_flight(&self, key: &VPath) -> FlightResult {
        let inner = self.inner.clone();
        let task_key = key.clone();
        let (flight, leader) = self.inner.local_flights.join_or_spawn(key, async move {
            let guard = inner.local_flights.guard(&task_key);
            let result = inner.load_local(&task_key).await;
            drop(guard);
            result
        });
        if !leader {
            self.inner.stats.loads_deduped.inc();
        }
        flight.await
    }

    async fn forward_flight(&self, key: &VPath, owner: String) -> FlightResult {
        let inner = self.inner.clone();
        let task_key = key.clone();
        let (flight, leader) = self.inner.forward_flights.join_or_spawn(key, async move {
            let guard = inner.forward_flights.guard(&task_key);
            let result = inner.load_forward(&task_key, &owner).await;
            drop(guard);
            result
        });
        if !leader {
            self.inner.stats.loads_deduped.inc();
        }
        flight.await
    }
}

impl Inner {
    async fn load_local(&self, key: &VPath) -> FlightResult {
        // A flight that finished between our miss and our registration
        if let Some(blob) = self.store.get(key.as_str()) {
            return Ok(blob);
        }

        self.stats.loads.inc();
        let blob = self.read_backing(key).await?;
        self.store.insert(key.as_str().to_string(), blob.clone());
        debug!(key = %key, bytes = blob.len(), "loaded from backing store");
        Ok(blob)
    }

    async fn load_forward(&self, key: &VPath, owner: &str) -> FlightResult {
        if let Some(blob) = self.store.get(key.as_str()) {
            return Ok(blob);
        }

        self.stats.loads.inc();
        match tokio::time::timeout(self.peer_timeout, self.transport.fetch(owner, key)).await {
            Ok(Ok(blob)) => {
                self.stats.peer_loads.inc();
                self.store.insert(key.as_str().to_string(), blob.clone());
                debug!(key = %key, peer = %owner, bytes = blob.len(), "hot-copy from owner");
                return Ok(blob);
            }
            Ok(Err(e)) => {
                self.stats.peer_errors.inc();
                warn!(key = %key, peer = %owner, "peer fetch failed, reading directly: {e}");
            }
            Err(_) => {
                self.stats.peer_errors.inc();
                warn!(
                    key = %key,
                    peer = %owner,
                    timeout = ?self.peer_timeout,
                    "peer fetch timed out, reading directly"
                );
            }
        }

        // Uncached but correct: the owner will populate itself on its next miss
        self.read_backing(key).await
    }

    async fn read_backing(&self, key: &VPath) -> FlightResult {
        self.stats.local_loads.inc();
        self.loader.load(key).await.map_err(|e| {
            self.stats.local_load_errors.inc();
            if !e.is_not_found() {
                warn!(key = %key, "backing read failed: {e}");
            }
            CacheError::from_store(key, e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::NoPeers;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory backing store that counts reads.
    #[derive(Default)]
    struct MemLoader {
        files: Mutex<HashMap<String, Bytes>>,
        reads: AtomicUsize,
        delay: Duration,
        broken: bool,
    }

    impl MemLoader {
        fn with_files(files: &[(&str, &[u8])]) -> Self {
            let loader = MemLoader::default();
            for (k, v) in files {
                loader
                    .files
                    .lock()
                    .insert(k.to_string(), Bytes::copy_from_slice(v));
            }
            loader
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    impl Loader for MemLoader {
        fn load<'a>(&'a self, key: &'a VPath) -> BoxFuture<'a, Result<Bytes, StoreError>> {
            async move {
                self.reads.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                if self.broken {
                    return Err(StoreError::Io {
                        path: key.clone(),
                        source: std::io::Error::other("device error"),
                    });
                }
                let found = self.files.lock().get(key.as_str()).cloned();
                found.ok_or_else(|| StoreError::NotFound(key.clone()))
            }
            .boxed()
        }
    }

    fn cache_with(loader: Arc<MemLoader>, max_bytes: u64) -> DistributedCache {
        DistributedCache::new(
            Arc::new(PeerRouter::standalone("127.0.0.1:7450")),
            loader,
            Arc::new(NoPeers),
            CacheOptions {
                max_bytes,
                ..CacheOptions::default()
            },
        )
    }

    fn key(s: &str) -> VPath {
        VPath::parse(s).unwrap()
    }

    #[tokio::test]
    async fn second_get_is_a_hit() {
        let loader = Arc::new(MemLoader::with_files(&[("a/f", b"data")]));
        let cache = cache_with(loader.clone(), 1024);

        assert_eq!(cache.get(&key("a/f")).await.unwrap(), Bytes::from_static(b"data"));
        assert_eq!(cache.get(&key("a/f")).await.unwrap(), Bytes::from_static(b"data"));

        assert_eq!(loader.reads(), 1);
        assert_eq!(cache.stats().gets.get(), 2);
        assert_eq!(cache.stats().hits.get(), 1);
        assert!(cache.is_cached(&key("a/f")));
        assert_eq!(cache.inflight(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_misses_read_once() {
        let loader = Arc::new(MemLoader {
            delay: Duration::from_millis(100),
            ..MemLoader::with_files(&[("big.bin", b"0123456789")])
        });
        let cache = cache_with(loader.clone(), 1024);

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let cache = cache.clone();
            tasks.push(tokio::spawn(async move { cache.get(&key("big.bin")).await }));
        }
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), Bytes::from_static(b"0123456789"));
        }

        assert_eq!(loader.reads(), 1);
        assert_eq!(cache.inflight(), 0);
        assert_eq!(cache.stats().loads.get(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn abandoned_caller_does_not_cancel_the_load() {
        let loader = Arc::new(MemLoader {
            delay: Duration::from_millis(200),
            ..MemLoader::with_files(&[("slow", b"eventually")])
        });
        let cache = cache_with(loader.clone(), 1024);

        let first = {
            let cache = cache.clone();
            tokio::spawn(async move { cache.get(&key("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        first.abort();

        // Joins the load the aborted caller started
        assert_eq!(cache.get(&key("slow")).await.unwrap(), Bytes::from_static(b"eventually"));
        assert_eq!(loader.reads(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let loader = Arc::new(MemLoader::default());
        let cache = cache_with(loader, 1024);
        let err = cache.get(&key("ghost")).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cache.inflight(), 0);
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let loader = Arc::new(MemLoader {
            broken: true,
            ..MemLoader::with_files(&[("a/f", b"data")])
        });
        let cache = cache_with(loader.clone(), 1024);

        let err = cache.get(&key("a/f")).await.unwrap_err();
        assert!(matches!(err, CacheError::Load { .. }));
        assert!(!cache.is_cached(&key("a/f")));

        // Next caller tries again
        assert!(cache.get(&key("a/f")).await.is_err());
        assert_eq!(loader.reads(), 2);
        assert_eq!(cache.stats().local_load_errors.get(), 2);
    }

    #[tokio::test]
    async fn respects_byte_budget_with_lru_order() {
        let loader = Arc::new(MemLoader::with_files(&[
            ("a", b"aaaa"),
            ("b", b"bbbb"),
            ("c", b"cccc"),
        ]));
        let cache = cache_with(loader.clone(), 10);

        cache.get(&key("a")).await.unwrap();
        cache.get(&key("b")).await.unwrap();
        cache.get(&key("a")).await.unwrap(); // a is now most recent
        cache.get(&key("c")).await.unwrap();

        assert!(cache.used_bytes() <= cache.max_bytes());
        assert!(cache.is_cached(&key("a")));
        assert!(!cache.is_cached(&key("b")));
        assert!(cache.is_cached(&key("c")));
        assert_eq!(cache.stats().evictions.get(), 1);
    }

    #[tokio::test]
    async fn cached_entry_survives_backing_deletion() {
        let loader = Arc::new(MemLoader::with_files(&[("a/f", b"data")]));
        let cache = cache_with(loader.clone(), 1024);

        cache.get(&key("a/f")).await.unwrap();
        loader.files.lock().remove("a/f");

        assert_eq!(cache.get(&key("a/f")).await.unwrap(), Bytes::from_static(b"data"));
        assert_eq!(loader.reads(), 1);
    }

    #[tokio::test]
    async fn serve_peer_loads_and_caches() {
        let loader = Arc::new(MemLoader::with_files(&[("x", b"payload")]));
        let cache = cache_with(loader.clone(), 1024);

        assert_eq!(cache.serve_peer(&key("x")).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(cache.serve_peer(&key("x")).await.unwrap(), Bytes::from_static(b"payload"));
        assert_eq!(loader.reads(), 1);
        assert_eq!(cache.stats().server_requests.get(), 2);
        assert_eq!(cache.stats().gets.get(), 0);
    }

    #[tokio::test]
    async fn backing_store_is_a_loader() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("a")).unwrap();
        std::fs::write(dir.path().join("a/f"), b"on disk").unwrap();

        let cache = DistributedCache::new(
            Arc::new(PeerRouter::standalone("127.0.0.1:7450")),
            Arc::new(BackingStore::new(dir.path())),
            Arc::new(NoPeers),
            CacheOptions::default(),
        );
        let got = cache.get(&key("a/f")).await.unwrap();
        assert_eq!(&got[..], &std::fs::read(dir.path().join("a/f")).unwrap()[..]);
    }
}
