//! Load coalescing: one in-flight load per key, shared by every caller.
//!
//! The first caller for a key registers a [`Shared`] future wrapping a
//! spawned task; later callers clone and await it. Because the work runs in
//! its own task, a caller that goes away never cancels the load the others
//! are waiting on. The task removes its own marker (via [`FlightGuard`])
//! once it has a result, so nothing per-key outlives the load.

use std::future::Future;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use hpfs_core::VPath;
use tracing::warn;

use crate::error::CacheError;

pub type FlightResult = Result<Bytes, CacheError>;

type SharedFlight = Shared<BoxFuture<'static, FlightResult>>;

#[derive(Default)]
pub struct FlightGroup {
    inflight: DashMap<String, SharedFlight>,
}

impl FlightGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the load in flight for `key`, or spawn `task` as a new one.
    ///
    /// Returns the shared result and whether this caller started the load.
    /// `task` must hold a [`FlightGuard`] for `key` on this group.
    pub fn join_or_spawn<F>(&self, key: &VPath, task: F) -> (SharedFlight, bool)
    where
        F: Future<Output = FlightResult> + Send + 'static,
    {
        match self.inflight.entry(key.as_str().to_string()) {
            Entry::Occupied(existing) => (existing.get().clone(), false),
            Entry::Vacant(slot) => {
                // The task cannot remove the marker before it exists: removal
                // waits on the shard lock this entry holds.
                let handle = tokio::spawn(task);
                let key = key.clone();
                let flight = async move {
                    handle.await.unwrap_or_else(|e| {
                        warn!(key = %key, "load task failed: {e}");
                        Err(CacheError::Aborted(key))
                    })
                }
                .boxed()
                .shared();
                slot.insert(flight.clone());
                (flight, true)
            }
        }
    }

    /// Marker that unregisters `key` when dropped, panics included.
    pub fn guard<'a>(&'a self, key: &'a VPath) -> FlightGuard<'a> {
        FlightGuard { group: self, key }
    }

    /// Loads currently in flight.
    pub fn len(&self) -> usize {
        self.inflight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inflight.is_empty()
    }
}

pub struct FlightGuard<'a> {
    group: &'a FlightGroup,
    key: &'a VPath,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.group.inflight.remove(self.key.as_str());
    }
}
