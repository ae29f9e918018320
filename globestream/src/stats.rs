//! Streaming statistics for observability.
//!
//! Lock-free atomic counters recorded by the resource pipeline, plus a
//! point-in-time [`StatsSnapshot`] copy for display or assertions. Counters
//! are monotonic; gauges (in-flight downloads, memory totals) are overwritten
//! each tick by their owning phase.
//!
//! ```text
//! Pipeline phases ─────► MapStatistics ─────► StatsSnapshot ─────► Views
//!                        (atomic counters)    (point-in-time copy)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters recorded by the resource manager and traversal engine.
#[derive(Debug, Default)]
pub struct MapStatistics {
    downloads_started: AtomicU64,
    downloads_completed: AtomicU64,
    downloads_failed: AtomicU64,
    bytes_downloaded: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_writes: AtomicU64,
    decode_failures: AtomicU64,
    resources_created: AtomicU64,
    resources_released: AtomicU64,
    nodes_rendered: AtomicU64,
    nodes_culled: AtomicU64,
    /// Gauge: downloads currently in flight.
    downloads_in_flight: AtomicU64,
    /// Gauge: total ram + gpu cost of live resources, in bytes.
    resources_memory: AtomicU64,
}

impl MapStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn download_started(&self) {
        self.downloads_started.fetch_add(1, Ordering::Relaxed);
        self.downloads_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn download_completed(&self, bytes: u64) {
        self.downloads_completed.fetch_add(1, Ordering::Relaxed);
        self.bytes_downloaded.fetch_add(bytes, Ordering::Relaxed);
        self.downloads_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn download_failed(&self) {
        self.downloads_failed.fetch_add(1, Ordering::Relaxed);
        self.downloads_in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_write(&self) {
        self.cache_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_created(&self) {
        self.resources_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn resource_released(&self) {
        self.resources_released.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_rendered(&self) {
        self.nodes_rendered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn node_culled(&self) {
        self.nodes_culled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_resources_memory(&self, bytes: u64) {
        self.resources_memory.store(bytes, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            downloads_started: self.downloads_started.load(Ordering::Relaxed),
            downloads_completed: self.downloads_completed.load(Ordering::Relaxed),
            downloads_failed: self.downloads_failed.load(Ordering::Relaxed),
            bytes_downloaded: self.bytes_downloaded.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_writes: self.cache_writes.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            resources_created: self.resources_created.load(Ordering::Relaxed),
            resources_released: self.resources_released.load(Ordering::Relaxed),
            nodes_rendered: self.nodes_rendered.load(Ordering::Relaxed),
            nodes_culled: self.nodes_culled.load(Ordering::Relaxed),
            downloads_in_flight: self.downloads_in_flight.load(Ordering::Relaxed),
            resources_memory: self.resources_memory.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`MapStatistics`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub downloads_started: u64,
    pub downloads_completed: u64,
    pub downloads_failed: u64,
    pub bytes_downloaded: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_writes: u64,
    pub decode_failures: u64,
    pub resources_created: u64,
    pub resources_released: u64,
    pub nodes_rendered: u64,
    pub nodes_culled: u64,
    pub downloads_in_flight: u64,
    pub resources_memory: u64,
}
