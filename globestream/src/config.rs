//! Runtime tuning surface for the streaming core.
//!
//! `MapOptions` collects every knob the resource pipeline and the traversal
//! engine consult: per-tick work budgets, download concurrency, retry and
//! redirect bounds, the memory budget driving eviction, and the disk cache
//! switches. Components hold a shared copy; nothing re-reads configuration
//! files at runtime.
//!
//! # Example
//!
//! ```
//! use globestream::config::MapOptions;
//!
//! let options = MapOptions::default()
//!     .with_max_concurrent_downloads(10)
//!     .with_target_resources_memory(256 * 1024 * 1024);
//!
//! assert_eq!(options.max_concurrent_downloads, 10);
//! ```

use std::path::PathBuf;

/// Default number of simultaneously running downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: u32 = 25;

/// Default number of resources processed per data tick.
pub const DEFAULT_MAX_RESOURCE_PROCESSES_PER_TICK: u32 = 10;

/// Default number of traverse-node updates resolved per frame.
pub const DEFAULT_MAX_NODE_UPDATES_PER_TICK: u32 = 16;

/// Default memory budget for live resources (ram + gpu cost), in bytes.
pub const DEFAULT_TARGET_RESOURCES_MEMORY: u64 = 512 * 1024 * 1024;

/// Default bound on HTTP redirects followed for a single resource.
pub const DEFAULT_MAX_FETCH_REDIRECTIONS: u32 = 5;

/// Default bound on fetch retries before a resource fails permanently.
pub const DEFAULT_MAX_FETCH_RETRIES: u32 = 5;

/// Default base delay for the exponential retry backoff, in seconds.
///
/// The k-th retry is scheduled `base * 2^k` seconds after the failure.
pub const DEFAULT_FETCH_RETRY_BASE_DELAY_SECS: i64 = 15;

/// Default screen-space coarseness threshold, in pixels.
///
/// A node whose projected texel stays under this many pixels at every corner
/// is coarse enough to render without recursing into children.
pub const DEFAULT_MAX_TEXEL_TO_PIXEL_SCALE: f64 = 1.2;

/// Default number of render ticks an untouched resource is still exempt from
/// eviction after its last access.
pub const DEFAULT_EVICTION_GRACE_TICKS: u64 = 1;

/// Default idle time, in seconds, before a traverse node's subtree is pruned.
pub const DEFAULT_NODE_RELEASE_TIMEOUT_SECS: i64 = 5;

/// Configuration consumed by the resource manager and the traversal engine.
#[derive(Clone, Debug)]
pub struct MapOptions {
    /// Maximum simultaneously running downloads.
    pub max_concurrent_downloads: u32,

    /// Maximum resources processed per `data_tick` call.
    pub max_resource_processes_per_tick: u32,

    /// Maximum traverse-node resolutions per traversal pass.
    pub max_node_updates_per_tick: u32,

    /// Memory budget (ram + gpu cost of live resources), in bytes.
    pub target_resources_memory: u64,

    /// Maximum redirects followed before a fetch is treated as failed.
    pub max_fetch_redirections: u32,

    /// Maximum retries before a resource becomes permanently failed.
    pub max_fetch_retries: u32,

    /// Base delay of the exponential retry backoff, in seconds.
    pub fetch_retry_base_delay_secs: i64,

    /// Screen-space coarseness threshold, in pixels.
    pub max_texel_to_pixel_scale: f64,

    /// Render ticks of grace before an untouched resource may be evicted.
    pub eviction_grace_ticks: u64,

    /// Seconds before an untouched traverse node's children are released.
    pub node_release_timeout_secs: i64,

    /// Master switch for the disk cache.
    pub disk_cache_enabled: bool,

    /// Root directory of the disk cache.
    pub cache_root: PathBuf,

    /// Derive cache paths by hashing names (nested MD5 buckets) instead of
    /// mirroring the url hierarchy.
    pub hash_cache_paths: bool,

    /// Re-download resources whose stored expiry has elapsed.
    pub runtime_expiration_enabled: bool,

    /// Persist payloads that failed to decode, for postmortem inspection.
    pub debug_save_corrupted_files: bool,

    /// Directory receiving corrupted payloads when
    /// `debug_save_corrupted_files` is set.
    pub corrupted_files_dir: PathBuf,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            max_resource_processes_per_tick: DEFAULT_MAX_RESOURCE_PROCESSES_PER_TICK,
            max_node_updates_per_tick: DEFAULT_MAX_NODE_UPDATES_PER_TICK,
            target_resources_memory: DEFAULT_TARGET_RESOURCES_MEMORY,
            max_fetch_redirections: DEFAULT_MAX_FETCH_REDIRECTIONS,
            max_fetch_retries: DEFAULT_MAX_FETCH_RETRIES,
            fetch_retry_base_delay_secs: DEFAULT_FETCH_RETRY_BASE_DELAY_SECS,
            max_texel_to_pixel_scale: DEFAULT_MAX_TEXEL_TO_PIXEL_SCALE,
            eviction_grace_ticks: DEFAULT_EVICTION_GRACE_TICKS,
            node_release_timeout_secs: DEFAULT_NODE_RELEASE_TIMEOUT_SECS,
            disk_cache_enabled: true,
            cache_root: PathBuf::from("cache"),
            hash_cache_paths: true,
            runtime_expiration_enabled: false,
            debug_save_corrupted_files: false,
            corrupted_files_dir: PathBuf::from("corrupted"),
        }
    }
}

impl MapOptions {
    /// Set the download concurrency bound.
    pub fn with_max_concurrent_downloads(mut self, n: u32) -> Self {
        self.max_concurrent_downloads = n;
        self
    }

    /// Set the per-data-tick resource processing budget.
    pub fn with_max_resource_processes_per_tick(mut self, n: u32) -> Self {
        self.max_resource_processes_per_tick = n;
        self
    }

    /// Set the per-frame node update budget.
    pub fn with_max_node_updates_per_tick(mut self, n: u32) -> Self {
        self.max_node_updates_per_tick = n;
        self
    }

    /// Set the resource memory budget in bytes.
    pub fn with_target_resources_memory(mut self, bytes: u64) -> Self {
        self.target_resources_memory = bytes;
        self
    }

    /// Set the redirect bound.
    pub fn with_max_fetch_redirections(mut self, n: u32) -> Self {
        self.max_fetch_redirections = n;
        self
    }

    /// Set the retry bound.
    pub fn with_max_fetch_retries(mut self, n: u32) -> Self {
        self.max_fetch_retries = n;
        self
    }

    /// Set the retry backoff base delay in seconds.
    pub fn with_fetch_retry_base_delay_secs(mut self, secs: i64) -> Self {
        self.fetch_retry_base_delay_secs = secs;
        self
    }

    /// Set the coarseness pixel threshold.
    pub fn with_max_texel_to_pixel_scale(mut self, pixels: f64) -> Self {
        self.max_texel_to_pixel_scale = pixels;
        self
    }

    /// Set the disk cache root directory.
    pub fn with_cache_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.cache_root = root.into();
        self
    }

    /// Enable or disable the disk cache.
    pub fn with_disk_cache_enabled(mut self, enabled: bool) -> Self {
        self.disk_cache_enabled = enabled;
        self
    }

    /// Select hashed (true) or hierarchy-mirroring (false) cache paths.
    pub fn with_hash_cache_paths(mut self, hashed: bool) -> Self {
        self.hash_cache_paths = hashed;
        self
    }

    /// Enable re-download of resources whose expiry has elapsed.
    pub fn with_runtime_expiration(mut self, enabled: bool) -> Self {
        self.runtime_expiration_enabled = enabled;
        self
    }

    /// Enable persisting undecodable payloads for postmortem inspection.
    pub fn with_debug_save_corrupted_files(mut self, dir: impl Into<PathBuf>) -> Self {
        self.debug_save_corrupted_files = true;
        self.corrupted_files_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budgets() {
        let options = MapOptions::default();
        assert_eq!(options.max_concurrent_downloads, 25);
        assert_eq!(options.max_resource_processes_per_tick, 10);
        assert_eq!(options.max_node_updates_per_tick, 16);
        assert_eq!(options.target_resources_memory, 512 * 1024 * 1024);
        assert_eq!(options.max_fetch_retries, 5);
        assert_eq!(options.fetch_retry_base_delay_secs, 15);
    }

    #[test]
    fn test_builder_chain() {
        let options = MapOptions::default()
            .with_max_concurrent_downloads(4)
            .with_max_fetch_retries(2)
            .with_cache_root("/tmp/gs-cache")
            .with_hash_cache_paths(false)
            .with_runtime_expiration(true);

        assert_eq!(options.max_concurrent_downloads, 4);
        assert_eq!(options.max_fetch_retries, 2);
        assert_eq!(options.cache_root, PathBuf::from("/tmp/gs-cache"));
        assert!(!options.hash_cache_paths);
        assert!(options.runtime_expiration_enabled);
    }

    #[test]
    fn test_corrupted_files_builder() {
        let options = MapOptions::default().with_debug_save_corrupted_files("/tmp/bad");
        assert!(options.debug_save_corrupted_files);
        assert_eq!(options.corrupted_files_dir, PathBuf::from("/tmp/bad"));
    }
}
