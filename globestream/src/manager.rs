//! Resource manager: owns the resource map and drives the two-phase pipeline.
//!
//! ```text
//!  render phase (traversal)          data phase (IO + decode)
//!  ────────────────────────          ────────────────────────
//!  resource() / touch()
//!        │ touched list
//!        ▼
//!  render_tick(now)
//!    backoff / expiry / eviction
//!        │ attention list  ──swap──► data_tick(now)
//!                                      drain fetch completions
//!                                      decay + sort priorities
//!                                      cache → local → network → decode
//!                                        │
//!  fetch callback (any thread) ──send──► completion queue
//! ```
//!
//! The only cross-phase synchronization is the brief lock swapping the
//! attention list; no IO, decode or traversal work happens while holding it.
//! Fetch callbacks post a [`FetchOutcome`] to a single-consumer queue and
//! never touch the map, so every state transition out of `Downloading` runs
//! on the data phase and the in-flight download counter has a single writer.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::{DiskCache, EXPIRES_UNKNOWN};
use crate::config::MapOptions;
use crate::fetcher::{FetchReply, FetchTask, Fetcher};
use crate::resources::{
    decode, AvailabilityTest, FetchApplied, Resource, ResourceState, ResourceType,
};
use crate::stats::MapStatistics;

/// A fetch reply paired with its resource, posted by the completion sink and
/// consumed by `data_tick`.
struct FetchOutcome {
    resource: Arc<Resource>,
    reply: FetchReply,
}

/// Owns the resource map and schedules all per-tick work.
pub struct ResourceManager {
    options: MapOptions,
    fetcher: Arc<dyn Fetcher>,
    cache: Option<DiskCache>,
    stats: Arc<MapStatistics>,

    /// The resource map. Mutated by `resource()` (render phase, creation)
    /// and the eviction pass; the data phase never needs it.
    map: Mutex<HashMap<String, Arc<Resource>>>,

    /// Resources touched since the last render tick.
    touched: Mutex<Vec<Arc<Resource>>>,

    /// Resources the render phase wants the data phase to look at.
    attention: Mutex<Vec<Arc<Resource>>>,

    /// Data-phase carry-over: work that did not fit the last tick's budget.
    pending: Mutex<VecDeque<Arc<Resource>>>,

    completion_tx: mpsc::UnboundedSender<FetchOutcome>,
    completion_rx: Mutex<mpsc::UnboundedReceiver<FetchOutcome>>,

    /// In-flight downloads. Incremented on dispatch and decremented on
    /// completion drain, both on the data phase.
    downloads: AtomicU32,

    /// Monotonic render tick counter; resources stamp their accesses with it.
    render_tick_index: AtomicU64,

    /// Headers attached to authenticated fetches, set once the auth
    /// document is ready.
    auth_headers: Mutex<Vec<(String, String)>>,
}

impl ResourceManager {
    pub fn new(options: MapOptions, fetcher: Arc<dyn Fetcher>) -> Self {
        let cache = options
            .disk_cache_enabled
            .then(|| DiskCache::new(&options));
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        Self {
            options,
            fetcher,
            cache,
            stats: Arc::new(MapStatistics::new()),
            map: Mutex::new(HashMap::new()),
            touched: Mutex::new(Vec::new()),
            attention: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            completion_tx,
            completion_rx: Mutex::new(completion_rx),
            downloads: AtomicU32::new(0),
            render_tick_index: AtomicU64::new(1),
            auth_headers: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &MapOptions {
        &self.options
    }

    pub fn statistics(&self) -> Arc<MapStatistics> {
        Arc::clone(&self.stats)
    }

    /// Set the headers attached to all subsequent fetches.
    pub fn set_auth_headers(&self, headers: Vec<(String, String)>) {
        *self.auth_headers.lock() = headers;
    }

    /// Get or lazily create the resource for `name`.
    pub fn resource(&self, name: &str, kind: ResourceType) -> Arc<Resource> {
        let mut map = self.map.lock();
        if let Some(existing) = map.get(name) {
            return Arc::clone(existing);
        }
        debug!(name, %kind, "resource created");
        self.stats.resource_created();
        let res = Arc::new(Resource::new(name, kind));
        if kind.is_tile() {
            res.set_availability(AvailabilityTest::for_tiles());
        }
        map.insert(name.to_string(), Arc::clone(&res));
        res
    }

    /// Record a frame access: raise the priority accumulator and remember the
    /// resource for the next render tick's bookkeeping pass.
    pub fn touch(&self, res: &Arc<Resource>, priority: f32) {
        res.update_priority(priority);
        let tick = self.render_tick_index.load(Ordering::Acquire);
        if res.touch(tick) {
            self.touched.lock().push(Arc::clone(res));
        }
    }

    /// Number of resources currently in the map.
    pub fn resource_count(&self) -> usize {
        self.map.lock().len()
    }

    /// Current ram + gpu cost of all live resources.
    pub fn total_memory(&self) -> u64 {
        self.map.lock().values().map(|r| r.memory_cost()).sum()
    }

    // =========================================================================
    // Render phase
    // =========================================================================

    /// Per-frame bookkeeping: backoff/expiry checks for touched resources,
    /// memory accounting, and the two-phase eviction pass.
    pub fn render_tick(&self, now: i64) {
        let tick = self.render_tick_index.load(Ordering::Acquire);

        let touched = std::mem::take(&mut *self.touched.lock());
        let mut needs_attention = Vec::new();
        for res in touched {
            if res.render_update(&self.options, now) {
                needs_attention.push(res);
            }
        }
        if !needs_attention.is_empty() {
            // The single cross-phase lock; only list contents move here.
            self.attention.lock().append(&mut needs_attention);
        }

        self.evict(tick);

        self.render_tick_index.store(tick + 1, Ordering::Release);
    }

    /// Drive total memory back under budget: delete resources marked on an
    /// earlier pass that stayed untouched, then mark the least recently
    /// touched survivors.
    fn evict(&self, tick: u64) {
        let mut map = self.map.lock();

        // Phase two: delete what a previous pass marked and nothing revived.
        let mut released = Vec::new();
        map.retain(|name, res| {
            if res.finalizing_before(tick) && Arc::strong_count(res) == 1 {
                released.push(name.clone());
                false
            } else {
                true
            }
        });
        for name in &released {
            debug!(name, "resource released");
            self.stats.resource_released();
        }

        let total: u64 = map.values().map(|r| r.memory_cost()).sum();
        self.stats.set_resources_memory(total);
        if total <= self.options.target_resources_memory {
            return;
        }

        // Phase one: mark untouched candidates, oldest first, until the
        // projected total fits the budget.
        let mut candidates: Vec<&Arc<Resource>> = map
            .values()
            .filter(|res| {
                let state = res.state();
                state != ResourceState::Downloading
                    && state != ResourceState::Finalizing
                    && res.last_access_tick() + self.options.eviction_grace_ticks < tick
            })
            .collect();
        candidates.sort_by_key(|res| res.last_access_tick());

        let mut projected = total;
        for res in candidates {
            if projected <= self.options.target_resources_memory {
                break;
            }
            projected = projected.saturating_sub(res.memory_cost());
            res.mark_finalizing(tick);
        }
        if projected > self.options.target_resources_memory {
            info!(
                total,
                budget = self.options.target_resources_memory,
                "over memory budget with no more eviction candidates"
            );
        }
    }

    // =========================================================================
    // Data phase
    // =========================================================================

    /// One pass of disk/network/decode work.
    ///
    /// Returns true when all pending work drained, letting callers report
    /// loading progress.
    pub fn data_tick(&self, now: i64) -> bool {
        self.drain_completions(now);

        // Collect this tick's work: attention from the render phase plus the
        // carry-over the previous tick could not fit.
        let mut work: Vec<Arc<Resource>> = std::mem::take(&mut *self.attention.lock());
        work.extend(self.pending.lock().drain(..));

        let mut seen = HashSet::new();
        work.retain(|res| seen.insert(Arc::as_ptr(res) as usize));

        // Take the accumulated priority (decaying it) and process the most
        // urgent resources first.
        let mut prioritized: Vec<(f32, Arc<Resource>)> = work
            .into_iter()
            .map(|res| (res.take_priority_decayed(), res))
            .collect();
        prioritized.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let budget = self.options.max_resource_processes_per_tick as usize;
        let mut processed = 0usize;
        for (_, res) in prioritized {
            if processed >= budget {
                self.pending.lock().push_back(res);
                continue;
            }
            if self.process_resource(&res, now) {
                processed += 1;
            }
        }

        self.pending.lock().is_empty() && self.downloads.load(Ordering::Acquire) == 0
    }

    fn drain_completions(&self, now: i64) {
        let mut rx = self.completion_rx.lock();
        while let Ok(outcome) = rx.try_recv() {
            self.downloads.fetch_sub(1, Ordering::AcqRel);
            let content = outcome.reply.content.clone();
            let expires = outcome.reply.expires;
            let res = outcome.resource;

            let applied = res.apply_fetch_reply(outcome.reply, &self.options, now);
            match applied {
                FetchApplied::Downloaded => {
                    self.stats.download_completed(content.len() as u64);
                    self.cache_store(&res, &content, expires);
                    self.pending.lock().push_back(res);
                }
                FetchApplied::AvailFail => {
                    self.stats.download_completed(0);
                    // Cache the miss so restarts do not re-fetch known-absent
                    // tiles.
                    self.cache_store(&res, &[], EXPIRES_UNKNOWN);
                }
                FetchApplied::Redirected => {
                    self.stats.download_completed(0);
                    self.pending.lock().push_back(res);
                }
                FetchApplied::Retry | FetchApplied::Fatal => {
                    self.stats.download_failed();
                }
            }
        }
    }

    fn cache_store(&self, res: &Resource, payload: &[u8], expires: i64) {
        if !res.kind().is_cachable() {
            return;
        }
        if let Some(cache) = &self.cache {
            cache.write(res.name(), payload, expires);
            self.stats.cache_write();
        }
    }

    /// Advance one resource a single step. Returns true if work was done
    /// (counted against the tick budget).
    fn process_resource(&self, res: &Arc<Resource>, now: i64) -> bool {
        match res.state() {
            ResourceState::Initializing => self.process_initializing(res, now),
            ResourceState::Downloaded => self.process_decode(res),
            // Anything else has no data-phase work (completions and render
            // bookkeeping move it along).
            _ => false,
        }
    }

    fn process_initializing(&self, res: &Arc<Resource>, now: i64) -> bool {
        // Disk cache first.
        if res.kind().is_cachable() {
            if let Some(cache) = &self.cache {
                if let Some(hit) = cache.read(res.name(), now) {
                    self.stats.cache_hit();
                    res.accept_local(Bytes::from(hit.payload), hit.expires);
                    if res.state() == ResourceState::Downloaded {
                        self.pending.lock().push_back(Arc::clone(res));
                    }
                    return true;
                }
                self.stats.cache_miss();
            }
        }

        // Local file scheme bypasses the network entirely.
        let url = res.url();
        if let Some(path) = url.strip_prefix("file://") {
            match std::fs::read(path) {
                Ok(data) => {
                    res.accept_local(Bytes::from(data), EXPIRES_UNKNOWN);
                    if res.state() == ResourceState::Downloaded {
                        self.pending.lock().push_back(Arc::clone(res));
                    }
                }
                Err(e) => {
                    warn!(url, error = %e, "local file read failed");
                    res.set_fatal();
                }
            }
            return true;
        }

        // Network, bounded by the concurrency cap.
        if self.downloads.load(Ordering::Acquire) >= self.options.max_concurrent_downloads {
            self.pending.lock().push_back(Arc::clone(res));
            return false;
        }
        let Some(url) = res.begin_download() else {
            return false;
        };
        self.downloads.fetch_add(1, Ordering::AcqRel);
        self.stats.download_started();

        let tx = self.completion_tx.clone();
        let resource = Arc::clone(res);
        let task = FetchTask::new(url, res.kind(), move |reply| {
            // Runs on a transport thread: hand off, touch nothing shared.
            let _ = tx.send(FetchOutcome { resource, reply });
        })
        .with_headers(self.auth_headers.lock().clone());
        self.fetcher.fetch(task);
        true
    }

    fn process_decode(&self, res: &Arc<Resource>) -> bool {
        let Some(content) = res.take_content() else {
            return false;
        };
        match decode::decode(res.kind(), &content) {
            Ok(decoded) => {
                res.set_decoded(decoded);
                debug!(name = res.name(), "resource ready");
            }
            Err(e) => {
                warn!(name = res.name(), error = %e, "decode failed");
                self.stats.decode_failure();
                let payload = res.set_decode_failed();
                self.save_corrupted(res.name(), &payload);
            }
        }
        true
    }

    fn save_corrupted(&self, name: &str, payload: &[u8]) {
        if !self.options.debug_save_corrupted_files || payload.is_empty() {
            return;
        }
        let file: String = name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let path = self.options.corrupted_files_dir.join(file);
        if let Err(e) = std::fs::create_dir_all(&self.options.corrupted_files_dir)
            .and_then(|_| std::fs::write(&path, payload))
        {
            warn!(name, error = %e, "could not persist corrupted payload");
        } else {
            info!(name, path = %path.display(), "corrupted payload saved");
        }
    }
}

impl std::fmt::Debug for ResourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceManager")
            .field("resources", &self.resource_count())
            .field("downloads", &self.downloads.load(Ordering::Relaxed))
            .finish()
    }
}
