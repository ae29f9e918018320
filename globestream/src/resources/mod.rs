//! Per-resource lifecycle: state machine, priority, retry bookkeeping.
//!
//! Every remote entity the map consumes — configuration documents, meta
//! tiles, meshes, textures, nav tiles — is a [`Resource`] keyed by its fetch
//! url. Resources are created lazily by the manager on first request, shared
//! by `Arc`, and referenced weakly from draw tasks and traversal nodes.
//!
//! # State ownership
//!
//! A state has exactly one writer per phase:
//! - the data phase dispatches `Initializing → Downloading` and decodes
//!   `Downloaded → Ready`, and applies all fetch-reply transitions out of
//!   `Downloading` when draining the completion queue;
//! - the render phase applies retry-backoff, expiration and eviction
//!   bookkeeping in [`Resource::render_update`] and the manager's eviction
//!   pass.
//!
//! Fetch callbacks never mutate a resource; they post a completion message
//! consumed by the data phase.
//!
//! # Priority
//!
//! Priority is a per-tick max-accumulator: every visible tile wanting a
//! resource calls [`Resource::update_priority`], and the resource inherits
//! the most urgent request. Before each data-tick pass the accumulator is
//! taken and decayed (×0.1) so that priorities of no-longer-wanted resources
//! shrink across frames instead of growing without bound.

pub mod decode;

pub use decode::{
    expand_tile_url, AuthConfig, AvailabilityDef, BoundLayerDef, BoundMetaTile, DecodeError,
    DecodedResource, MapConfig, Mesh, MetaNode, MetaTile, NavTile, SubMesh, Texture,
    BOUND_AVAILABLE, BOUND_WATERTIGHT, META_BLOCK_SIZE, META_CHILD_LL, META_CHILD_LR,
    META_CHILD_UL, META_CHILD_UR, META_GEOMETRY, META_NAVTILE, META_USED,
};

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::cache::EXPIRES_UNKNOWN;
use crate::config::MapOptions;
use crate::fetcher::FetchReply;

// =============================================================================
// Resource type
// =============================================================================

/// Closed set of resource kinds.
///
/// The kind selects the decoder and gates disk-cache eligibility:
/// configuration and authentication documents must always be revalidated
/// against the origin, so they are exempt from the disk cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceType {
    MapConfig,
    AuthConfig,
    BoundLayerConfig,
    MetaTile,
    BoundMetaTile,
    Mesh,
    Texture,
    NavTile,
}

impl ResourceType {
    /// Whether payloads of this kind may be served from the disk cache.
    pub fn is_cachable(self) -> bool {
        !matches!(
            self,
            ResourceType::MapConfig | ResourceType::AuthConfig | ResourceType::BoundLayerConfig
        )
    }

    /// Whether this kind is a tiled resource. Tiles get the default
    /// [`AvailabilityTest`] so missing tiles fail cleanly instead of
    /// retrying.
    pub fn is_tile(self) -> bool {
        matches!(
            self,
            ResourceType::MetaTile
                | ResourceType::BoundMetaTile
                | ResourceType::Mesh
                | ResourceType::Texture
                | ResourceType::NavTile
        )
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::MapConfig => "map-config",
            ResourceType::AuthConfig => "auth-config",
            ResourceType::BoundLayerConfig => "bound-layer-config",
            ResourceType::MetaTile => "meta-tile",
            ResourceType::BoundMetaTile => "bound-meta-tile",
            ResourceType::Mesh => "mesh",
            ResourceType::Texture => "texture",
            ResourceType::NavTile => "nav-tile",
        };
        f.write_str(s)
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceState {
    /// Created or rescheduled; waiting for the data phase to dispatch it.
    Initializing,
    /// A fetch is in flight. At most one per resource at any instant.
    Downloading,
    /// Payload available (from fetch, cache or local file); awaiting decode.
    Downloaded,
    /// Decoded and usable.
    Ready,
    /// Failed transiently; rescheduled after the backoff elapses.
    ErrorRetry,
    /// Failed permanently; never rescheduled.
    ErrorFatal,
    /// The origin reports this entity as known-missing.
    AvailFail,
    /// Marked by eviction; removed on the next pass unless touched again.
    Finalizing,
}

impl std::fmt::Display for ResourceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceState::Initializing => "initializing",
            ResourceState::Downloading => "downloading",
            ResourceState::Downloaded => "downloaded",
            ResourceState::Ready => "ready",
            ResourceState::ErrorRetry => "error-retry",
            ResourceState::ErrorFatal => "error-fatal",
            ResourceState::AvailFail => "avail-fail",
            ResourceState::Finalizing => "finalizing",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Availability test
// =============================================================================

/// Heuristic distinguishing "successfully downloaded but semantically absent"
/// from a real payload.
///
/// Tiled sources signal missing tiles inconsistently: some return an error
/// code, some a placeholder content type, some a tiny stub body. Any match
/// marks the resource [`ResourceState::AvailFail`] and caches a zero-length
/// negative entry so the miss is never re-fetched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AvailabilityTest {
    /// Reply codes meaning "tile absent" (e.g. 404, 204).
    pub codes: Vec<u32>,
    /// Content type of placeholder bodies.
    pub content_type: Option<String>,
    /// Successful bodies at or under this size are placeholders.
    pub max_size: usize,
}

impl AvailabilityTest {
    /// The test applied to tile resources that declare none of their own:
    /// plain not-found and no-content replies mean "tile absent".
    pub fn for_tiles() -> Self {
        Self {
            codes: vec![404, 204],
            content_type: None,
            max_size: 0,
        }
    }

    fn matches(&self, reply: &FetchReply) -> bool {
        if self.codes.contains(&reply.code) {
            return true;
        }
        if !reply.is_success() {
            return false;
        }
        if let Some(ct) = &self.content_type {
            if !ct.is_empty() && reply.content_type == *ct {
                return true;
            }
        }
        reply.content.len() <= self.max_size
    }
}

impl From<decode::AvailabilityDef> for AvailabilityTest {
    fn from(def: decode::AvailabilityDef) -> Self {
        Self {
            codes: def.codes,
            content_type: def.content_type,
            max_size: def.max_size,
        }
    }
}

// =============================================================================
// Resource
// =============================================================================

/// Result of applying a fetch reply, for logging and statistics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchApplied {
    Downloaded,
    Redirected,
    AvailFail,
    Retry,
    Fatal,
}

/// Mutable lifecycle fields, guarded by one small mutex.
#[derive(Debug)]
struct ResourceCore {
    state: ResourceState,
    /// Current fetch url; diverges from the name after a redirect.
    url: String,
    retry_number: u32,
    /// Unix seconds; meaningful only in `ErrorRetry`.
    retry_time: i64,
    redirections_count: u32,
    content: Bytes,
    expires: i64,
    decoded: Option<DecodedResource>,
    ram_cost: u64,
    gpu_cost: u64,
    avail_test: Option<AvailabilityTest>,
    /// Render tick at which eviction marked this resource.
    finalize_tick: u64,
}

/// One named remote entity and its lifecycle.
#[derive(Debug)]
pub struct Resource {
    name: String,
    kind: ResourceType,
    /// Per-tick priority max-accumulator, stored as f32 bits.
    priority_bits: AtomicU32,
    /// Render tick of the most recent touch.
    last_access_tick: AtomicU64,
    core: Mutex<ResourceCore>,
}

impl Resource {
    pub fn new(name: impl Into<String>, kind: ResourceType) -> Self {
        let name = name.into();
        let url = name.clone();
        Self {
            name,
            kind,
            priority_bits: AtomicU32::new(0.0_f32.to_bits()),
            last_access_tick: AtomicU64::new(0),
            core: Mutex::new(ResourceCore {
                state: ResourceState::Initializing,
                url,
                retry_number: 0,
                retry_time: 0,
                redirections_count: 0,
                content: Bytes::new(),
                expires: EXPIRES_UNKNOWN,
                decoded: None,
                ram_cost: 0,
                gpu_cost: 0,
                avail_test: None,
                finalize_tick: 0,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceType {
        self.kind
    }

    pub fn state(&self) -> ResourceState {
        self.core.lock().state
    }

    /// Current fetch url (the name, unless a redirect swapped it).
    pub fn url(&self) -> String {
        self.core.lock().url.clone()
    }

    /// Cheap clone of the decoded payload, if ready.
    pub fn decoded(&self) -> Option<DecodedResource> {
        self.core.lock().decoded.clone()
    }

    /// Snapshot of bookkeeping fields, for diagnostics and tests.
    pub fn info(&self) -> ResourceInfo {
        let core = self.core.lock();
        ResourceInfo {
            state: core.state,
            retry_number: core.retry_number,
            retry_time: core.retry_time,
            redirections_count: core.redirections_count,
            expires: core.expires,
            ram_cost: core.ram_cost,
            gpu_cost: core.gpu_cost,
            content_len: core.content.len(),
        }
    }

    /// Combined memory cost in bytes.
    pub fn memory_cost(&self) -> u64 {
        let core = self.core.lock();
        core.ram_cost + core.gpu_cost
    }

    /// Attach the negative-availability heuristic for this resource.
    pub fn set_availability(&self, test: AvailabilityTest) {
        self.core.lock().avail_test = Some(test);
    }

    // -------------------------------------------------------------------------
    // Priority accumulator
    // -------------------------------------------------------------------------

    /// Raise the per-tick priority to at least `priority`.
    pub fn update_priority(&self, priority: f32) {
        let _ = self
            .priority_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                let current = f32::from_bits(bits);
                if priority > current {
                    Some(priority.to_bits())
                } else {
                    None
                }
            });
    }

    /// Take the accumulated priority for this pass, leaving the decayed
    /// remainder (×0.1) behind.
    pub fn take_priority_decayed(&self) -> f32 {
        let bits = self
            .priority_bits
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                Some((f32::from_bits(bits) * 0.1).to_bits())
            })
            .unwrap_or(0.0_f32.to_bits());
        f32::from_bits(bits)
    }

    /// Peek at the accumulator without decaying it.
    pub fn priority(&self) -> f32 {
        f32::from_bits(self.priority_bits.load(Ordering::Acquire))
    }

    // -------------------------------------------------------------------------
    // Access tracking
    // -------------------------------------------------------------------------

    /// Record an access at `tick`; returns true on the first touch of that
    /// tick (callers use this to record the resource once per frame).
    pub fn touch(&self, tick: u64) -> bool {
        self.last_access_tick.swap(tick, Ordering::AcqRel) != tick
    }

    pub fn last_access_tick(&self) -> u64 {
        self.last_access_tick.load(Ordering::Acquire)
    }

    // -------------------------------------------------------------------------
    // Data-phase transitions
    // -------------------------------------------------------------------------

    /// `Initializing → Downloading`. Returns the url to fetch, or `None` if
    /// the resource is not waiting for a dispatch.
    pub(crate) fn begin_download(&self) -> Option<String> {
        let mut core = self.core.lock();
        if core.state != ResourceState::Initializing {
            return None;
        }
        core.state = ResourceState::Downloading;
        Some(core.url.clone())
    }

    /// Accept a payload that arrived from the disk cache or a local file.
    ///
    /// `Initializing → Downloaded`, or `AvailFail` for an empty payload (the
    /// cached "known unavailable" marker).
    pub(crate) fn accept_local(&self, payload: Bytes, expires: i64) -> bool {
        let mut core = self.core.lock();
        if core.state != ResourceState::Initializing {
            return false;
        }
        if payload.is_empty() {
            core.state = ResourceState::AvailFail;
        } else {
            core.content = payload;
            core.expires = expires;
            core.state = ResourceState::Downloaded;
        }
        true
    }

    /// Apply a fetch reply: all transitions out of `Downloading`.
    ///
    /// Runs on the data phase while draining the completion queue, never on
    /// the fetch callback thread.
    pub(crate) fn apply_fetch_reply(
        &self,
        reply: FetchReply,
        options: &MapOptions,
        now: i64,
    ) -> FetchApplied {
        let mut core = self.core.lock();
        debug_assert_eq!(core.state, ResourceState::Downloading);

        if let Some(test) = &core.avail_test {
            if test.matches(&reply) {
                debug!(name = %self.name, code = reply.code, "resource known unavailable");
                core.content = Bytes::new();
                core.state = ResourceState::AvailFail;
                return FetchApplied::AvailFail;
            }
        }

        if reply.is_redirect() {
            core.redirections_count += 1;
            if core.redirections_count > options.max_fetch_redirections {
                debug!(name = %self.name, "redirect bound exceeded");
                return Self::schedule_retry(&mut core, &self.name, options, now);
            }
            // The transport reported but did not follow the redirect; swap
            // the url and go around again.
            core.url = reply.redirect_url.unwrap_or_default();
            core.state = ResourceState::Initializing;
            return FetchApplied::Redirected;
        }

        if reply.is_success() {
            core.content = reply.content;
            core.expires = reply.expires;
            core.state = ResourceState::Downloaded;
            return FetchApplied::Downloaded;
        }

        debug!(name = %self.name, code = reply.code, "fetch failed");
        Self::schedule_retry(&mut core, &self.name, options, now)
    }

    fn schedule_retry(
        core: &mut ResourceCore,
        name: &str,
        options: &MapOptions,
        now: i64,
    ) -> FetchApplied {
        if core.retry_number >= options.max_fetch_retries {
            debug!(name, retries = core.retry_number, "retries exhausted");
            core.state = ResourceState::ErrorFatal;
            return FetchApplied::Fatal;
        }
        let delay = options.fetch_retry_base_delay_secs << core.retry_number;
        core.retry_time = now + delay;
        core.retry_number += 1;
        core.state = ResourceState::ErrorRetry;
        FetchApplied::Retry
    }

    /// Fail permanently outside the fetch path (unreadable local file).
    pub(crate) fn set_fatal(&self) {
        self.core.lock().state = ResourceState::ErrorFatal;
    }

    /// Take the downloaded payload for decoding (`Downloaded` only).
    pub(crate) fn take_content(&self) -> Option<Bytes> {
        let core = self.core.lock();
        if core.state != ResourceState::Downloaded {
            return None;
        }
        Some(core.content.clone())
    }

    /// `Downloaded → Ready` with the decoded payload and its costs.
    pub(crate) fn set_decoded(&self, decoded: DecodedResource) {
        let mut core = self.core.lock();
        core.ram_cost = decoded.ram_cost();
        core.gpu_cost = decoded.gpu_cost();
        core.decoded = Some(decoded);
        core.content = Bytes::new();
        core.state = ResourceState::Ready;
        core.retry_number = 0;
    }

    /// `Downloaded → ErrorFatal` after a decode failure. Returns the payload
    /// so the caller may persist it for postmortem inspection.
    pub(crate) fn set_decode_failed(&self) -> Bytes {
        let mut core = self.core.lock();
        core.state = ResourceState::ErrorFatal;
        std::mem::take(&mut core.content)
    }

    // -------------------------------------------------------------------------
    // Render-phase bookkeeping
    // -------------------------------------------------------------------------

    /// Apply per-frame bookkeeping for a touched resource: retry backoff,
    /// runtime expiration, finalization revival. Returns true if the data
    /// phase should look at this resource.
    pub(crate) fn render_update(&self, options: &MapOptions, now: i64) -> bool {
        let mut core = self.core.lock();
        match core.state {
            ResourceState::ErrorRetry if now >= core.retry_time => {
                debug!(name = %self.name, "retry backoff elapsed");
                core.state = ResourceState::Initializing;
            }
            ResourceState::Ready
                if options.runtime_expiration_enabled
                    && core.expires >= 0
                    && core.expires < now =>
            {
                debug!(name = %self.name, "resource expired at runtime");
                core.state = ResourceState::Initializing;
            }
            ResourceState::Finalizing => {
                // Touched again between eviction passes; revive.
                core.state = ResourceState::Initializing;
                core.decoded = None;
                core.ram_cost = 0;
                core.gpu_cost = 0;
            }
            _ => {}
        }
        matches!(
            core.state,
            ResourceState::Initializing | ResourceState::Downloaded
        )
    }

    /// Eviction pass, phase one: mark a live resource `Finalizing` at `tick`.
    pub(crate) fn mark_finalizing(&self, tick: u64) {
        let mut core = self.core.lock();
        if core.state != ResourceState::Finalizing {
            core.state = ResourceState::Finalizing;
            core.finalize_tick = tick;
        }
    }

    /// Eviction pass, phase two: true if this resource was marked before
    /// `tick` and is still `Finalizing`, i.e. a full pass elapsed with no
    /// revival and it may be removed from the map.
    pub(crate) fn finalizing_before(&self, tick: u64) -> bool {
        let core = self.core.lock();
        core.state == ResourceState::Finalizing && core.finalize_tick < tick
    }
}

/// Point-in-time copy of a resource's bookkeeping fields.
#[derive(Clone, Debug)]
pub struct ResourceInfo {
    pub state: ResourceState,
    pub retry_number: u32,
    pub retry_time: i64,
    pub redirections_count: u32,
    pub expires: i64,
    pub ram_cost: u64,
    pub gpu_cost: u64,
    pub content_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> MapOptions {
        MapOptions::default()
    }

    #[test]
    fn test_new_resource_is_initializing() {
        let res = Resource::new("https://host/tile/0/0/0", ResourceType::Texture);
        assert_eq!(res.state(), ResourceState::Initializing);
        assert_eq!(res.url(), "https://host/tile/0/0/0");
    }

    #[test]
    fn test_happy_path_to_ready() {
        let res = Resource::new("n", ResourceType::Texture);
        assert_eq!(res.begin_download().as_deref(), Some("n"));
        assert_eq!(res.state(), ResourceState::Downloading);

        // No duplicate dispatch while downloading.
        assert!(res.begin_download().is_none());

        let applied = res.apply_fetch_reply(FetchReply::ok(&b"abc"[..]), &options(), 0);
        assert_eq!(applied, FetchApplied::Downloaded);
        assert_eq!(res.state(), ResourceState::Downloaded);
        assert_eq!(res.take_content().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_retry_backoff_is_monotonic_and_bounded() {
        let opts = options().with_max_fetch_retries(3);
        let res = Resource::new("n", ResourceType::Texture);
        let base = opts.fetch_retry_base_delay_secs;

        for k in 0..3 {
            res.begin_download().unwrap();
            let applied = res.apply_fetch_reply(FetchReply::with_code(500), &opts, 1000);
            assert_eq!(applied, FetchApplied::Retry);
            let info = res.info();
            assert_eq!(info.state, ResourceState::ErrorRetry);
            // k-th retry scheduled no earlier than base * 2^k after failure.
            assert_eq!(info.retry_time, 1000 + (base << k));

            // Backoff not yet elapsed: render bookkeeping leaves it alone.
            assert!(!res.render_update(&opts, 1000));
            assert_eq!(res.state(), ResourceState::ErrorRetry);

            // Elapsed: rescheduled.
            assert!(res.render_update(&opts, info.retry_time));
            assert_eq!(res.state(), ResourceState::Initializing);
        }

        // Fourth failure exhausts the budget permanently.
        res.begin_download().unwrap();
        let applied = res.apply_fetch_reply(FetchReply::with_code(500), &opts, 1000);
        assert_eq!(applied, FetchApplied::Fatal);
        assert_eq!(res.state(), ResourceState::ErrorFatal);
        assert!(!res.render_update(&opts, i64::MAX));
        assert_eq!(res.state(), ResourceState::ErrorFatal);
    }

    #[test]
    fn test_redirect_swaps_url_and_is_bounded() {
        let opts = options().with_max_fetch_redirections(2).with_max_fetch_retries(0);
        let res = Resource::new("https://a/x", ResourceType::MetaTile);

        res.begin_download().unwrap();
        let applied = res.apply_fetch_reply(FetchReply::redirect(302, "https://b/x"), &opts, 0);
        assert_eq!(applied, FetchApplied::Redirected);
        assert_eq!(res.state(), ResourceState::Initializing);
        assert_eq!(res.url(), "https://b/x");
        // The name stays the original key.
        assert_eq!(res.name(), "https://a/x");

        res.begin_download().unwrap();
        res.apply_fetch_reply(FetchReply::redirect(302, "https://c/x"), &opts, 0);

        // Third redirect exceeds the bound; with no retries left the
        // resource fails rather than looping.
        res.begin_download().unwrap();
        let applied = res.apply_fetch_reply(FetchReply::redirect(302, "https://d/x"), &opts, 0);
        assert_eq!(applied, FetchApplied::Fatal);
    }

    #[test]
    fn test_redirect_beyond_bound_goes_to_retry_when_retries_remain() {
        let opts = options().with_max_fetch_redirections(0);
        let res = Resource::new("n", ResourceType::MetaTile);
        res.begin_download().unwrap();
        let applied = res.apply_fetch_reply(FetchReply::redirect(301, "https://b"), &opts, 0);
        assert_eq!(applied, FetchApplied::Retry);
        assert_eq!(res.state(), ResourceState::ErrorRetry);
    }

    #[test]
    fn test_availability_by_code_content_type_and_size() {
        let test = AvailabilityTest {
            codes: vec![404],
            content_type: Some("text/plain".into()),
            max_size: 4,
        };
        assert!(test.matches(&FetchReply::not_found()));
        assert!(test.matches(
            &FetchReply::ok(&b"big enough body"[..]).with_content_type("text/plain")
        ));
        assert!(test.matches(&FetchReply::ok(&b"tiny"[..])));
        assert!(!test.matches(
            &FetchReply::ok(&b"real tile payload"[..]).with_content_type("image/jpeg")
        ));
        // A failure code outside the negative set is a real failure.
        assert!(!test.matches(&FetchReply::with_code(500)));
    }

    #[test]
    fn test_avail_fail_from_fetch() {
        let res = Resource::new("n", ResourceType::BoundMetaTile);
        res.set_availability(AvailabilityTest {
            codes: vec![404],
            ..Default::default()
        });
        res.begin_download().unwrap();
        let applied = res.apply_fetch_reply(FetchReply::not_found(), &options(), 0);
        assert_eq!(applied, FetchApplied::AvailFail);
        assert_eq!(res.state(), ResourceState::AvailFail);
    }

    #[test]
    fn test_empty_local_payload_is_avail_fail() {
        let res = Resource::new("n", ResourceType::Texture);
        assert!(res.accept_local(Bytes::new(), EXPIRES_UNKNOWN));
        assert_eq!(res.state(), ResourceState::AvailFail);
    }

    #[test]
    fn test_runtime_expiration_reschedules_ready() {
        let opts = options().with_runtime_expiration(true);
        let res = Resource::new("n", ResourceType::MetaTile);
        res.begin_download().unwrap();
        res.apply_fetch_reply(
            FetchReply::ok(&b"x"[..]).with_expires(500),
            &opts,
            0,
        );
        res.set_decoded(DecodedResource::Texture(std::sync::Arc::new(Texture {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        })));
        assert_eq!(res.state(), ResourceState::Ready);

        // Not expired yet.
        assert!(!res.render_update(&opts, 499));
        assert_eq!(res.state(), ResourceState::Ready);

        // Expired: back to initializing.
        assert!(res.render_update(&opts, 501));
        assert_eq!(res.state(), ResourceState::Initializing);
    }

    #[test]
    fn test_expiration_disabled_keeps_ready() {
        let opts = options();
        let res = Resource::new("n", ResourceType::MetaTile);
        res.begin_download().unwrap();
        res.apply_fetch_reply(FetchReply::ok(&b"x"[..]).with_expires(500), &opts, 0);
        res.set_decoded(DecodedResource::Texture(std::sync::Arc::new(Texture {
            width: 1,
            height: 1,
            pixels: vec![0; 4],
        })));
        assert!(!res.render_update(&opts, 1_000_000));
        assert_eq!(res.state(), ResourceState::Ready);
    }

    #[test]
    fn test_priority_max_aggregation_and_decay() {
        let res = Resource::new("n", ResourceType::Mesh);
        res.update_priority(2.0);
        res.update_priority(5.0);
        res.update_priority(3.0);
        assert_eq!(res.priority(), 5.0);

        let taken = res.take_priority_decayed();
        assert_eq!(taken, 5.0);
        assert!((res.priority() - 0.5).abs() < 1e-6);

        // Decays again on the next take.
        let taken = res.take_priority_decayed();
        assert!((taken - 0.5).abs() < 1e-6);
        assert!((res.priority() - 0.05).abs() < 1e-6);
    }

    #[test]
    fn test_touch_reports_first_access_per_tick() {
        let res = Resource::new("n", ResourceType::Mesh);
        assert!(res.touch(7));
        assert!(!res.touch(7));
        assert!(res.touch(8));
        assert_eq!(res.last_access_tick(), 8);
    }

    #[test]
    fn test_finalizing_two_phase_and_revival() {
        let opts = options();
        let res = Resource::new("n", ResourceType::Mesh);
        res.mark_finalizing(10);
        assert_eq!(res.state(), ResourceState::Finalizing);
        assert!(!res.finalizing_before(10));
        assert!(res.finalizing_before(11));

        // Touch bookkeeping revives it instead of deleting.
        assert!(res.render_update(&opts, 0));
        assert_eq!(res.state(), ResourceState::Initializing);
    }

    #[test]
    fn test_decode_failure_is_fatal_and_returns_payload() {
        let res = Resource::new("n", ResourceType::Texture);
        res.begin_download().unwrap();
        res.apply_fetch_reply(FetchReply::ok(&b"not an image"[..]), &options(), 0);
        let payload = res.set_decode_failed();
        assert_eq!(payload.as_ref(), b"not an image");
        assert_eq!(res.state(), ResourceState::ErrorFatal);
    }
}
