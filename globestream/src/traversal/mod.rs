//! Render-side quadtree traversal.
//!
//! Each frame the render thread calls [`Traversal::traverse`] with the
//! current camera. The pass walks the persistent quadtree from the root,
//! culls against the view frustum, refines nodes whose imagery is still too
//! coarse on screen, and leaves a flat [`DrawTask`] list behind:
//!
//! ```text
//!             ┌ frustum cull ── skip subtree, count culled
//!   pop node ─┼ resolve ─────── meta / mesh / bound resources (budgeted)
//!             ├ coarse enough ─ emit draws
//!             └ refine ──────── render children, or render self while the
//!                               children still load (prefetch passes)
//! ```
//!
//! Traversal never blocks: every resource it needs is requested through the
//! [`ResourceManager`] and re-examined on a later frame. Nodes visit in
//! closest-to-focus order so a fixed per-frame resolution budget lands on
//! what the user is looking at.

mod bound;
mod node;

pub use bound::BoundParamInfo;
pub use node::{NodeId, TraverseNode, Validity};

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Weak};

use glam::{DMat4, DVec3};
use tracing::{debug, info, warn};

use crate::geometry::{projected_texel_pixels, Aabb, Frustum};
use crate::manager::ResourceManager;
use crate::resources::{
    expand_tile_url, DecodedResource, MapConfig, Resource, ResourceState, ResourceType,
    BOUND_AVAILABLE, BOUND_WATERTIGHT,
};

// =============================================================================
// Camera and draw output
// =============================================================================

/// Everything the traversal needs to know about the view.
#[derive(Clone, Debug)]
pub struct Camera {
    /// Combined view-projection transform.
    pub view_proj: DMat4,
    /// Point the user is looking at; traversal order and fetch priorities
    /// are keyed on distance from here.
    pub focus: DVec3,
    pub viewport_height: f64,
}

/// One draw against one bound layer.
#[derive(Clone, Debug)]
pub struct BoundDraw {
    pub layer_id: String,
    pub texture: Weak<Resource>,
    /// Sub-rectangle of the layer texture covering the node (offset u/v,
    /// scale u/v).
    pub uv_offset_scale: [f64; 4],
    pub transparent: bool,
}

/// One renderable surface patch, the traversal's output unit.
///
/// Resources are held weakly: a task left in a stale draw list never pins
/// memory against eviction. The renderer upgrades on use and skips draws
/// whose resources are gone.
#[derive(Clone, Debug)]
pub struct DrawTask {
    pub node: NodeId,
    pub mesh: Weak<Resource>,
    /// Index into the mesh's submesh list.
    pub submesh: usize,
    /// Internal surface texture, when the submesh carries its own uvs.
    pub surface_texture: Option<Weak<Resource>>,
    /// Bound-layer draws, bottom to top.
    pub bound: Vec<BoundDraw>,
}

// =============================================================================
// Traversal queue
// =============================================================================

/// Queue entry: nodes pop closest-to-focus first, FIFO within ties.
struct QueuedNode {
    priority: f64,
    seq: u64,
    id: NodeId,
    /// Prefetch entry: resolve and request resources, emit no draws and do
    /// not recurse further.
    load_only: bool,
}

impl PartialEq for QueuedNode {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueuedNode {}

impl PartialOrd for QueuedNode {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedNode {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.priority
            .partial_cmp(&other.priority)
            .unwrap_or(CmpOrdering::Equal)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Outcome of trying to resolve one resource this frame.
enum Fetch<T> {
    Ready(T),
    Pending,
    Missing,
    Failed,
}

/// The per-map traversal engine. One instance per rendered map, owned by the
/// render thread (methods take `&mut self`; the only shared state underneath
/// is the [`ResourceManager`]).
pub struct Traversal {
    manager: Arc<ResourceManager>,
    map_config_name: String,
    config: Option<Arc<MapConfig>>,
    auth_applied: bool,
    root: Option<TraverseNode>,
    draws: Vec<DrawTask>,
    seq: u64,
}

impl Traversal {
    /// New engine for the map configuration at `map_config_url`. Nothing is
    /// fetched until the first [`traverse`](Self::traverse) call.
    pub fn new(manager: Arc<ResourceManager>, map_config_url: &str) -> Self {
        Self {
            manager,
            map_config_name: map_config_url.to_string(),
            config: None,
            auth_applied: false,
            root: None,
            draws: Vec::new(),
            seq: 0,
        }
    }

    /// Draw list produced by the last traversal, bottom of the tree first.
    pub fn draws(&self) -> &[DrawTask] {
        &self.draws
    }

    /// Node count of the live quadtree, for diagnostics.
    pub fn node_count(&self) -> usize {
        self.root.as_ref().map_or(0, |r| r.subtree_len())
    }

    /// Run one traversal pass and rebuild the draw list.
    ///
    /// `now` is wall clock unix seconds; it stamps node accesses for subtree
    /// pruning.
    pub fn traverse(&mut self, camera: &Camera, now: i64) {
        self.ensure_config();
        let Some(config) = self.config.clone() else {
            self.draws.clear();
            return;
        };
        self.ensure_auth(&config);

        let Some(mut root) = self.root.take() else {
            self.draws.clear();
            return;
        };

        let frustum = Frustum::from_view_proj(&camera.view_proj);
        let mut draws = Vec::new();
        let mut queue: BinaryHeap<QueuedNode> = BinaryHeap::new();
        let mut budget = self.manager.options().max_node_updates_per_tick;

        self.push_node(&mut queue, &root, camera, false);
        while let Some(entry) = queue.pop() {
            let Some(node) = find_node_mut(&mut root, entry.id) else {
                continue;
            };
            if !frustum.intersects(&node.aabb) {
                self.manager.statistics().node_culled();
                continue;
            }
            node.last_access_time = now;

            if node.validity == Validity::Indeterminate {
                if budget == 0 {
                    continue;
                }
                budget -= 1;
                let priority = entry.priority as f32;
                self.resolve_node(node, &config, priority);
            }
            match node.validity {
                Validity::Indeterminate | Validity::Invalid => continue,
                Validity::Valid => {}
            }
            if entry.load_only {
                continue;
            }

            // The configured lod range bounds refinement regardless of what
            // the meta tiles claim; child ids past it are never formed. The
            // addressable-lod clamp holds even against a hostile config.
            if node.id.lod >= config.lod_range[1].min(NodeId::MAX_LOD)
                || self.is_coarse_enough(node, camera)
                || !self.any_child_available(node)
            {
                self.emit_draws(node, &mut draws, entry.priority as f32);
                continue;
            }

            self.ensure_children(node);
            let refinable = node.children.iter().all(|c| c.validity != Validity::Indeterminate)
                && node.children.iter().any(|c| c.validity == Validity::Valid);
            if refinable {
                for child in &node.children {
                    self.push_node(&mut queue, child, camera, false);
                }
            } else {
                // Children still resolving: keep this node on screen and
                // prefetch the children for a later frame.
                self.emit_draws(node, &mut draws, entry.priority as f32);
                for child in &node.children {
                    self.push_node(&mut queue, child, camera, true);
                }
            }
        }

        root.prune(now, self.manager.options().node_release_timeout_secs);
        self.root = Some(root);
        self.draws = draws;
    }

    // -------------------------------------------------------------------------
    // Bootstrap
    // -------------------------------------------------------------------------

    /// Request/refresh the map configuration. On the first load (or when a
    /// refetched config replaces the old one) the quadtree is rebuilt from
    /// scratch; until then the previous config and tree stay in use.
    fn ensure_config(&mut self) {
        let res = self
            .manager
            .resource(&self.map_config_name, ResourceType::MapConfig);
        // The whole map hangs off this one resource.
        self.manager.touch(&res, f32::MAX);
        if res.state() != ResourceState::Ready {
            return;
        }
        let Some(DecodedResource::MapConfig(config)) = res.decoded() else {
            return;
        };
        let changed = self
            .config
            .as_ref()
            .map_or(true, |old| !Arc::ptr_eq(old, &config));
        if changed {
            info!(
                version = config.version,
                layers = config.bound_layers.len(),
                "map configuration loaded, rebuilding quadtree"
            );
            let aabb = Aabb::from_extents(config.root_extents);
            self.root = Some(TraverseNode::new(
                NodeId::ROOT,
                aabb,
                config.root_texel_size,
            ));
            self.draws.clear();
            self.auth_applied = false;
            self.config = Some(config);
        }
    }

    fn ensure_auth(&mut self, config: &MapConfig) {
        if self.auth_applied {
            return;
        }
        let Some(auth_url) = &config.auth_url else {
            self.auth_applied = true;
            return;
        };
        let res = self.manager.resource(auth_url, ResourceType::AuthConfig);
        self.manager.touch(&res, f32::MAX);
        match res.state() {
            ResourceState::Ready => {
                if let Some(DecodedResource::AuthConfig(auth)) = res.decoded() {
                    self.manager.set_auth_headers(auth.fetch_headers());
                    self.auth_applied = true;
                }
            }
            ResourceState::ErrorFatal | ResourceState::AvailFail => {
                warn!(url = %auth_url, "authorization config unavailable, proceeding without");
                self.auth_applied = true;
            }
            _ => {}
        }
    }

    // -------------------------------------------------------------------------
    // Node resolution
    // -------------------------------------------------------------------------

    /// Try to finish resolving `node`: meta record, surface mesh, bound
    /// stack. Leaves validity `Indeterminate` while anything is still
    /// loading; every touched resource has been (re-)requested.
    fn resolve_node(&self, node: &mut TraverseNode, config: &MapConfig, priority: f32) {
        if node.meta.is_none() {
            let (bx, by) = node.id.meta_block_origin();
            let name = expand_tile_url(&config.meta_url, node.id.lod, bx, by);
            match self.fetch_decoded(&name, ResourceType::MetaTile, priority) {
                Fetch::Ready(DecodedResource::MetaTile(meta)) => {
                    match meta.node_at(node.id.x, node.id.y) {
                        Some(record) => node.set_meta(*record),
                        None => {
                            node.validity = Validity::Invalid;
                            return;
                        }
                    }
                }
                Fetch::Ready(_) | Fetch::Missing | Fetch::Failed => {
                    node.validity = Validity::Invalid;
                    return;
                }
                Fetch::Pending => return,
            }
        }
        let meta = node.meta.as_ref().map(|m| *m).unwrap_or_default();

        if meta.has_navtile() {
            if let Some(nav_url) = &config.nav_url {
                let name = expand_tile_url(nav_url, node.id.lod, node.id.x, node.id.y);
                match self.fetch_decoded(&name, ResourceType::NavTile, priority) {
                    Fetch::Ready(DecodedResource::NavTile(nav)) => node.refine_surrogate(&nav),
                    // An unavailable nav tile degrades to the box-center
                    // surrogate rather than holding the node back.
                    Fetch::Ready(_) | Fetch::Missing | Fetch::Failed => {}
                    Fetch::Pending => return,
                }
            }
        }

        if !meta.has_geometry() {
            // A pure grouping node: valid, nothing to draw.
            node.draws.clear();
            node.validity = Validity::Valid;
            return;
        }

        let mesh_name = expand_tile_url(&config.mesh_url, node.id.lod, node.id.x, node.id.y);
        let mesh = match self.fetch_decoded(&mesh_name, ResourceType::Mesh, priority) {
            Fetch::Ready(DecodedResource::Mesh(mesh)) => mesh,
            Fetch::Ready(_) | Fetch::Missing | Fetch::Failed => {
                debug!(node = %node.id, "surface mesh unavailable");
                node.validity = Validity::Invalid;
                return;
            }
            Fetch::Pending => return,
        };
        let mesh_res = self.manager.resource(&mesh_name, ResourceType::Mesh);

        let Some(bound) = self.resolve_bound_stack(node.id, config, priority) else {
            return; // still loading
        };

        let mut draws = Vec::with_capacity(mesh.submeshes.len());
        for (si, submesh) in mesh.submeshes.iter().enumerate() {
            let surface_texture = if submesh.internal_uvs.is_some() {
                let name =
                    expand_tile_url(&config.texture_url, node.id.lod, node.id.x, node.id.y);
                match self.fetch_decoded(&name, ResourceType::Texture, priority) {
                    Fetch::Ready(_) => {
                        Some(Arc::downgrade(&self.manager.resource(&name, ResourceType::Texture)))
                    }
                    Fetch::Missing | Fetch::Failed => None,
                    Fetch::Pending => return,
                }
            } else {
                None
            };

            draws.push(DrawTask {
                node: node.id,
                mesh: Arc::downgrade(&mesh_res),
                submesh: si,
                surface_texture,
                bound: bound.clone(),
            });
        }
        node.draws = draws;
        node.validity = Validity::Valid;
        debug!(node = %node.id, draws = node.draws.len(), "node resolved");
    }

    /// Resolve the bound-layer stack for `id`.
    ///
    /// Layers are walked from the top of the stack down and the walk stops
    /// at the first watertight opaque layer: everything beneath it is
    /// occluded and never requested at all. `None` while any required
    /// resource is still loading; unavailable layers degrade to absence
    /// rather than blocking the node. The returned draws are bottom to top.
    fn resolve_bound_stack(
        &self,
        id: NodeId,
        config: &MapConfig,
        priority: f32,
    ) -> Option<Vec<BoundDraw>> {
        let mut draws: Vec<BoundDraw> = Vec::new();
        for layer in config.bound_layers.iter().rev() {
            let Some(info) = BoundParamInfo::resolve(layer, id) else {
                continue;
            };
            let vars = info.vars;

            let mut watertight = true;
            if let Some(meta_url) = &layer.meta_url {
                let (bx, by) = vars.meta_block_origin();
                let name = expand_tile_url(meta_url, vars.lod, bx, by);
                match self.fetch_decoded(&name, ResourceType::BoundMetaTile, priority) {
                    Fetch::Ready(DecodedResource::BoundMetaTile(bm)) => {
                        let flags = bm.flags_at(vars.x, vars.y);
                        if flags & BOUND_AVAILABLE == 0 {
                            continue;
                        }
                        watertight = flags & BOUND_WATERTIGHT != 0;
                    }
                    Fetch::Ready(_) | Fetch::Missing | Fetch::Failed => continue,
                    Fetch::Pending => return None,
                }
            }

            let tex_name = expand_tile_url(&layer.url, vars.lod, vars.x, vars.y);
            let tex = self.manager.resource(&tex_name, ResourceType::Texture);
            if let Some(avail) = &layer.availability {
                tex.set_availability(avail.clone().into());
            }
            self.manager.touch(&tex, priority);
            match tex.state() {
                ResourceState::Ready => {}
                ResourceState::AvailFail | ResourceState::ErrorFatal => continue,
                _ => return None,
            }

            draws.push(BoundDraw {
                layer_id: layer.id.clone(),
                texture: Arc::downgrade(&tex),
                uv_offset_scale: info.uv_offset_scale,
                transparent: layer.transparent,
            });
            if watertight && !layer.transparent {
                break;
            }
        }
        draws.reverse();
        Some(draws)
    }

    /// Emit a valid node's draws, re-touching every resource they reference
    /// so eviction never takes what is on screen. A draw whose resource was
    /// evicted anyway (it went untouched while the node was off screen)
    /// sends the node back through resolution instead of rendering stale
    /// references.
    fn emit_draws(&self, node: &mut TraverseNode, out: &mut Vec<DrawTask>, priority: f32) {
        let mut live = true;
        for draw in &node.draws {
            match draw.mesh.upgrade() {
                Some(res) => self.manager.touch(&res, priority),
                None => live = false,
            }
            if let Some(tex) = &draw.surface_texture {
                match tex.upgrade() {
                    Some(res) => self.manager.touch(&res, priority),
                    None => live = false,
                }
            }
            for bound in &draw.bound {
                match bound.texture.upgrade() {
                    Some(res) => self.manager.touch(&res, priority),
                    None => live = false,
                }
            }
        }
        if !live {
            debug!(node = %node.id, "draw resources evicted, re-resolving");
            node.draws.clear();
            node.validity = Validity::Indeterminate;
            return;
        }
        out.extend(node.draws.iter().cloned());
        self.manager.statistics().node_rendered();
    }

    /// Request a resource, touch it with `priority`, and classify its state.
    fn fetch_decoded(&self, name: &str, kind: ResourceType, priority: f32) -> Fetch<DecodedResource> {
        let res = self.manager.resource(name, kind);
        self.manager.touch(&res, priority);
        match res.state() {
            ResourceState::Ready => match res.decoded() {
                Some(decoded) => Fetch::Ready(decoded),
                None => Fetch::Pending,
            },
            ResourceState::AvailFail => Fetch::Missing,
            ResourceState::ErrorFatal => Fetch::Failed,
            _ => Fetch::Pending,
        }
    }

    // -------------------------------------------------------------------------
    // Refinement decisions
    // -------------------------------------------------------------------------

    /// A node is coarse enough when none of its bounding-volume corners
    /// projects a texel larger than the configured pixel threshold.
    fn is_coarse_enough(&self, node: &TraverseNode, camera: &Camera) -> bool {
        let threshold = self.manager.options().max_texel_to_pixel_scale;
        node.corners.iter().all(|&corner| {
            projected_texel_pixels(
                &camera.view_proj,
                corner,
                node.texel_size,
                camera.viewport_height,
            ) <= threshold
        })
    }

    fn any_child_available(&self, node: &TraverseNode) -> bool {
        node.meta
            .as_ref()
            .is_some_and(|m| (0..4).any(|i| m.child_available(i)))
    }

    /// Create child nodes for the quadrants the meta record reports
    /// available. Provisional bounding volumes split the parent's.
    fn ensure_children(&self, node: &mut TraverseNode) {
        let Some(meta) = node.meta else { return };
        if !node.children.is_empty() {
            return;
        }
        let texel = node.texel_size * 0.5;
        for (i, id) in node.id.children().into_iter().enumerate() {
            if meta.child_available(i as u8) {
                let aabb = node.child_aabb(i);
                node.children.push(TraverseNode::new(id, aabb, texel));
            }
        }
    }

    fn push_node(
        &mut self,
        queue: &mut BinaryHeap<QueuedNode>,
        node: &TraverseNode,
        camera: &Camera,
        load_only: bool,
    ) {
        let dist = (node.surrogate - camera.focus).length();
        self.seq += 1;
        queue.push(QueuedNode {
            priority: 1.0 / (1.0 + dist),
            seq: self.seq,
            id: node.id,
            load_only,
        });
    }
}

/// Walk from the root down to `id`, following the quadtree bit path.
fn find_node_mut(root: &mut TraverseNode, id: NodeId) -> Option<&mut TraverseNode> {
    let mut node = root;
    if node.id.lod > id.lod {
        return None;
    }
    for lod in (node.id.lod + 1)..=id.lod {
        let want = id.ancestor_at(lod);
        node = node.children.iter_mut().find(|c| c.id == want)?;
    }
    (node.id == id).then_some(node)
}
