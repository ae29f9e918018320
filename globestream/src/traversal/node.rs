//! Quadtree cells persistent across frames.

use glam::DVec3;

use crate::geometry::Aabb;
use crate::resources::{MetaNode, NavTile, META_BLOCK_SIZE};

use super::DrawTask;

/// Address of one quadtree cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId {
    pub lod: u8,
    pub x: u32,
    pub y: u32,
}

impl NodeId {
    pub const ROOT: NodeId = NodeId { lod: 0, x: 0, y: 0 };

    /// Deepest addressable lod: one more level would overflow the u32 tile
    /// coordinates.
    pub const MAX_LOD: u8 = 31;

    pub fn new(lod: u8, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// The four children, quadrant order ul, ur, ll, lr.
    pub fn children(&self) -> [NodeId; 4] {
        let (lod, x, y) = (self.lod + 1, self.x * 2, self.y * 2);
        [
            NodeId::new(lod, x, y),
            NodeId::new(lod, x + 1, y),
            NodeId::new(lod, x, y + 1),
            NodeId::new(lod, x + 1, y + 1),
        ]
    }

    /// Upper-left tile of the meta block containing this node.
    pub fn meta_block_origin(&self) -> (u32, u32) {
        (
            self.x & !(META_BLOCK_SIZE - 1),
            self.y & !(META_BLOCK_SIZE - 1),
        )
    }

    /// This node's position at a coarser lod (for bound-layer fallback).
    pub fn ancestor_at(&self, lod: u8) -> NodeId {
        debug_assert!(lod <= self.lod);
        let shift = self.lod - lod;
        NodeId::new(lod, self.x >> shift, self.y >> shift)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.lod, self.x, self.y)
    }
}

/// Tri-state resolution result of a node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Validity {
    /// Resolution not finished; resources still loading.
    #[default]
    Indeterminate,
    /// Surface resolution failed or the tile does not exist.
    Invalid,
    /// Draws resolved; the node is renderable.
    Valid,
}

/// One quadtree cell, persistent across frames.
///
/// Created lazily when a parent's meta record reports the quadrant
/// available; destroyed when an ancestor's subtree is pruned after staying
/// untouched past the release timeout.
#[derive(Debug)]
pub struct TraverseNode {
    pub id: NodeId,
    /// World-space corners of the bounding volume.
    pub corners: [DVec3; 8],
    pub aabb: Aabb,
    /// Representative point for distance-based priorities.
    pub surrogate: DVec3,
    /// World units per texel; drives the coarseness test.
    pub texel_size: f64,
    pub validity: Validity,
    /// Wall clock (unix seconds) of the last frame that visited this node.
    pub last_access_time: i64,
    /// Meta record, copied out of the block meta tile when it resolves.
    pub meta: Option<MetaNode>,
    pub children: Vec<TraverseNode>,
    /// Resolved surface + bound-layer draw list (valid nodes only).
    pub draws: Vec<DrawTask>,
}

impl TraverseNode {
    /// New unresolved node with a provisional bounding volume (replaced by
    /// the meta record's extents once it resolves).
    pub fn new(id: NodeId, provisional: Aabb, texel_size: f64) -> Self {
        Self {
            id,
            corners: provisional.corners(),
            aabb: provisional,
            surrogate: provisional.center(),
            texel_size,
            validity: Validity::Indeterminate,
            last_access_time: 0,
            meta: None,
            children: Vec::new(),
            draws: Vec::new(),
        }
    }

    /// Adopt the authoritative meta record.
    pub fn set_meta(&mut self, meta: MetaNode) {
        let aabb = Aabb::from_extents(meta.extents);
        self.corners = aabb.corners();
        self.surrogate = aabb.center();
        self.aabb = aabb;
        self.texel_size = meta.texel_size;
        self.meta = Some(meta);
    }

    /// Lift the surrogate to the tile's mean surface height. The bounding
    /// volume center over-estimates distance on flat terrain inside a tall
    /// box; the nav grid gives the actual surface.
    pub fn refine_surrogate(&mut self, nav: &NavTile) {
        if nav.heights.is_empty() {
            return;
        }
        let sum: f64 = nav.heights.iter().map(|&h| f64::from(h)).sum();
        self.surrogate.z = sum / nav.heights.len() as f64;
    }

    /// The provisional bounding volume of child quadrant `i` (parent box
    /// split in x/y, z kept), used until the child's own meta resolves.
    pub fn child_aabb(&self, i: usize) -> Aabb {
        let c = self.aabb.center();
        let (min, max) = (self.aabb.min, self.aabb.max);
        let (x0, x1) = if i % 2 == 0 { (min.x, c.x) } else { (c.x, max.x) };
        let (y0, y1) = if i < 2 { (min.y, c.y) } else { (c.y, max.y) };
        Aabb::new(DVec3::new(x0, y0, min.z), DVec3::new(x1, y1, max.z))
    }

    /// Drop the subtrees of nodes untouched for longer than `timeout_secs`.
    pub fn prune(&mut self, now: i64, timeout_secs: i64) {
        if now - self.last_access_time > timeout_secs {
            if !self.children.is_empty() {
                tracing::debug!(node = %self.id, "pruning idle subtree");
                self.children.clear();
            }
        } else {
            for child in &mut self.children {
                child.prune(now, timeout_secs);
            }
        }
    }

    /// Total node count including self, for diagnostics.
    pub fn subtree_len(&self) -> usize {
        1 + self.children.iter().map(|c| c.subtree_len()).sum::<usize>()
    }
}
