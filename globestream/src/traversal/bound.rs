//! Bound-layer parameter resolution.
//!
//! A bound layer drapes external imagery over the surface mesh. Layers
//! publish a lod range narrower than the mesh's; a finer tile falls back to
//! the deepest layer tile that exists and maps a sub-rectangle of that
//! ancestor's texture instead. Opaque watertight layers occlude everything
//! stacked beneath them, which lets whole branches of the stack skip loading.

use crate::resources::BoundLayerDef;

use super::node::NodeId;

/// Texture coordinates of a draw against one bound layer: which layer tile
/// to sample and which sub-rectangle of it covers the drawn node.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundParamInfo {
    /// The node being drawn.
    pub orig: NodeId,
    /// The layer tile actually sampled (== `orig` when no fallback applies).
    pub vars: NodeId,
    /// Lod levels of fallback applied.
    pub depth: u8,
    /// Sub-rectangle of the sampled texture: offset u, offset v, scale u,
    /// scale v. Identity is `[0, 0, 1, 1]`.
    pub uv_offset_scale: [f64; 4],
}

impl BoundParamInfo {
    /// Resolve the layer tile for `id`, flooring to the layer's maximum lod.
    ///
    /// Returns `None` when the node is coarser than the layer's minimum lod:
    /// the layer simply does not apply there.
    pub fn resolve(layer: &BoundLayerDef, id: NodeId) -> Option<Self> {
        let [lod_min, lod_max] = layer.lod_range;
        if id.lod < lod_min {
            return None;
        }
        let depth = id.lod.saturating_sub(lod_max);
        let vars = id.ancestor_at(id.lod - depth);
        let scale = 1.0 / f64::from(1u32 << depth);
        let mask = (1u32 << depth) - 1;
        let off_u = f64::from(id.x & mask) * scale;
        let off_v = f64::from(id.y & mask) * scale;
        Some(Self {
            orig: id,
            vars,
            depth,
            uv_offset_scale: [off_u, off_v, scale, scale],
        })
    }
}
