//! Per-kind payload decoding.
//!
//! Every resource kind is known at compile time, so decoding is a plain match
//! over [`ResourceType`] producing a [`DecodedResource`] variant. Decoded
//! payloads are wrapped in `Arc` so that draw tasks and traversal nodes can
//! keep them alive cheaply after the resource itself is evicted mid-frame.
//!
//! Formats:
//! - map / auth / bound-layer configuration: JSON (serde);
//! - meta tiles, bound meta bitmaps, meshes, nav tiles: compact little-endian
//!   binary formats documented on their types;
//! - textures: any format `image` can sniff, normalized to RGBA8.
//!
//! Decode failures are surfaced as [`DecodeError`] and turned into a
//! permanent resource failure by the manager; they never panic.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ResourceType;

/// Tiles covered by one meta tile along each axis (meta tiles aggregate an
/// 8×8 block of per-tile records into one fetch).
pub const META_BLOCK_SIZE: u32 = 8;

/// Errors produced while decoding a payload.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload truncated")]
    Truncated,

    #[error("bad magic for {0}")]
    BadMagic(&'static str),

    #[error("unsupported version {0}")]
    BadVersion(u16),

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

// =============================================================================
// Configuration documents (JSON)
// =============================================================================

/// Negative-availability heuristic attached to a tiled source.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AvailabilityDef {
    #[serde(default)]
    pub codes: Vec<u32>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub max_size: usize,
}

/// One bound layer: an overlay imagery source attachable to submeshes.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct BoundLayerDef {
    pub id: String,

    /// Texture url template with `{lod}`, `{x}`, `{y}` placeholders.
    pub url: String,

    /// Bound-meta bitmap url template; absent means the layer claims full
    /// coverage at every tile.
    #[serde(default)]
    pub meta_url: Option<String>,

    /// Inclusive lod range the source actually serves.
    pub lod_range: [u8; 2],

    /// Whether the imagery carries alpha (a transparent layer never occludes
    /// layers beneath it).
    #[serde(default)]
    pub transparent: bool,

    #[serde(default)]
    pub availability: Option<AvailabilityDef>,
}

/// Top-level map configuration document.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct MapConfig {
    pub version: u32,

    /// Url templates with `{lod}`, `{x}`, `{y}` placeholders.
    pub meta_url: String,
    pub mesh_url: String,
    pub texture_url: String,
    #[serde(default)]
    pub nav_url: Option<String>,

    /// Authentication document fetched before any tile requests carry
    /// credentials.
    #[serde(default)]
    pub auth_url: Option<String>,

    /// Bound layer stack, bottom-most first; later entries draw on top.
    #[serde(default)]
    pub bound_layers: Vec<BoundLayerDef>,

    /// World-space extents of the root tile: min xyz, max xyz.
    pub root_extents: [f64; 6],

    /// Texel size of the root tile, halved at each lod.
    pub root_texel_size: f64,

    /// Inclusive lod range of the surface.
    #[serde(default = "default_lod_range")]
    pub lod_range: [u8; 2],
}

fn default_lod_range() -> [u8; 2] {
    [0, 22]
}

/// Authentication document: a token plus extra request headers.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl AuthConfig {
    /// Headers to attach to authenticated fetches.
    pub fn fetch_headers(&self) -> Vec<(String, String)> {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if !self.token.is_empty() {
            headers.push(("Authorization".to_string(), format!("Bearer {}", self.token)));
        }
        headers
    }
}

/// Expand a `{lod}`/`{x}`/`{y}` url template for one tile.
pub fn expand_tile_url(template: &str, lod: u8, x: u32, y: u32) -> String {
    template
        .replace("{lod}", &lod.to_string())
        .replace("{x}", &x.to_string())
        .replace("{y}", &y.to_string())
}

// =============================================================================
// Meta tile (binary)
// =============================================================================

/// Flag bit: upper-left child exists. Bits 1..=3 follow in ur, ll, lr order.
pub const META_CHILD_UL: u8 = 1 << 0;
pub const META_CHILD_UR: u8 = 1 << 1;
pub const META_CHILD_LL: u8 = 1 << 2;
pub const META_CHILD_LR: u8 = 1 << 3;
/// Flag bit: the tile has renderable geometry.
pub const META_GEOMETRY: u8 = 1 << 4;
/// Flag bit: the tile has a nav (height) tile.
pub const META_NAVTILE: u8 = 1 << 5;
/// Flag bit: the record slot is used at all.
pub const META_USED: u8 = 1 << 6;

/// Per-tile record inside a meta tile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MetaNode {
    pub flags: u8,
    /// World-space extents: min xyz, max xyz.
    pub extents: [f64; 6],
    /// World units per texel of this tile's imagery.
    pub texel_size: f64,
}

impl MetaNode {
    pub fn is_used(&self) -> bool {
        self.flags & META_USED != 0
    }

    pub fn has_geometry(&self) -> bool {
        self.flags & META_GEOMETRY != 0
    }

    pub fn has_navtile(&self) -> bool {
        self.flags & META_NAVTILE != 0
    }

    /// Availability of child quadrant `i` (0 = ul, 1 = ur, 2 = ll, 3 = lr).
    pub fn child_available(&self, i: u8) -> bool {
        debug_assert!(i < 4);
        self.flags & (1 << i) != 0
    }
}

/// A block of per-tile metadata amortizing 64 single-tile lookups into one
/// fetch.
///
/// Binary layout (little endian):
///
/// ```text
/// magic "gsmt" (4) | version u16 (=1) | lod u8 | origin_x u32 | origin_y u32
/// then 64 records (row-major within the 8×8 block):
///   flags u8 | extents 6×f64 | texel_size f64
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct MetaTile {
    pub lod: u8,
    /// Tile coordinates of the block's upper-left corner (multiples of 8).
    pub origin: (u32, u32),
    pub nodes: Vec<MetaNode>,
}

const META_MAGIC: &[u8; 4] = b"gsmt";
const META_VERSION: u16 = 1;

impl MetaTile {
    /// Record for tile (x, y), if inside this block and used.
    pub fn node_at(&self, x: u32, y: u32) -> Option<&MetaNode> {
        let dx = x.checked_sub(self.origin.0)?;
        let dy = y.checked_sub(self.origin.1)?;
        if dx >= META_BLOCK_SIZE || dy >= META_BLOCK_SIZE {
            return None;
        }
        let node = &self.nodes[(dy * META_BLOCK_SIZE + dx) as usize];
        node.is_used().then_some(node)
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        if r.take(4)? != META_MAGIC {
            return Err(DecodeError::BadMagic("meta tile"));
        }
        let version = r.u16()?;
        if version != META_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let lod = r.u8()?;
        let origin = (r.u32()?, r.u32()?);
        let mut nodes = Vec::with_capacity((META_BLOCK_SIZE * META_BLOCK_SIZE) as usize);
        for _ in 0..META_BLOCK_SIZE * META_BLOCK_SIZE {
            let flags = r.u8()?;
            let mut extents = [0.0; 6];
            for e in &mut extents {
                *e = r.f64()?;
            }
            let texel_size = r.f64()?;
            nodes.push(MetaNode {
                flags,
                extents,
                texel_size,
            });
        }
        Ok(Self { lod, origin, nodes })
    }

    /// Serialize; used by delivery tooling and tests.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(META_MAGIC);
        out.extend_from_slice(&META_VERSION.to_le_bytes());
        out.push(self.lod);
        out.extend_from_slice(&self.origin.0.to_le_bytes());
        out.extend_from_slice(&self.origin.1.to_le_bytes());
        for node in &self.nodes {
            out.push(node.flags);
            for e in &node.extents {
                out.extend_from_slice(&e.to_le_bytes());
            }
            out.extend_from_slice(&node.texel_size.to_le_bytes());
        }
        out
    }

    /// An all-unused block, for tooling.
    pub fn empty(lod: u8, origin: (u32, u32)) -> Self {
        Self {
            lod,
            origin,
            nodes: vec![MetaNode::default(); (META_BLOCK_SIZE * META_BLOCK_SIZE) as usize],
        }
    }

    /// Mutable record for tile (x, y), for tooling.
    pub fn node_at_mut(&mut self, x: u32, y: u32) -> Option<&mut MetaNode> {
        let dx = x.checked_sub(self.origin.0)?;
        let dy = y.checked_sub(self.origin.1)?;
        if dx >= META_BLOCK_SIZE || dy >= META_BLOCK_SIZE {
            return None;
        }
        Some(&mut self.nodes[(dy * META_BLOCK_SIZE + dx) as usize])
    }
}

// =============================================================================
// Bound meta bitmap (binary)
// =============================================================================

/// Bound-meta flag bit: the layer has imagery for this tile.
pub const BOUND_AVAILABLE: u8 = 1 << 0;
/// Bound-meta flag bit: the imagery covers the tile without holes.
pub const BOUND_WATERTIGHT: u8 = 1 << 1;

/// Per-layer availability/watertightness flags for an 8×8 block of tiles
/// (one flag byte per 256×256-texel tile).
///
/// Binary layout: magic `"gsbm"` (4) | version u16 (=1) | 64 flag bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundMetaTile {
    pub flags: [u8; 64],
}

const BOUND_META_MAGIC: &[u8; 4] = b"gsbm";
const BOUND_META_VERSION: u16 = 1;

impl BoundMetaTile {
    /// Flags for tile (x, y); coordinates are taken modulo the block size.
    pub fn flags_at(&self, x: u32, y: u32) -> u8 {
        let dx = x % META_BLOCK_SIZE;
        let dy = y % META_BLOCK_SIZE;
        self.flags[(dy * META_BLOCK_SIZE + dx) as usize]
    }

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        if r.take(4)? != BOUND_META_MAGIC {
            return Err(DecodeError::BadMagic("bound meta tile"));
        }
        let version = r.u16()?;
        if version != BOUND_META_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let bytes = r.take(64)?;
        let mut flags = [0u8; 64];
        flags.copy_from_slice(bytes);
        Ok(Self { flags })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(BOUND_META_MAGIC);
        out.extend_from_slice(&BOUND_META_VERSION.to_le_bytes());
        out.extend_from_slice(&self.flags);
        out
    }
}

// =============================================================================
// Mesh (binary)
// =============================================================================

/// One draw unit of a tile mesh.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubMesh {
    pub vertices: Vec<[f32; 3]>,
    /// Internal uvs index the tile's own surface texture.
    pub internal_uvs: Option<Vec<[f32; 2]>>,
    pub indices: Vec<u16>,
}

/// Tile mesh payload.
///
/// Binary layout (little endian):
///
/// ```text
/// magic "gsme" (4) | version u16 (=1) | submesh count u16
/// per submesh:
///   flags u8 (bit0: internal uvs present)
///   vertex count u32 | index count u32
///   vertices 3×f32 each | [uvs 2×f32 each] | indices u16 each
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Mesh {
    pub submeshes: Vec<SubMesh>,
}

const MESH_MAGIC: &[u8; 4] = b"gsme";
const MESH_VERSION: u16 = 1;
const MESH_HAS_INTERNAL_UV: u8 = 1 << 0;

impl Mesh {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        if r.take(4)? != MESH_MAGIC {
            return Err(DecodeError::BadMagic("mesh"));
        }
        let version = r.u16()?;
        if version != MESH_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let count = r.u16()?;
        // Each submesh header alone is 9 bytes.
        r.check_count(count as usize, 9)?;
        let mut submeshes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let flags = r.u8()?;
            let vertex_count = r.u32()? as usize;
            let index_count = r.u32()? as usize;
            // Counts come off the wire: verify the payload can actually hold
            // them before sizing any allocation from them.
            let per_vertex = if flags & MESH_HAS_INTERNAL_UV != 0 { 20 } else { 12 };
            r.check_count(vertex_count, per_vertex)?;
            r.check_count(index_count, 2)?;
            let mut vertices = Vec::with_capacity(vertex_count);
            for _ in 0..vertex_count {
                vertices.push([r.f32()?, r.f32()?, r.f32()?]);
            }
            let internal_uvs = if flags & MESH_HAS_INTERNAL_UV != 0 {
                let mut uvs = Vec::with_capacity(vertex_count);
                for _ in 0..vertex_count {
                    uvs.push([r.f32()?, r.f32()?]);
                }
                Some(uvs)
            } else {
                None
            };
            let mut indices = Vec::with_capacity(index_count);
            for _ in 0..index_count {
                let i = r.u16()?;
                if i as usize >= vertex_count {
                    return Err(DecodeError::Malformed(format!(
                        "index {} out of range ({} vertices)",
                        i, vertex_count
                    )));
                }
                indices.push(i);
            }
            submeshes.push(SubMesh {
                vertices,
                internal_uvs,
                indices,
            });
        }
        Ok(Self { submeshes })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(MESH_MAGIC);
        out.extend_from_slice(&MESH_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.submeshes.len() as u16).to_le_bytes());
        for sm in &self.submeshes {
            let flags = if sm.internal_uvs.is_some() {
                MESH_HAS_INTERNAL_UV
            } else {
                0
            };
            out.push(flags);
            out.extend_from_slice(&(sm.vertices.len() as u32).to_le_bytes());
            out.extend_from_slice(&(sm.indices.len() as u32).to_le_bytes());
            for v in &sm.vertices {
                for c in v {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            if let Some(uvs) = &sm.internal_uvs {
                for uv in uvs {
                    for c in uv {
                        out.extend_from_slice(&c.to_le_bytes());
                    }
                }
            }
            for i in &sm.indices {
                out.extend_from_slice(&i.to_le_bytes());
            }
        }
        out
    }

    /// Bytes the mesh occupies on the GPU once uploaded.
    pub fn gpu_bytes(&self) -> u64 {
        self.submeshes
            .iter()
            .map(|sm| {
                (sm.vertices.len() * 12
                    + sm.internal_uvs.as_ref().map_or(0, |u| u.len() * 8)
                    + sm.indices.len() * 2) as u64
            })
            .sum()
    }
}

// =============================================================================
// Texture
// =============================================================================

/// Decoded imagery, normalized to RGBA8.
#[derive(Clone, Debug, PartialEq)]
pub struct Texture {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

impl Texture {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let img = image::load_from_memory(data)?.to_rgba8();
        let (width, height) = img.dimensions();
        Ok(Self {
            width,
            height,
            pixels: img.into_raw(),
        })
    }
}

// =============================================================================
// Nav tile (binary)
// =============================================================================

/// Height grid used for surrogate points and navigation.
///
/// Binary layout: magic `"gsnv"` (4) | version u16 (=1) | width u16 |
/// height u16 | heights f32 × width×height (row major).
#[derive(Clone, Debug, PartialEq)]
pub struct NavTile {
    pub width: u16,
    pub height: u16,
    pub heights: Vec<f32>,
}

const NAV_MAGIC: &[u8; 4] = b"gsnv";
const NAV_VERSION: u16 = 1;

impl NavTile {
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(data);
        if r.take(4)? != NAV_MAGIC {
            return Err(DecodeError::BadMagic("nav tile"));
        }
        let version = r.u16()?;
        if version != NAV_VERSION {
            return Err(DecodeError::BadVersion(version));
        }
        let width = r.u16()?;
        let height = r.u16()?;
        let count = width as usize * height as usize;
        r.check_count(count, 4)?;
        let mut heights = Vec::with_capacity(count);
        for _ in 0..count {
            heights.push(r.f32()?);
        }
        Ok(Self {
            width,
            height,
            heights,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(NAV_MAGIC);
        out.extend_from_slice(&NAV_VERSION.to_le_bytes());
        out.extend_from_slice(&self.width.to_le_bytes());
        out.extend_from_slice(&self.height.to_le_bytes());
        for h in &self.heights {
            out.extend_from_slice(&h.to_le_bytes());
        }
        out
    }
}

// =============================================================================
// Dispatch
// =============================================================================

/// Decoded payload, one variant per resource kind.
#[derive(Clone, Debug)]
pub enum DecodedResource {
    MapConfig(Arc<MapConfig>),
    AuthConfig(Arc<AuthConfig>),
    BoundLayerConfig(Arc<BoundLayerDef>),
    MetaTile(Arc<MetaTile>),
    BoundMetaTile(Arc<BoundMetaTile>),
    Mesh(Arc<Mesh>),
    Texture(Arc<Texture>),
    NavTile(Arc<NavTile>),
}

impl DecodedResource {
    /// CPU-side memory cost in bytes.
    pub fn ram_cost(&self) -> u64 {
        match self {
            DecodedResource::MapConfig(_)
            | DecodedResource::AuthConfig(_)
            | DecodedResource::BoundLayerConfig(_) => 1024,
            DecodedResource::MetaTile(m) => (m.nodes.len() * std::mem::size_of::<MetaNode>()) as u64,
            DecodedResource::BoundMetaTile(_) => 64,
            DecodedResource::Mesh(m) => m.gpu_bytes(),
            DecodedResource::Texture(t) => t.pixels.len() as u64,
            DecodedResource::NavTile(n) => (n.heights.len() * 4) as u64,
        }
    }

    /// GPU-side memory cost in bytes, once uploaded.
    pub fn gpu_cost(&self) -> u64 {
        match self {
            DecodedResource::Mesh(m) => m.gpu_bytes(),
            DecodedResource::Texture(t) => t.pixels.len() as u64,
            _ => 0,
        }
    }
}

/// Decode a payload according to its resource kind.
pub fn decode(kind: ResourceType, data: &[u8]) -> Result<DecodedResource, DecodeError> {
    match kind {
        ResourceType::MapConfig => Ok(DecodedResource::MapConfig(Arc::new(serde_json::from_slice(
            data,
        )?))),
        ResourceType::AuthConfig => Ok(DecodedResource::AuthConfig(Arc::new(
            serde_json::from_slice(data)?,
        ))),
        ResourceType::BoundLayerConfig => Ok(DecodedResource::BoundLayerConfig(Arc::new(
            serde_json::from_slice(data)?,
        ))),
        ResourceType::MetaTile => Ok(DecodedResource::MetaTile(Arc::new(MetaTile::decode(data)?))),
        ResourceType::BoundMetaTile => Ok(DecodedResource::BoundMetaTile(Arc::new(
            BoundMetaTile::decode(data)?,
        ))),
        ResourceType::Mesh => Ok(DecodedResource::Mesh(Arc::new(Mesh::decode(data)?))),
        ResourceType::Texture => Ok(DecodedResource::Texture(Arc::new(Texture::decode(data)?))),
        ResourceType::NavTile => Ok(DecodedResource::NavTile(Arc::new(NavTile::decode(data)?))),
    }
}

// =============================================================================
// Binary reader
// =============================================================================

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.pos + n > self.data.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reject a declared element count the remaining bytes cannot possibly
    /// satisfy, before any allocation is sized from it.
    fn check_count(&self, count: usize, bytes_per_element: usize) -> Result<(), DecodeError> {
        match count.checked_mul(bytes_per_element) {
            Some(needed) if needed <= self.remaining() => Ok(()),
            _ => Err(DecodeError::Truncated),
        }
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map_config() -> String {
        serde_json::json!({
            "version": 1,
            "meta_url": "https://host/meta/{lod}/{x}/{y}",
            "mesh_url": "https://host/mesh/{lod}/{x}/{y}",
            "texture_url": "https://host/tex/{lod}/{x}/{y}",
            "root_extents": [-1.0, -1.0, 0.0, 1.0, 1.0, 0.5],
            "root_texel_size": 0.25,
            "bound_layers": [
                {
                    "id": "ortho",
                    "url": "https://ortho/{lod}/{x}/{y}",
                    "lod_range": [2, 6],
                    "availability": { "codes": [404], "max_size": 32 }
                }
            ]
        })
        .to_string()
    }

    #[test]
    fn test_map_config_json() {
        let decoded = decode(ResourceType::MapConfig, sample_map_config().as_bytes()).unwrap();
        let DecodedResource::MapConfig(config) = decoded else {
            panic!("wrong variant");
        };
        assert_eq!(config.version, 1);
        assert_eq!(config.lod_range, [0, 22]); // default
        assert_eq!(config.bound_layers.len(), 1);
        assert_eq!(config.bound_layers[0].lod_range, [2, 6]);
        assert!(!config.bound_layers[0].transparent);
        assert_eq!(
            config.bound_layers[0].availability.as_ref().unwrap().codes,
            vec![404]
        );
    }

    #[test]
    fn test_map_config_rejects_garbage() {
        assert!(decode(ResourceType::MapConfig, b"not json").is_err());
    }

    #[test]
    fn test_expand_tile_url() {
        assert_eq!(
            expand_tile_url("https://host/{lod}-{x}-{y}.bin", 3, 1, 2),
            "https://host/3-1-2.bin"
        );
    }

    #[test]
    fn test_auth_config_headers() {
        let auth: AuthConfig =
            serde_json::from_str(r#"{"token": "abc", "headers": {"X-Key": "k"}}"#).unwrap();
        let headers = auth.fetch_headers();
        assert!(headers.contains(&("X-Key".to_string(), "k".to_string())));
        assert!(headers.contains(&("Authorization".to_string(), "Bearer abc".to_string())));
    }

    #[test]
    fn test_meta_tile_round_trip() {
        let mut meta = MetaTile::empty(4, (8, 16));
        {
            let node = meta.node_at_mut(9, 17).unwrap();
            node.flags = META_USED | META_GEOMETRY | META_CHILD_UL | META_CHILD_LR;
            node.extents = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
            node.texel_size = 0.5;
        }
        let decoded = MetaTile::decode(&meta.to_bytes()).unwrap();
        assert_eq!(decoded, meta);

        let node = decoded.node_at(9, 17).unwrap();
        assert!(node.has_geometry());
        assert!(node.child_available(0));
        assert!(!node.child_available(1));
        assert!(node.child_available(3));

        // Unused slots report absent.
        assert!(decoded.node_at(8, 16).is_none());
        // Out-of-block coordinates report absent.
        assert!(decoded.node_at(7, 16).is_none());
        assert!(decoded.node_at(16, 16).is_none());
    }

    #[test]
    fn test_meta_tile_rejects_bad_magic_and_version() {
        let mut bytes = MetaTile::empty(0, (0, 0)).to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            MetaTile::decode(&bytes),
            Err(DecodeError::BadMagic(_))
        ));

        let mut bytes = MetaTile::empty(0, (0, 0)).to_bytes();
        bytes[4] = 9;
        assert!(matches!(
            MetaTile::decode(&bytes),
            Err(DecodeError::BadVersion(9))
        ));
    }

    #[test]
    fn test_meta_tile_truncated() {
        let bytes = MetaTile::empty(0, (0, 0)).to_bytes();
        assert!(matches!(
            MetaTile::decode(&bytes[..bytes.len() - 1]),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn test_bound_meta_round_trip() {
        let mut flags = [0u8; 64];
        flags[9] = BOUND_AVAILABLE | BOUND_WATERTIGHT; // (x=1, y=1)
        let tile = BoundMetaTile { flags };
        let decoded = BoundMetaTile::decode(&tile.to_bytes()).unwrap();
        assert_eq!(decoded.flags_at(1, 1), BOUND_AVAILABLE | BOUND_WATERTIGHT);
        assert_eq!(decoded.flags_at(0, 0), 0);
        // Coordinates wrap into the block.
        assert_eq!(decoded.flags_at(9, 9), BOUND_AVAILABLE | BOUND_WATERTIGHT);
    }

    #[test]
    fn test_mesh_round_trip() {
        let mesh = Mesh {
            submeshes: vec![
                SubMesh {
                    vertices: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
                    internal_uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
                    indices: vec![0, 1, 2],
                },
                SubMesh {
                    vertices: vec![[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0]],
                    internal_uvs: None,
                    indices: vec![2, 1, 0],
                },
            ],
        };
        let decoded = Mesh::decode(&mesh.to_bytes()).unwrap();
        assert_eq!(decoded, mesh);
        assert!(decoded.gpu_bytes() > 0);
    }

    #[test]
    fn test_mesh_rejects_out_of_range_index() {
        let mesh = Mesh {
            submeshes: vec![SubMesh {
                vertices: vec![[0.0; 3]],
                internal_uvs: None,
                indices: vec![1],
            }],
        };
        assert!(matches!(
            Mesh::decode(&mesh.to_bytes()),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_mesh_rejects_absurd_vertex_count() {
        // Header claiming u32::MAX vertices with no payload behind it. The
        // declared count must be rejected as truncation up front, not turned
        // into a multi-gigabyte reservation.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MESH_MAGIC);
        bytes.extend_from_slice(&MESH_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes()); // one submesh
        bytes.push(0); // no internal uvs
        bytes.extend_from_slice(&u32::MAX.to_le_bytes()); // vertex count
        bytes.extend_from_slice(&0u32.to_le_bytes()); // index count
        assert!(matches!(Mesh::decode(&bytes), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_mesh_rejects_absurd_index_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MESH_MAGIC);
        bytes.extend_from_slice(&MESH_VERSION.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.push(0);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(Mesh::decode(&bytes), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_mesh_rejects_absurd_submesh_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MESH_MAGIC);
        bytes.extend_from_slice(&MESH_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(Mesh::decode(&bytes), Err(DecodeError::Truncated)));
    }

    #[test]
    fn test_texture_decode_png() {
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([1, 2, 3, 255]));
        let mut png = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut png),
            image::ImageFormat::Png,
        )
        .unwrap();

        let tex = Texture::decode(&png).unwrap();
        assert_eq!((tex.width, tex.height), (2, 3));
        assert_eq!(tex.pixels.len(), 2 * 3 * 4);
        assert_eq!(&tex.pixels[0..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_texture_decode_garbage_fails() {
        assert!(Texture::decode(b"definitely not an image").is_err());
    }

    #[test]
    fn test_nav_tile_round_trip() {
        let nav = NavTile {
            width: 2,
            height: 2,
            heights: vec![0.0, 1.5, -2.0, 7.25],
        };
        assert_eq!(NavTile::decode(&nav.to_bytes()).unwrap(), nav);
    }

    #[test]
    fn test_nav_tile_rejects_absurd_dimensions() {
        // Maximum width × height with an empty height grid behind it.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(NAV_MAGIC);
        bytes.extend_from_slice(&NAV_VERSION.to_le_bytes());
        bytes.extend_from_slice(&u16::MAX.to_le_bytes());
        bytes.extend_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(
            NavTile::decode(&bytes),
            Err(DecodeError::Truncated)
        ));
    }

    #[test]
    fn test_costs() {
        let tex = DecodedResource::Texture(Arc::new(Texture {
            width: 4,
            height: 4,
            pixels: vec![0; 64],
        }));
        assert_eq!(tex.ram_cost(), 64);
        assert_eq!(tex.gpu_cost(), 64);

        let meta = DecodedResource::MetaTile(Arc::new(MetaTile::empty(0, (0, 0))));
        assert!(meta.ram_cost() > 0);
        assert_eq!(meta.gpu_cost(), 0);
    }
}
