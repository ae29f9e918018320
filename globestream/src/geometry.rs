//! Bounding boxes, frustum culling and screen-space projection helpers.
//!
//! All math is double precision: planetary coordinates overflow f32 long
//! before lod 20.

use glam::{DMat4, DVec3, DVec4};

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    /// From `[min_x, min_y, min_z, max_x, max_y, max_z]`.
    pub fn from_extents(e: [f64; 6]) -> Self {
        Self {
            min: DVec3::new(e[0], e[1], e[2]),
            max: DVec3::new(e[3], e[4], e[5]),
        }
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    /// The 8 corners, z-major.
    pub fn corners(&self) -> [DVec3; 8] {
        let (a, b) = (self.min, self.max);
        [
            DVec3::new(a.x, a.y, a.z),
            DVec3::new(b.x, a.y, a.z),
            DVec3::new(a.x, b.y, a.z),
            DVec3::new(b.x, b.y, a.z),
            DVec3::new(a.x, a.y, b.z),
            DVec3::new(b.x, a.y, b.z),
            DVec3::new(a.x, b.y, b.z),
            DVec3::new(b.x, b.y, b.z),
        ]
    }
}

/// Six view-frustum planes, inward-facing (`n · p + d >= 0` inside).
#[derive(Clone, Copy, Debug)]
pub struct Frustum {
    planes: [DVec4; 6],
}

impl Frustum {
    /// Extract planes from a view-projection matrix (Gribb/Hartmann).
    pub fn from_view_proj(m: &DMat4) -> Self {
        let r0 = m.row(0);
        let r1 = m.row(1);
        let r2 = m.row(2);
        let r3 = m.row(3);
        Self {
            planes: [
                r3 + r0, // left
                r3 - r0, // right
                r3 + r1, // bottom
                r3 - r1, // top
                r3 + r2, // near
                r3 - r2, // far
            ],
        }
    }

    /// Conservative AABB test: for each plane, the corner matching the
    /// plane's normal signs (the positive vertex) is tested; if it is behind
    /// any plane, the whole box is outside.
    pub fn intersects(&self, aabb: &Aabb) -> bool {
        for plane in &self.planes {
            let pv = DVec3::new(
                if plane.x >= 0.0 { aabb.max.x } else { aabb.min.x },
                if plane.y >= 0.0 { aabb.max.y } else { aabb.min.y },
                if plane.z >= 0.0 { aabb.max.z } else { aabb.min.z },
            );
            if plane.x * pv.x + plane.y * pv.y + plane.z * pv.z + plane.w < 0.0 {
                return false;
            }
        }
        true
    }
}

/// Screen-space length, in pixels, of a world-space offset of `texel_size` at
/// point `p`.
///
/// Points behind the camera project to infinity: a node straddling the near
/// plane is never judged coarse enough from unprojectable corners.
pub fn projected_texel_pixels(
    view_proj: &DMat4,
    p: DVec3,
    texel_size: f64,
    viewport_height: f64,
) -> f64 {
    // A diagonal offset of total length texel_size; direction is arbitrary
    // but must not be axis-degenerate for axis-aligned geometry.
    let offset = DVec3::splat(texel_size / 3.0_f64.sqrt());
    let (Some(a), Some(b)) = (project_ndc(view_proj, p), project_ndc(view_proj, p + offset))
    else {
        return f64::INFINITY;
    };
    let dx = (b.x - a.x) * viewport_height * 0.5;
    let dy = (b.y - a.y) * viewport_height * 0.5;
    (dx * dx + dy * dy).sqrt()
}

fn project_ndc(view_proj: &DMat4, p: DVec3) -> Option<DVec3> {
    let clip = *view_proj * DVec4::new(p.x, p.y, p.z, 1.0);
    if clip.w <= 0.0 {
        return None;
    }
    Some(DVec3::new(clip.x / clip.w, clip.y / clip.w, clip.z / clip.w))
}
