//! Integer grid geometry on the XZ plane
//!
//! Grid points are passed as slices where index 0 is x and index 2 is z; the
//! height component is ignored by every predicate here. The sign convention
//! follows the contour winding produced by the contour tracer: a negative
//! doubled area means `c` lies to the left of the directed line `a -> b`.

/// Per-direction x offsets for the four cardinal directions (-X, +Z, +X, -Z)
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];

/// Per-direction z offsets for the four cardinal directions (-X, +Z, +X, -Z)
pub const DIR_OFFSET_Y: [i32; 4] = [0, 1, 0, -1];

/// Returns the x offset of a neighbour cell in direction `dir`
#[inline]
pub fn get_dir_offset_x(dir: i32) -> i32 {
    DIR_OFFSET_X[(dir & 0x03) as usize]
}

/// Returns the z offset of a neighbour cell in direction `dir`
#[inline]
pub fn get_dir_offset_y(dir: i32) -> i32 {
    DIR_OFFSET_Y[(dir & 0x03) as usize]
}

/// Twice the signed area of triangle (a, b, c) on the XZ plane
#[inline]
pub fn area2(a: &[i32], b: &[i32], c: &[i32]) -> i32 {
    (b[0] - a[0]) * (c[2] - a[2]) - (c[0] - a[0]) * (b[2] - a[2])
}

/// True if `c` is strictly left of the directed line `a -> b`
#[inline]
pub fn left(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) < 0
}

/// True if `c` is left of or on the directed line `a -> b`
#[inline]
pub fn left_on(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) <= 0
}

#[inline]
pub fn collinear(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    area2(a, b, c) == 0
}

/// Compares two grid points on the XZ plane
#[inline]
pub fn vequal(a: &[i32], b: &[i32]) -> bool {
    a[0] == b[0] && a[2] == b[2]
}

/// True if segments ab and cd intersect properly, sharing a point interior to both.
pub fn intersect_prop(a: &[i32], b: &[i32], c: &[i32], d: &[i32]) -> bool {
    // Eliminate improper cases.
    if collinear(a, b, c) || collinear(a, b, d) || collinear(c, d, a) || collinear(c, d, b) {
        return false;
    }

    (left(a, b, c) ^ left(a, b, d)) && (left(c, d, a) ^ left(c, d, b))
}

/// True if `c` lies on the closed segment ab
pub fn between(a: &[i32], b: &[i32], c: &[i32]) -> bool {
    if !collinear(a, b, c) {
        return false;
    }
    // If ab not vertical, check betweenness on x; else on z.
    if a[0] != b[0] {
        (a[0] <= c[0] && c[0] <= b[0]) || (a[0] >= c[0] && c[0] >= b[0])
    } else {
        (a[2] <= c[2] && c[2] <= b[2]) || (a[2] >= c[2] && c[2] >= b[2])
    }
}

/// True if segments ab and cd intersect, properly or improperly
pub fn intersect(a: &[i32], b: &[i32], c: &[i32], d: &[i32]) -> bool {
    if intersect_prop(a, b, c, d) {
        return true;
    }
    between(a, b, c) || between(a, b, d) || between(c, d, a) || between(c, d, b)
}

/// Squared distance from grid point (x, z) to the segment (px, pz)-(qx, qz)
pub fn distance_pt_seg(x: i32, z: i32, px: i32, pz: i32, qx: i32, qz: i32) -> f32 {
    let pqx = (qx - px) as f32;
    let pqz = (qz - pz) as f32;
    let mut dx = (x - px) as f32;
    let mut dz = (z - pz) as f32;
    let d = pqx * pqx + pqz * pqz;
    let mut t = pqx * dx + pqz * dz;
    if d > 0.0 {
        t /= d;
    }
    t = t.clamp(0.0, 1.0);

    dx = px as f32 + t * pqx - x as f32;
    dz = pz as f32 + t * pqz - z as f32;

    dx * dx + dz * dz
}

/// Inclusive overlap test of two integer ranges
#[inline]
pub fn overlap_range(amin: i32, amax: i32, bmin: i32, bmax: i32) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Exclusive overlap test of two integer ranges; ranges that only touch do not overlap
#[inline]
pub fn overlap_range_exclusive(amin: i32, amax: i32, bmin: i32, bmax: i32) -> bool {
    !(amin >= bmax || amax <= bmin)
}
