//! Contour tracing and simplification for tile layers
//!
//! Each region of a partitioned layer is outlined by walking its boundary cell
//! edges. The raw outline is reduced with a max-deviation simplifier and every
//! remaining vertex is annotated with a corner height, the portal direction of
//! the edge that starts at it and whether the vertex is an interior seam that the
//! polygon mesh builder should try to remove.

use tilecache_common::{distance_pt_seg, get_dir_offset_x, get_dir_offset_y, sqr, Error, Result};

use super::tile_layer::TileLayer;
use super::NULL_AREA;

/// Vertex flag value meaning the outgoing edge is not a portal
pub const CONTOUR_NO_PORTAL: u8 = 0x0f;
/// Vertex flag bit marking a vertex for removal
pub const CONTOUR_REMOVE_VERTEX: u8 = 0x80;

/// Neighbour tag of hard boundary edges
const NULL_NEIGHBOUR: i32 = 0xff;
/// First neighbour tag used for portal edges, `PORTAL_TAG + dir`
const PORTAL_TAG: i32 = 0xf8;

/// A simplified contour vertex in layer grid coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContourVertex {
    pub x: i32,
    /// Corner height relative to the layer's `hmin`
    pub y: i32,
    pub z: i32,
    /// Portal direction of the edge starting at this vertex (low nibble) and
    /// [`CONTOUR_REMOVE_VERTEX`]
    pub flags: u8,
}

impl ContourVertex {
    /// Portal direction of the outgoing edge, if it leads out of the layer
    pub fn portal_dir(&self) -> Option<u8> {
        match self.flags & 0x0f {
            CONTOUR_NO_PORTAL => None,
            dir => Some(dir),
        }
    }

    pub fn should_remove(&self) -> bool {
        self.flags & CONTOUR_REMOVE_VERTEX != 0
    }
}

/// A simplified region outline
#[derive(Debug, Clone, Default)]
pub struct TileCacheContour {
    pub verts: Vec<ContourVertex>,
    pub reg: u8,
    pub area: u8,
}

/// Contours of every region of one layer, indexed by region id
#[derive(Debug, Clone, Default)]
pub struct TileCacheContourSet {
    pub conts: Vec<TileCacheContour>,
}

impl TileCacheContourSet {
    /// Number of contours with enough vertices to form a polygon
    pub fn valid_count(&self) -> usize {
        self.conts.iter().filter(|c| c.verts.len() >= 3).count()
    }
}

/// Raw outline under construction: `[x, y, z, neighbour_tag]` per vertex
struct TempContour {
    verts: Vec<[i32; 4]>,
    max_verts: usize,
}

impl TempContour {
    fn new(max_verts: usize) -> Self {
        Self {
            verts: Vec::with_capacity(max_verts),
            max_verts,
        }
    }

    /// Appends a vertex, extending the last segment instead when it stays on
    /// the same axis with the same neighbour tag. Returns false when full.
    fn append_vertex(&mut self, x: i32, y: i32, z: i32, r: i32) -> bool {
        let n = self.verts.len();
        if n > 1 {
            let pa = self.verts[n - 2];
            let pb = &mut self.verts[n - 1];
            if pb[3] == r {
                if pa[0] == pb[0] && pb[0] == x {
                    // Aligned along x-axis, update z.
                    pb[1] = y;
                    pb[2] = z;
                    return true;
                } else if pa[2] == pb[2] && pb[2] == z {
                    // Aligned along z-axis, update x.
                    pb[0] = x;
                    pb[1] = y;
                    return true;
                }
            }
        }

        if n + 1 > self.max_verts {
            return false;
        }
        self.verts.push([x, y, z, r]);
        true
    }
}

/// Region (or portal/boundary tag) on the other side of the edge of cell (ax, ay) in `dir`
fn get_neighbour_reg(layer: &TileLayer, ax: i32, ay: i32, dir: i32) -> i32 {
    let w = layer.width();
    let ia = (ax + ay * w) as usize;

    let con = layer.cons[ia] & 0xf;
    let portal = layer.cons[ia] >> 4;
    let mask = 1u8 << dir;

    if con & mask == 0 {
        // No connection, return portal or hard edge.
        if portal & mask != 0 {
            return PORTAL_TAG + dir;
        }
        return NULL_NEIGHBOUR;
    }

    let bx = ax + get_dir_offset_x(dir);
    let by = ay + get_dir_offset_y(dir);
    layer.regs[(bx + by * w) as usize] as i32
}

/// Traces the boundary of the region containing cell (x, y) into `cont`
fn walk_contour(layer: &TileLayer, mut x: i32, mut y: i32, cont: &mut TempContour) -> bool {
    let w = layer.width();
    let h = layer.height();
    cont.verts.clear();

    let start_x = x;
    let start_y = y;
    let reg = layer.regs[(x + y * w) as usize] as i32;

    // Start from the first solid edge, scanning from -Z around.
    let Some(start_dir) = (0..4)
        .map(|i| (i + 3) & 0x3)
        .find(|&dir| get_neighbour_reg(layer, x, y, dir) != reg)
    else {
        return true;
    };

    let mut dir = start_dir;
    let max_iter = w * h;
    let mut iter = 0;

    while iter < max_iter {
        let rn = get_neighbour_reg(layer, x, y, dir);

        let mut nx = x;
        let mut ny = y;
        let ndir;

        if rn != reg {
            // Solid edge.
            let mut px = x;
            let mut pz = y;
            match dir {
                0 => pz += 1,
                1 => {
                    px += 1;
                    pz += 1;
                }
                2 => px += 1,
                _ => {}
            }

            let height = layer.heights[(x + y * w) as usize] as i32;
            if !cont.append_vertex(px, height, pz, rn) {
                return false;
            }

            ndir = (dir + 1) & 0x3; // Rotate CW
        } else {
            // Move to next.
            nx = x + get_dir_offset_x(dir);
            ny = y + get_dir_offset_y(dir);
            ndir = (dir + 3) & 0x3; // Rotate CCW
        }

        if iter > 0 && x == start_x && y == start_y && dir == start_dir {
            break;
        }

        x = nx;
        y = ny;
        dir = ndir;
        iter += 1;
    }

    // Remove last vertex if it is a duplicate of the first one.
    if cont.verts.len() > 1 {
        let pa = cont.verts[cont.verts.len() - 1];
        let pb = cont.verts[0];
        if pa[0] == pb[0] && pa[2] == pb[2] {
            cont.verts.pop();
        }
    }

    true
}

/// Simplifies a raw outline.
///
/// `verts` holds `[x, y, z, neighbour_tag]` per vertex. Every change of
/// neighbour tag is kept; outlines without any change are seeded with their
/// lower-left and upper-right vertices. Raw vertices are then inserted while
/// their squared distance to the simplified edge exceeds `max_error²`.
pub fn simplify_contour(verts: &[[i32; 4]], max_error: f32) -> Vec<[i32; 4]> {
    let n = verts.len();
    if n == 0 {
        return Vec::new();
    }

    let mut poly: Vec<usize> = Vec::with_capacity(n);

    for i in 0..n {
        let j = (i + 1) % n;
        // Start of a wall segment.
        if verts[j][3] != verts[i][3] {
            poly.push(i);
        }
    }

    if poly.len() < 2 {
        // No transitions at all, seed with the extreme vertices.
        let mut lli = 0;
        let mut uri = 0;
        let (mut llx, mut llz) = (verts[0][0], verts[0][2]);
        let (mut urx, mut urz) = (verts[0][0], verts[0][2]);
        for (i, v) in verts.iter().enumerate().skip(1) {
            let (x, z) = (v[0], v[2]);
            if x < llx || (x == llx && z < llz) {
                llx = x;
                llz = z;
                lli = i;
            }
            if x > urx || (x == urx && z > urz) {
                urx = x;
                urz = z;
                uri = i;
            }
        }
        poly.clear();
        poly.push(lli);
        poly.push(uri);
    }

    let max_error_sq = sqr(max_error);

    // Add points until all raw points are within error tolerance.
    let mut i = 0;
    while i < poly.len() {
        let ii = (i + 1) % poly.len();

        let ai = poly[i];
        let (ax, az) = (verts[ai][0], verts[ai][2]);
        let bi = poly[ii];
        let (bx, bz) = (verts[bi][0], verts[bi][2]);

        // Traverse the segment in lexicographic order so that the max deviation
        // is the same when the opposite wall traverses it.
        let (mut ci, cinc, endi) = if bx > ax || (bx == ax && bz > az) {
            ((ai + 1) % n, 1, bi)
        } else {
            ((bi + n - 1) % n, n - 1, ai)
        };

        let mut maxd = 0.0f32;
        let mut maxi = None;
        while ci != endi {
            let d = distance_pt_seg(verts[ci][0], verts[ci][2], ax, az, bx, bz);
            if d > maxd {
                maxd = d;
                maxi = Some(ci);
            }
            ci = (ci + cinc) % n;
        }

        match maxi {
            Some(m) if maxd > max_error_sq => poly.insert(i + 1, m),
            _ => i += 1,
        }
    }

    // Start the simplified outline at the lowest raw index.
    let start = poly
        .iter()
        .enumerate()
        .min_by_key(|(_, &p)| p)
        .map(|(i, _)| i)
        .unwrap_or(0);

    (0..poly.len())
        .map(|i| verts[poly[(start + i) % poly.len()]])
        .collect()
}

/// Height of a contour corner and whether it is a removable seam vertex
fn get_corner_height(layer: &TileLayer, x: i32, y: i32, z: i32, walkable_climb: i32) -> (i32, bool) {
    let w = layer.width();
    let h = layer.height();

    let mut n = 0;
    let mut portal = 0x0fu8;
    let mut height = 0i32;
    let mut preg = 0xffu8;
    let mut all_same_reg = true;

    for dz in -1..=0 {
        for dx in -1..=0 {
            let px = x + dx;
            let pz = z + dz;
            if px < 0 || pz < 0 || px >= w || pz >= h {
                continue;
            }
            let idx = (px + pz * w) as usize;
            let lh = layer.heights[idx] as i32;
            if (lh - y).abs() <= walkable_climb && layer.areas[idx] != NULL_AREA {
                height = height.max(lh);
                portal &= layer.cons[idx] >> 4;
                if preg != 0xff && preg != layer.regs[idx] {
                    all_same_reg = false;
                }
                preg = layer.regs[idx];
                n += 1;
            }
        }
    }

    let portal_count = portal.count_ones();
    let should_remove = n > 1 && portal_count == 1 && all_same_reg;

    (height, should_remove)
}

/// Traces and simplifies the contour of every region of `layer`.
///
/// `layer` must have been partitioned by
/// [`build_tile_cache_regions`](crate::build_tile_cache_regions).
pub fn build_tile_cache_contours(
    layer: &TileLayer,
    walkable_climb: i32,
    max_error: f32,
) -> Result<TileCacheContourSet> {
    let w = layer.width();
    let h = layer.height();

    let mut lcset = TileCacheContourSet {
        conts: vec![TileCacheContour::default(); layer.reg_count as usize],
    };
    let mut visited = vec![false; layer.reg_count as usize];

    // Twice around the layer.
    let max_temp_verts = ((w + h) * 2 * 2) as usize;
    let mut temp = TempContour::new(max_temp_verts);

    for y in 0..h {
        for x in 0..w {
            let idx = (x + y * w) as usize;
            let ri = layer.regs[idx];
            if ri == 0xff || visited[ri as usize] {
                continue;
            }
            visited[ri as usize] = true;

            let cont = &mut lcset.conts[ri as usize];
            cont.reg = ri;
            cont.area = layer.areas[idx];

            if !walk_contour(layer, x, y, &mut temp) {
                return Err(Error::BufferTooSmall(format!(
                    "contour of region {} exceeds {} vertices",
                    ri, max_temp_verts
                )));
            }

            let simplified = simplify_contour(&temp.verts, max_error);
            let nverts = simplified.len();

            // The neighbour of an edge is stored at its end vertex; shift it so
            // each vertex carries the tag of the edge that starts at it.
            cont.verts = (0..nverts)
                .map(|j| {
                    let v = simplified[j];
                    let nei = simplified[(j + 1) % nverts][3];
                    let (corner_y, should_remove) =
                        get_corner_height(layer, v[0], v[1], v[2], walkable_climb);

                    let mut flags = CONTOUR_NO_PORTAL;
                    if nei != NULL_NEIGHBOUR && nei >= PORTAL_TAG {
                        flags = (nei - PORTAL_TAG) as u8;
                    }
                    if should_remove {
                        flags |= CONTOUR_REMOVE_VERTEX;
                    }

                    ContourVertex {
                        x: v[0],
                        y: corner_y,
                        z: v[2],
                        flags,
                    }
                })
                .collect();
        }
    }

    log::debug!(
        "Traced {} contours ({} usable)",
        lcset.conts.len(),
        lcset.valid_count()
    );

    Ok(lcset)
}
