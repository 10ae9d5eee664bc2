//! Polygon mesh generation for tile layers
//!
//! Contours are triangulated by ear clipping, the triangles of each contour are
//! greedily merged into convex polygons with at most `nvp` vertices, seam
//! vertices flagged by the contour tracer are removed and finally polygon
//! adjacency is computed. Edges on the layer border that lead into a
//! neighbouring tile are tagged as portals.

use tilecache_common::{intersect, left, left_on, overlap_range_exclusive, vequal, Error, Result};

use super::contour::{TileCacheContourSet, CONTOUR_NO_PORTAL, CONTOUR_REMOVE_VERTEX};
use super::{MAX_VERTS_PER_POLY, MESH_NULL_IDX};

/// Vertex bucket count for spatial hashing
const VERTEX_BUCKET_COUNT: usize = 1 << 8;

/// Upper bound on the edges collected around a removed vertex
const MAX_REM_EDGES: usize = 48;

/// Neighbour tag of external edges; the low bits hold the portal direction
pub const EXT_LINK: u16 = 0x8000;

/// Bit set on an ear-clipping index when the vertex can be clipped
const EAR_FLAG: u16 = 0x8000;

/// Polygon mesh of one tile layer in grid coordinates
#[derive(Debug, Clone)]
pub struct TileCachePolyMesh {
    /// Maximum vertices per polygon
    pub nvp: usize,
    /// Vertices `[x, y, z]` per vertex; y is relative to the layer's `hmin`
    pub verts: Vec<u16>,
    /// Per polygon: `nvp` vertex indices followed by `nvp` neighbour slots
    pub polys: Vec<u16>,
    /// Area id per polygon
    pub areas: Vec<u8>,
    /// User flags per polygon
    pub flags: Vec<u16>,
}

impl TileCachePolyMesh {
    fn new(nvp: usize) -> Self {
        Self {
            nvp,
            verts: Vec::new(),
            polys: Vec::new(),
            areas: Vec::new(),
            flags: Vec::new(),
        }
    }

    #[inline]
    pub fn nverts(&self) -> usize {
        self.verts.len() / 3
    }

    #[inline]
    pub fn npolys(&self) -> usize {
        self.areas.len()
    }

    /// Vertex indices and neighbour slots of polygon `i`
    pub fn poly(&self, i: usize) -> &[u16] {
        let stride = self.nvp * 2;
        &self.polys[i * stride..(i + 1) * stride]
    }

    /// Used vertex indices of polygon `i`
    pub fn poly_verts(&self, i: usize) -> &[u16] {
        let p = self.poly(i);
        &p[..count_poly_verts(p, self.nvp)]
    }

    pub fn vert(&self, i: usize) -> [u16; 3] {
        [self.verts[i * 3], self.verts[i * 3 + 1], self.verts[i * 3 + 2]]
    }

    /// Appends a polygon with empty neighbour slots
    fn push_poly(&mut self, verts: &[u16], area: u8) {
        let start = self.polys.len();
        self.polys.resize(start + self.nvp * 2, MESH_NULL_IDX);
        self.polys[start..start + verts.len()].copy_from_slice(verts);
        self.areas.push(area);
        self.flags.push(0);
    }

    /// Removes polygon `i` by moving the last polygon into its place
    fn swap_remove_poly(&mut self, i: usize) {
        let stride = self.nvp * 2;
        let last = self.npolys() - 1;
        if i != last {
            let (head, tail) = self.polys.split_at_mut(last * stride);
            head[i * stride..(i + 1) * stride].copy_from_slice(&tail[..stride]);
        }
        self.polys.truncate(last * stride);
        self.areas.swap_remove(i);
        self.flags.swap_remove(i);
    }
}

#[inline]
fn next(i: usize, n: usize) -> usize {
    if i + 1 < n {
        i + 1
    } else {
        0
    }
}

#[inline]
fn prev(i: usize, n: usize) -> usize {
    if i >= 1 {
        i - 1
    } else {
        n - 1
    }
}

/// Number of used vertex slots of a polygon
pub fn count_poly_verts(p: &[u16], nvp: usize) -> usize {
    p[..nvp].iter().position(|&v| v == MESH_NULL_IDX).unwrap_or(nvp)
}

#[inline]
fn uleft(a: &[u16], b: &[u16], c: &[u16]) -> bool {
    (b[0] as i32 - a[0] as i32) * (c[2] as i32 - a[2] as i32)
        - (c[0] as i32 - a[0] as i32) * (b[2] as i32 - a[2] as i32)
        < 0
}

#[inline]
fn vertex(verts: &[u16], i: u16) -> &[u16] {
    let i = i as usize * 3;
    &verts[i..i + 3]
}

#[inline]
fn tvert(verts: &[i32], index: u16) -> &[i32] {
    let i = (index & !EAR_FLAG) as usize * 4;
    &verts[i..i + 4]
}

/// True if the diagonal (i, j) lies inside the polygon near vertex i
fn in_cone(i: usize, j: usize, verts: &[i32], indices: &[u16]) -> bool {
    let n = indices.len();
    let pi = tvert(verts, indices[i]);
    let pj = tvert(verts, indices[j]);
    let pi1 = tvert(verts, indices[next(i, n)]);
    let pin1 = tvert(verts, indices[prev(i, n)]);

    // If P[i] is a convex vertex [ i+1 left or on (i-1,i) ].
    if left_on(pin1, pi, pi1) {
        return left(pi, pj, pin1) && left(pj, pi, pi1);
    }
    // Assume (i-1,i,i+1) not collinear.
    // else P[i] is reflex.
    !(left_on(pi, pj, pi1) && left_on(pj, pi, pin1))
}

/// True if (i, j) does not cross any polygon edge that is not incident to it
fn diagonalie(i: usize, j: usize, verts: &[i32], indices: &[u16]) -> bool {
    let n = indices.len();
    let d0 = tvert(verts, indices[i]);
    let d1 = tvert(verts, indices[j]);

    for k in 0..n {
        let k1 = next(k, n);
        // Skip edges incident to i or j.
        if k == i || k1 == i || k == j || k1 == j {
            continue;
        }
        let p0 = tvert(verts, indices[k]);
        let p1 = tvert(verts, indices[k1]);
        if vequal(d0, p0) || vequal(d1, p0) || vequal(d0, p1) || vequal(d1, p1) {
            continue;
        }
        if intersect(d0, d1, p0, p1) {
            return false;
        }
    }
    true
}

#[inline]
fn diagonal(i: usize, j: usize, verts: &[i32], indices: &[u16]) -> bool {
    in_cone(i, j, verts, indices) && diagonalie(i, j, verts, indices)
}

/// Ear-clipping triangulation of the polygon `indices` over `verts` (`[x, y, z, _]` per vertex).
///
/// Returns the number of triangles written to `tris`, negated when the polygon
/// could not be fully triangulated.
fn triangulate(verts: &[i32], indices: &mut [u16], tris: &mut Vec<u16>) -> i32 {
    let mut n = indices.len();
    let mut ntris = 0;
    tris.clear();
    if n < 3 {
        return 0;
    }

    // The top bit of the index marks vertices whose ear can be clipped.
    for i in 0..n {
        let i1 = next(i, n);
        let i2 = next(i1, n);
        if diagonal(i, i2, verts, &indices[..n]) {
            indices[i1] |= EAR_FLAG;
        }
    }

    while n > 3 {
        let mut min_len = -1;
        let mut mini = None;
        for i in 0..n {
            let i1 = next(i, n);
            if indices[i1] & EAR_FLAG != 0 {
                let p0 = (indices[i] & !EAR_FLAG) as usize * 4;
                let p2 = (indices[next(i1, n)] & !EAR_FLAG) as usize * 4;

                let dx = verts[p2] - verts[p0];
                let dz = verts[p2 + 2] - verts[p0 + 2];
                let len = dx * dx + dz * dz;
                if min_len < 0 || len < min_len {
                    min_len = len;
                    mini = Some(i);
                }
            }
        }

        let Some(i) = mini else {
            // The contour is self-intersecting or degenerate.
            return -ntris;
        };

        let mut i1 = next(i, n);
        let i2 = next(i1, n);

        tris.push(indices[i] & !EAR_FLAG);
        tris.push(indices[i1] & !EAR_FLAG);
        tris.push(indices[i2] & !EAR_FLAG);
        ntris += 1;

        // Removes P[i1] by copying P[i+1]...P[n-1] left one index.
        n -= 1;
        indices.copy_within(i1 + 1..n + 1, i1);

        if i1 >= n {
            i1 = 0;
        }
        let i = prev(i1, n);

        // Update diagonal flags.
        if diagonal(prev(i, n), i1, verts, &indices[..n]) {
            indices[i] |= EAR_FLAG;
        } else {
            indices[i] &= !EAR_FLAG;
        }

        if diagonal(i, next(i1, n), verts, &indices[..n]) {
            indices[i1] |= EAR_FLAG;
        } else {
            indices[i1] &= !EAR_FLAG;
        }
    }

    // Append the remaining triangle.
    tris.extend(indices[..3].iter().map(|&v| v & !EAR_FLAG));
    ntris + 1
}

#[inline]
fn compute_vertex_hash(x: i32, z: i32) -> usize {
    const H1: u32 = 0x8da6b343; // Large multiplicative constants;
    const H3: u32 = 0xcb1ab31f; // here arbitrarily chosen primes
    let n = H1.wrapping_mul(x as u32).wrapping_add(H3.wrapping_mul(z as u32));
    n as usize & (VERTEX_BUCKET_COUNT - 1)
}

/// Spatial hash used to weld contour vertices shared between regions
struct VertexWelder {
    first: Vec<u16>,
    next: Vec<u16>,
}

impl VertexWelder {
    fn new(capacity: usize) -> Self {
        Self {
            first: vec![MESH_NULL_IDX; VERTEX_BUCKET_COUNT],
            next: Vec::with_capacity(capacity),
        }
    }

    /// Returns the index of an existing vertex within 2 height units of (x, y, z), or adds one
    fn add_vertex(&mut self, x: u16, y: u16, z: u16, verts: &mut Vec<u16>) -> u16 {
        let bucket = compute_vertex_hash(x as i32, z as i32);

        let mut i = self.first[bucket];
        while i != MESH_NULL_IDX {
            let v = vertex(verts, i);
            if v[0] == x && v[2] == z && (v[1] as i32 - y as i32).abs() <= 2 {
                return i;
            }
            i = self.next[i as usize];
        }

        // Could not find, create new.
        let i = (verts.len() / 3) as u16;
        verts.extend_from_slice(&[x, y, z]);
        self.next.push(self.first[bucket]);
        self.first[bucket] = i;
        i
    }
}

/// Score for merging polygons `pa` and `pb`: squared length of the shared edge,
/// or `None` when they share no edge or the result would be concave or too large.
fn get_poly_merge_value(pa: &[u16], pb: &[u16], verts: &[u16], nvp: usize) -> Option<(i32, usize, usize)> {
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);

    // If the merged polygon would be too big, do not merge.
    if na + nb - 2 > nvp {
        return None;
    }

    // Check if the polygons share an edge.
    let mut shared = None;
    for i in 0..na {
        let (mut va0, mut va1) = (pa[i], pa[(i + 1) % na]);
        if va0 > va1 {
            std::mem::swap(&mut va0, &mut va1);
        }
        for j in 0..nb {
            let (mut vb0, mut vb1) = (pb[j], pb[(j + 1) % nb]);
            if vb0 > vb1 {
                std::mem::swap(&mut vb0, &mut vb1);
            }
            if va0 == vb0 && va1 == vb1 {
                shared = Some((i, j));
                break;
            }
        }
    }

    // No common edge, cannot merge.
    let (ea, eb) = shared?;

    // Check to see if the merged polygon would be convex.
    let va = pa[(ea + na - 1) % na];
    let vb = pa[ea];
    let vc = pb[(eb + 2) % nb];
    if !uleft(vertex(verts, va), vertex(verts, vb), vertex(verts, vc)) {
        return None;
    }

    let va = pb[(eb + nb - 1) % nb];
    let vb = pb[eb];
    let vc = pa[(ea + 2) % na];
    if !uleft(vertex(verts, va), vertex(verts, vb), vertex(verts, vc)) {
        return None;
    }

    let va = vertex(verts, pa[ea]);
    let vb = vertex(verts, pa[(ea + 1) % na]);
    let dx = va[0] as i32 - vb[0] as i32;
    let dz = va[2] as i32 - vb[2] as i32;

    Some((dx * dx + dz * dz, ea, eb))
}

/// Joins `pb` into `pa` across their shared edge
fn merge_poly_verts(pa: &mut [u16], pb: &[u16], ea: usize, eb: usize, nvp: usize) {
    let na = count_poly_verts(pa, nvp);
    let nb = count_poly_verts(pb, nvp);

    let mut tmp = [MESH_NULL_IDX; MAX_VERTS_PER_POLY];
    let mut n = 0;
    // Merge polygons.
    for i in 0..na - 1 {
        tmp[n] = pa[(ea + 1 + i) % na];
        n += 1;
    }
    for i in 0..nb - 1 {
        tmp[n] = pb[(eb + 1 + i) % nb];
        n += 1;
    }

    pa[..nvp].copy_from_slice(&tmp[..nvp]);
}

/// Greedily merges polygons (stride `nvp`) while a valid merge exists.
/// Per-polygon `tags` follow the polygons they belong to.
fn merge_polygons(polys: &mut Vec<u16>, tags: &mut Vec<u8>, verts: &[u16], nvp: usize) {
    if nvp <= 3 {
        return;
    }

    loop {
        let npolys = polys.len() / nvp;

        // Find best polygons to merge.
        let mut best: Option<(i32, usize, usize, usize, usize)> = None;
        for j in 0..npolys.saturating_sub(1) {
            let pj = &polys[j * nvp..(j + 1) * nvp];
            for k in j + 1..npolys {
                let pk = &polys[k * nvp..(k + 1) * nvp];
                if let Some((v, ea, eb)) = get_poly_merge_value(pj, pk, verts, nvp) {
                    if v > best.map_or(0, |b| b.0) {
                        best = Some((v, j, k, ea, eb));
                    }
                }
            }
        }

        let Some((_, pa, pb, ea, eb)) = best else {
            // Could not merge any polygons, stop.
            break;
        };

        let (head, tail) = polys.split_at_mut(pb * nvp);
        merge_poly_verts(&mut head[pa * nvp..(pa + 1) * nvp], &tail[..nvp], ea, eb, nvp);

        let last = npolys - 1;
        if pb != last {
            polys.copy_within(last * nvp..(last + 1) * nvp, pb * nvp);
        }
        polys.truncate(last * nvp);
        tags.swap_remove(pb);
    }
}

/// Checks whether removing vertex `rem` leaves a hole that can be re-triangulated
pub fn can_remove_vertex(mesh: &TileCachePolyMesh, rem: u16) -> bool {
    let nvp = mesh.nvp;

    // Count number of polygons to remove.
    let mut num_touched_verts = 0;
    let mut num_remaining_edges = 0;
    for i in 0..mesh.npolys() {
        let p = mesh.poly_verts(i);
        let num_removed = p.iter().filter(|&&v| v == rem).count();
        if num_removed > 0 {
            num_touched_verts += num_removed;
            num_remaining_edges += p.len() as i32 - (num_removed as i32 + 1);
        }
    }

    // There would be too few edges remaining to create a polygon.
    if num_remaining_edges <= 2 {
        return false;
    }

    let max_edges = num_touched_verts * 2;
    if max_edges > MAX_REM_EDGES {
        return false;
    }

    // Find edges which share the removed vertex as (other vertex, share count).
    let mut edges: Vec<(u16, u32)> = Vec::with_capacity(max_edges);
    for i in 0..mesh.npolys() {
        let p = &mesh.poly(i)[..nvp];
        let nv = count_poly_verts(p, nvp);

        // Collect edges which touch the removed vertex.
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] == rem || p[k] == rem {
                // Arrange edge so that a = rem.
                let b = if p[k] == rem { p[j] } else { p[k] };
                match edges.iter_mut().find(|e| e.0 == b) {
                    Some(e) => e.1 += 1,
                    None => edges.push((b, 1)),
                }
            }
            k = j;
        }
    }

    // There should be no more than 2 open edges.
    let num_open_edges = edges.iter().filter(|e| e.1 < 2).count();
    num_open_edges <= 2
}

/// Removes vertex `rem` and re-triangulates the hole left behind
pub fn remove_vertex(mesh: &mut TileCachePolyMesh, rem: u16, max_tris: usize) -> Result<()> {
    let nvp = mesh.nvp;

    // Boundary edges of the hole as (from, to, area).
    let mut edges: Vec<(u16, u16, u8)> = Vec::with_capacity(MAX_REM_EDGES);

    let mut i = 0;
    while i < mesh.npolys() {
        let p = mesh.poly_verts(i);
        if !p.contains(&rem) {
            i += 1;
            continue;
        }

        // Collect edges which do not touch the removed vertex.
        let nv = p.len();
        let mut k = nv - 1;
        for j in 0..nv {
            if p[j] != rem && p[k] != rem {
                if edges.len() >= MAX_REM_EDGES {
                    return Err(Error::BufferTooSmall(format!(
                        "hole around vertex {} exceeds {} edges",
                        rem, MAX_REM_EDGES
                    )));
                }
                edges.push((p[k], p[j], mesh.areas[i]));
            }
            k = j;
        }

        // Remove the polygon.
        mesh.swap_remove_poly(i);
    }

    // Remove vertex.
    let r = rem as usize * 3;
    mesh.verts.drain(r..r + 3);

    // Adjust indices to match the removed vertex layout.
    for i in 0..mesh.npolys() {
        let start = i * nvp * 2;
        for v in &mut mesh.polys[start..start + nvp] {
            if *v != MESH_NULL_IDX && *v > rem {
                *v -= 1;
            }
        }
    }
    for e in &mut edges {
        if e.0 > rem {
            e.0 -= 1;
        }
        if e.1 > rem {
            e.1 -= 1;
        }
    }

    if edges.is_empty() {
        return Ok(());
    }

    // Start with one vertex, keep appending connected segments to the start and
    // end of the hole.
    let mut hole: std::collections::VecDeque<u16> = std::collections::VecDeque::with_capacity(MAX_REM_EDGES);
    let mut harea: std::collections::VecDeque<u8> = std::collections::VecDeque::with_capacity(MAX_REM_EDGES);
    hole.push_back(edges[0].0);
    harea.push_back(edges[0].2);

    while !edges.is_empty() {
        let mut matched = false;

        let mut i = 0;
        while i < edges.len() {
            let (ea, eb, a) = edges[i];
            let front = hole.front().copied();
            let back = hole.back().copied();

            let add = if front == Some(eb) {
                // The segment matches the beginning of the hole boundary.
                if hole.len() >= MAX_REM_EDGES {
                    return Err(Error::BufferTooSmall(format!(
                        "hole around vertex {} exceeds {} vertices",
                        rem, MAX_REM_EDGES
                    )));
                }
                hole.push_front(ea);
                harea.push_front(a);
                true
            } else if back == Some(ea) {
                // The segment matches the end of the hole boundary.
                hole.push_back(eb);
                harea.push_back(a);
                true
            } else {
                false
            };

            if add {
                // The edge segment was added, remove it.
                edges.swap_remove(i);
                matched = true;
            } else {
                i += 1;
            }
        }

        if !matched {
            break;
        }
    }

    let hole: Vec<u16> = hole.into();
    let harea: Vec<u8> = harea.into();

    // Generate temp vertex array for triangulation.
    let mut tverts = Vec::with_capacity(hole.len() * 4);
    for &pi in &hole {
        let v = vertex(&mesh.verts, pi);
        tverts.extend_from_slice(&[v[0] as i32, v[1] as i32, v[2] as i32, 0]);
    }
    let mut tpoly: Vec<u16> = (0..hole.len() as u16).collect();

    // Triangulate the hole.
    let mut tris = Vec::with_capacity(hole.len() * 3);
    let mut ntris = triangulate(&tverts, &mut tpoly, &mut tris);
    if ntris < 0 {
        log::warn!("remove_vertex: hole triangulation failed around vertex {}", rem);
        ntris = -ntris;
    }
    if ntris as usize > MAX_REM_EDGES {
        return Err(Error::BufferTooSmall(format!(
            "hole around vertex {} produced {} triangles",
            rem, ntris
        )));
    }

    // Build initial polygons.
    let mut polys: Vec<u16> = Vec::with_capacity(ntris as usize * nvp);
    let mut pareas: Vec<u8> = Vec::with_capacity(ntris as usize);
    for t in tris.chunks_exact(3) {
        if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
            let start = polys.len();
            polys.resize(start + nvp, MESH_NULL_IDX);
            polys[start] = hole[t[0] as usize];
            polys[start + 1] = hole[t[1] as usize];
            polys[start + 2] = hole[t[2] as usize];
            pareas.push(harea[t[0] as usize]);
        }
    }
    if pareas.is_empty() {
        return Ok(());
    }

    merge_polygons(&mut polys, &mut pareas, &mesh.verts, nvp);

    // Store polygons.
    for (p, &area) in polys.chunks_exact(nvp).zip(pareas.iter()) {
        if mesh.npolys() >= max_tris {
            return Err(Error::BufferTooSmall(format!(
                "too many polygons after removing vertex {} (max {})",
                rem, max_tris
            )));
        }
        let nv = count_poly_verts(p, nvp);
        mesh.push_poly(&p[..nv], area);
    }

    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Edge {
    vert: [u16; 2],
    poly_edge: [u16; 2],
    poly: [u16; 2],
}

/// Computes polygon neighbours and tags border edges that lead into neighbouring tiles
fn build_mesh_adjacency(mesh: &mut TileCachePolyMesh, lcset: &TileCacheContourSet) {
    let nvp = mesh.nvp;
    let npolys = mesh.npolys();
    let nverts = mesh.nverts();

    let mut first_edge = vec![MESH_NULL_IDX; nverts];
    let mut next_edge: Vec<u16> = Vec::with_capacity(npolys * nvp);
    let mut edges: Vec<Edge> = Vec::with_capacity(npolys * nvp);

    for i in 0..npolys {
        let t = mesh.poly_verts(i);
        let nv = t.len();
        for j in 0..nv {
            let v0 = t[j];
            let v1 = t[next(j, nv)];
            if v0 < v1 {
                next_edge.push(first_edge[v0 as usize]);
                first_edge[v0 as usize] = edges.len() as u16;
                edges.push(Edge {
                    vert: [v0, v1],
                    poly: [i as u16, i as u16],
                    poly_edge: [j as u16, 0xff],
                });
            }
        }
    }

    for i in 0..npolys {
        let t = mesh.poly_verts(i);
        let nv = t.len();
        for j in 0..nv {
            let v0 = t[j];
            let v1 = t[next(j, nv)];
            if v0 > v1 {
                let mut found = false;
                let mut e = first_edge[v1 as usize];
                while e != MESH_NULL_IDX {
                    let edge = &mut edges[e as usize];
                    if edge.vert[1] == v0 && edge.poly[0] == edge.poly[1] {
                        edge.poly[1] = i as u16;
                        edge.poly_edge[1] = j as u16;
                        found = true;
                        break;
                    }
                    e = next_edge[e as usize];
                }
                if !found {
                    // Matching edge not found, it is an open edge, add it.
                    next_edge.push(first_edge[v1 as usize]);
                    first_edge[v1 as usize] = edges.len() as u16;
                    edges.push(Edge {
                        vert: [v1, v0],
                        poly: [i as u16, i as u16],
                        poly_edge: [j as u16, 0xff],
                    });
                }
            }
        }
    }

    // Mark portal edges.
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        let n = cont.verts.len();
        let mut k = n - 1;
        for j in 0..n {
            let va = cont.verts[k];
            let vb = cont.verts[j];
            k = j;

            let dir = va.flags & 0x0f;
            if dir == CONTOUR_NO_PORTAL {
                continue;
            }

            // Portals on the -X/+X borders are vertical edges, the others horizontal.
            let vertical = dir == 0 || dir == 2;
            let (fixed, mut lo, mut hi) = if vertical {
                (va.x, va.z, vb.z)
            } else {
                (va.z, va.x, vb.x)
            };
            if lo > hi {
                std::mem::swap(&mut lo, &mut hi);
            }

            for e in edges.iter_mut() {
                // Skip connected edges.
                if e.poly[0] != e.poly[1] {
                    continue;
                }
                let eva = vertex(&mesh.verts, e.vert[0]);
                let evb = vertex(&mesh.verts, e.vert[1]);
                let (axis, span) = if vertical { (0, 2) } else { (2, 0) };
                if eva[axis] as i32 == fixed && evb[axis] as i32 == fixed {
                    let emin = eva[span].min(evb[span]) as i32;
                    let emax = eva[span].max(evb[span]) as i32;
                    if overlap_range_exclusive(lo, hi, emin, emax) {
                        // Reuse the other polyedge to store dir.
                        e.poly_edge[1] = dir as u16;
                    }
                }
            }
        }
    }

    // Store adjacency.
    let stride = nvp * 2;
    for e in &edges {
        if e.poly[0] != e.poly[1] {
            let p0 = e.poly[0] as usize * stride;
            let p1 = e.poly[1] as usize * stride;
            mesh.polys[p0 + nvp + e.poly_edge[0] as usize] = e.poly[1];
            mesh.polys[p1 + nvp + e.poly_edge[1] as usize] = e.poly[0];
        } else if e.poly_edge[1] != 0xff {
            let p0 = e.poly[0] as usize * stride;
            mesh.polys[p0 + nvp + e.poly_edge[0] as usize] = EXT_LINK | e.poly_edge[1];
        }
    }
}

/// Builds the polygon mesh of a layer from its contours.
///
/// `nvp` is the maximum number of vertices per polygon, 3 to
/// [`MAX_VERTS_PER_POLY`].
pub fn build_tile_cache_poly_mesh(lcset: &TileCacheContourSet, nvp: usize) -> Result<TileCachePolyMesh> {
    if !(3..=MAX_VERTS_PER_POLY).contains(&nvp) {
        return Err(Error::InvalidParam(format!(
            "vertices per polygon must be within 3..={}, got {}",
            MAX_VERTS_PER_POLY, nvp
        )));
    }

    let mut max_vertices = 0;
    let mut max_tris = 0;
    let mut max_verts_per_cont = 0;
    for cont in lcset.conts.iter().filter(|c| c.verts.len() >= 3) {
        max_vertices += cont.verts.len();
        max_tris += cont.verts.len() - 2;
        max_verts_per_cont = max_verts_per_cont.max(cont.verts.len());
    }

    // Vertex indices are stored as u16 with 0xffff reserved.
    if max_vertices >= 0xfffe {
        return Err(Error::BufferTooSmall(format!(
            "too many vertices {} (max {})",
            max_vertices, 0xfffe
        )));
    }

    let mut mesh = TileCachePolyMesh::new(nvp);
    mesh.verts.reserve(max_vertices * 3);
    let mut vflags: Vec<bool> = Vec::with_capacity(max_vertices);
    let mut welder = VertexWelder::new(max_vertices);

    let mut indices: Vec<u16> = Vec::with_capacity(max_verts_per_cont);
    let mut tris: Vec<u16> = Vec::with_capacity(max_verts_per_cont * 3);
    let mut tverts: Vec<i32> = Vec::with_capacity(max_verts_per_cont * 4);
    let mut polys: Vec<u16> = Vec::with_capacity(max_verts_per_cont * nvp);
    let mut pareas: Vec<u8> = Vec::with_capacity(max_verts_per_cont);

    for (ci, cont) in lcset.conts.iter().enumerate() {
        // Skip null contours.
        if cont.verts.len() < 3 {
            continue;
        }

        // Triangulate contour.
        tverts.clear();
        for v in &cont.verts {
            tverts.extend_from_slice(&[v.x, v.y, v.z, 0]);
        }
        indices.clear();
        indices.extend(0..cont.verts.len() as u16);

        let mut ntris = triangulate(&tverts, &mut indices, &mut tris);
        if ntris <= 0 {
            log::warn!("build_tile_cache_poly_mesh: bad triangulation of contour {}", ci);
            ntris = -ntris;
        }

        // Add and merge vertices.
        indices.clear();
        for v in &cont.verts {
            let idx = welder.add_vertex(v.x as u16, v.y as u16, v.z as u16, &mut mesh.verts);
            if idx as usize >= vflags.len() {
                vflags.resize(idx as usize + 1, false);
            }
            if v.flags & CONTOUR_REMOVE_VERTEX != 0 {
                vflags[idx as usize] = true;
            }
            indices.push(idx);
        }

        // Build initial polygons.
        polys.clear();
        pareas.clear();
        for t in tris[..ntris as usize * 3].chunks_exact(3) {
            if t[0] != t[1] && t[0] != t[2] && t[1] != t[2] {
                let start = polys.len();
                polys.resize(start + nvp, MESH_NULL_IDX);
                polys[start] = indices[t[0] as usize];
                polys[start + 1] = indices[t[1] as usize];
                polys[start + 2] = indices[t[2] as usize];
                pareas.push(cont.area);
            }
        }
        if pareas.is_empty() {
            continue;
        }

        // Merge polygons.
        merge_polygons(&mut polys, &mut pareas, &mesh.verts, nvp);

        // Store polygons.
        for p in polys.chunks_exact(nvp) {
            let nv = count_poly_verts(p, nvp);
            mesh.push_poly(&p[..nv], cont.area);
            if mesh.npolys() > max_tris {
                return Err(Error::BufferTooSmall(format!(
                    "too many polygons {} (max {})",
                    mesh.npolys(),
                    max_tris
                )));
            }
        }
    }

    // Remove edge vertices.
    let mut i = 0;
    while i < mesh.nverts() {
        if vflags[i] && can_remove_vertex(&mesh, i as u16) {
            remove_vertex(&mut mesh, i as u16, max_tris)?;
            vflags.remove(i);
            continue;
        }
        i += 1;
    }

    build_mesh_adjacency(&mut mesh, lcset);

    log::debug!(
        "Poly mesh: {} vertices, {} polygons (nvp {})",
        mesh.nverts(),
        mesh.npolys(),
        nvp
    );

    Ok(mesh)
}
