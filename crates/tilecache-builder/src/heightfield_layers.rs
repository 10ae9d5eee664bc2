//! Heightfield layers for multi-story tile cache support
//!
//! Partitions the walkable spans of a compact heightfield into 2D layers so that
//! overlapping platforms, such as a bridge above the ground, end up on separate
//! grids. Every layer stores exactly one height, area and connection mask per
//! cell, which is the representation the tile cache compresses and rebuilds.

use std::collections::VecDeque;

use glam::Vec3;
use tilecache_common::{get_dir_offset_x, get_dir_offset_y, overlap_range, Error, Result};

use super::compact_heightfield::CompactHeightfield;
use super::NULL_AREA;

/// Maximum number of overlapping regions tracked per region
const MAX_LAYERS: usize = 63;
/// Maximum number of neighbour regions tracked per region
const MAX_NEIS: usize = 16;
/// Breadth-first search queue bound when flooding layer ids
const MAX_STACK: usize = 64;
/// Unassigned region / layer id
const NULL_ID: u8 = 0xff;

/// Layer region collected during the sweep
#[derive(Debug, Clone)]
struct LayerRegion {
    /// Regions that share a column with this one
    layers: Vec<u8>,
    /// Regions connected to this one
    neis: Vec<u8>,
    ymin: i32,
    ymax: i32,
    layer_id: u8,
    /// True for the region a layer was flooded from
    base: bool,
}

impl LayerRegion {
    fn new() -> Self {
        Self {
            layers: Vec::with_capacity(MAX_LAYERS),
            neis: Vec::with_capacity(MAX_NEIS),
            ymin: 0xffff,
            ymax: 0,
            layer_id: NULL_ID,
            base: false,
        }
    }
}

/// Row sweep span for monotone partitioning
#[derive(Debug, Clone, Copy, Default)]
struct LayerSweepSpan {
    /// Number of samples connected to `nei`
    ns: u16,
    /// Region id
    id: u8,
    /// Neighbour region id on the previous row
    nei: u8,
}

/// A single walkable layer of a tile
#[derive(Debug, Clone)]
pub struct HeightfieldLayer {
    /// The minimum bounds of the layer's AABB
    pub bmin: Vec3,
    /// The maximum bounds of the layer's AABB
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
    /// Width of the layer grid
    pub width: i32,
    /// Depth of the layer grid
    pub height: i32,
    /// Usable sub-rectangle of the grid
    pub minx: i32,
    pub maxx: i32,
    pub miny: i32,
    pub maxy: i32,
    /// Height range of the layer in voxels
    pub hmin: i32,
    pub hmax: i32,
    /// Height of each cell relative to `hmin`, 0xff for empty cells
    pub heights: Vec<u8>,
    /// Area id of each cell
    pub areas: Vec<u8>,
    /// Connection mask: low nibble in-layer neighbours, high nibble portals
    pub cons: Vec<u8>,
}

impl HeightfieldLayer {
    fn new(width: i32, height: i32, cs: f32, ch: f32) -> Self {
        let grid_size = (width * height) as usize;
        Self {
            bmin: Vec3::ZERO,
            bmax: Vec3::ZERO,
            cs,
            ch,
            width,
            height,
            minx: width,
            maxx: 0,
            miny: height,
            maxy: 0,
            hmin: 0,
            hmax: 0,
            heights: vec![0xff; grid_size],
            areas: vec![NULL_AREA; grid_size],
            cons: vec![0; grid_size],
        }
    }

    /// Number of cells that carry a walkable area
    pub fn walkable_cell_count(&self) -> usize {
        self.areas.iter().filter(|&&a| a != NULL_AREA).count()
    }
}

/// All layers produced for one tile
#[derive(Debug, Clone, Default)]
pub struct HeightfieldLayerSet {
    pub layers: Vec<HeightfieldLayer>,
}

impl HeightfieldLayerSet {
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}

fn add_unique(a: &mut Vec<u8>, max_size: usize, v: u8) -> bool {
    if a.contains(&v) {
        return true;
    }
    if a.len() >= max_size {
        return false;
    }
    a.push(v);
    true
}

/// Builds the heightfield layers of a tile.
///
/// `border_size` cells are stripped from each side of the output grids; spans in
/// the border only contribute portal information. Layers whose height ranges lie
/// within `walkable_height * 4` voxels of each other and do not overlap are merged.
pub fn build_heightfield_layers(
    chf: &CompactHeightfield,
    border_size: i32,
    walkable_height: i32,
) -> Result<HeightfieldLayerSet> {
    let w = chf.width;
    let h = chf.height;

    let mut src_reg = vec![NULL_ID; chf.spans.len()];
    let mut sweeps = vec![LayerSweepSpan::default(); w.max(1) as usize];
    let mut prev_count = [0u16; 256];
    let mut reg_count = 0usize;

    // Partition walkable area into monotone regions.
    for y in border_size..h - border_size {
        prev_count[..reg_count].fill(0);
        let mut sweep_count = 0usize;

        for x in border_size..w - border_size {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.spans() {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut sid = NULL_ID;

                // -x
                if let Some(ai) = chf.neighbour_span(x, y, i, 0) {
                    if chf.areas[ai] != NULL_AREA && src_reg[ai] != NULL_ID {
                        sid = src_reg[ai];
                    }
                }

                if sid == NULL_ID {
                    if sweep_count >= NULL_ID as usize {
                        return Err(Error::RegionOverflow);
                    }
                    if sweep_count == sweeps.len() {
                        sweeps.push(LayerSweepSpan::default());
                    }
                    sid = sweep_count as u8;
                    sweep_count += 1;
                    sweeps[sid as usize].nei = NULL_ID;
                    sweeps[sid as usize].ns = 0;
                }

                // -y
                if let Some(ai) = chf.neighbour_span(x, y, i, 3) {
                    let nr = src_reg[ai];
                    if nr != NULL_ID {
                        let sweep = &mut sweeps[sid as usize];
                        // Set neighbour when first valid neighbour is encountered.
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_count[nr as usize] += 1;
                        } else {
                            // More than one neighbour, invalidate.
                            sweep.nei = NULL_ID;
                        }
                    }
                }

                src_reg[i] = sid;
            }
        }

        // Create unique ids. A sweep continues the previous row's region only
        // when it is the sole continuous connection to it.
        for sweep in sweeps.iter_mut().take(sweep_count) {
            if sweep.nei != NULL_ID && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_count == NULL_ID as usize {
                    log::error!("build_heightfield_layers: Region ID overflow");
                    return Err(Error::RegionOverflow);
                }
                sweep.id = reg_count as u8;
                reg_count += 1;
            }
        }

        // Remap local sweep ids to region ids.
        for x in border_size..w - border_size {
            let cell = chf.cells[(x + y * w) as usize];
            for i in cell.spans() {
                if src_reg[i] != NULL_ID {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    let mut regs = vec![LayerRegion::new(); reg_count];

    // Find region neighbours and overlapping regions.
    for y in 0..h {
        for x in 0..w {
            let cell = chf.cells[(x + y * w) as usize];
            let mut lregs: Vec<u8> = Vec::with_capacity(MAX_LAYERS);

            for i in cell.spans() {
                let ri = src_reg[i];
                if ri == NULL_ID {
                    continue;
                }
                let s = chf.spans[i];
                let reg = &mut regs[ri as usize];
                reg.ymin = reg.ymin.min(s.y as i32);
                reg.ymax = reg.ymax.max(s.y as i32);

                if lregs.len() < MAX_LAYERS {
                    lregs.push(ri);
                }

                for dir in 0..4 {
                    if let Some(ai) = chf.neighbour_span(x, y, i, dir) {
                        let rai = src_reg[ai];
                        if rai != NULL_ID && rai != ri {
                            // A full neighbour list only costs a few extra layers.
                            add_unique(&mut regs[ri as usize].neis, MAX_NEIS, rai);
                        }
                    }
                }
            }

            for i in 0..lregs.len().saturating_sub(1) {
                for j in i + 1..lregs.len() {
                    let (ri, rj) = (lregs[i], lregs[j]);
                    if ri == rj {
                        continue;
                    }
                    if !add_unique(&mut regs[ri as usize].layers, MAX_LAYERS, rj)
                        || !add_unique(&mut regs[rj as usize].layers, MAX_LAYERS, ri)
                    {
                        log::error!("build_heightfield_layers: layer overflow");
                        return Err(Error::LayerOverflow);
                    }
                }
            }
        }
    }

    let layer_count = assign_layer_ids(&mut regs)?;
    merge_close_layers(&mut regs, walkable_height * 4)?;
    let layer_count = compact_layer_ids(&mut regs, layer_count);

    let mut set = HeightfieldLayerSet::default();
    if layer_count == 0 {
        return Ok(set);
    }

    let lw = w - border_size * 2;
    let lh = h - border_size * 2;

    // Layer bounds exclude the border.
    let mut bmin = chf.bmin;
    let mut bmax = chf.bmax;
    bmin.x += border_size as f32 * chf.cs;
    bmin.z += border_size as f32 * chf.cs;
    bmax.x -= border_size as f32 * chf.cs;
    bmax.z -= border_size as f32 * chf.cs;

    for cur_id in 0..layer_count as u8 {
        let mut layer = HeightfieldLayer::new(lw, lh, chf.cs, chf.ch);

        if let Some(base) = regs.iter().rev().find(|r| r.base && r.layer_id == cur_id) {
            layer.hmin = base.ymin;
            layer.hmax = base.ymax;
        }
        let hmin = layer.hmin;

        layer.bmin = Vec3::new(bmin.x, bmin.y + hmin as f32 * chf.ch, bmin.z);
        layer.bmax = Vec3::new(bmax.x, bmin.y + layer.hmax as f32 * chf.ch, bmax.z);

        for y in 0..lh {
            for x in 0..lw {
                let cx = border_size + x;
                let cy = border_size + y;
                let cell = chf.cells[(cx + cy * w) as usize];

                for j in cell.spans() {
                    if src_reg[j] == NULL_ID {
                        continue;
                    }
                    let lid = regs[src_reg[j] as usize].layer_id;
                    if lid != cur_id {
                        continue;
                    }

                    layer.minx = layer.minx.min(x);
                    layer.maxx = layer.maxx.max(x);
                    layer.miny = layer.miny.min(y);
                    layer.maxy = layer.maxy.max(y);

                    let s = chf.spans[j];
                    let idx = (x + y * lw) as usize;
                    layer.heights[idx] = (s.y as i32 - hmin) as u8;
                    layer.areas[idx] = chf.areas[j];

                    let mut portal = 0u8;
                    let mut con = 0u8;
                    for dir in 0..4 {
                        let Some(ai) = chf.neighbour_span(cx, cy, j, dir) else {
                            continue;
                        };
                        if chf.areas[ai] == NULL_AREA {
                            continue;
                        }
                        let alid = match src_reg[ai] {
                            NULL_ID => NULL_ID,
                            r => regs[r as usize].layer_id,
                        };

                        if lid != alid {
                            portal |= 1 << dir;
                            // Match heights on both sides of the portal.
                            let ay = chf.spans[ai].y as i32;
                            if ay > hmin {
                                let ah = (ay - hmin).min(0xff) as u8;
                                layer.heights[idx] = layer.heights[idx].max(ah);
                            }
                        } else {
                            let nx = cx + get_dir_offset_x(dir as i32) - border_size;
                            let ny = cy + get_dir_offset_y(dir as i32) - border_size;
                            if nx >= 0 && ny >= 0 && nx < lw && ny < lh {
                                con |= 1 << dir;
                            }
                        }
                    }

                    layer.cons[idx] = (portal << 4) | con;
                }
            }
        }

        if layer.minx > layer.maxx {
            layer.minx = 0;
            layer.maxx = 0;
        }
        if layer.miny > layer.maxy {
            layer.miny = 0;
            layer.maxy = 0;
        }

        set.layers.push(layer);
    }

    log::debug!(
        "Built {} heightfield layers from {} regions",
        set.layers.len(),
        reg_count
    );

    Ok(set)
}

/// Floods layer ids over connected regions that do not overlap
fn assign_layer_ids(regs: &mut [LayerRegion]) -> Result<usize> {
    let mut layer_id = 0usize;
    let mut stack: VecDeque<usize> = VecDeque::with_capacity(MAX_STACK);

    for i in 0..regs.len() {
        if regs[i].layer_id != NULL_ID {
            continue;
        }
        if layer_id >= NULL_ID as usize {
            return Err(Error::LayerOverflow);
        }

        regs[i].layer_id = layer_id as u8;
        regs[i].base = true;

        stack.clear();
        stack.push_back(i);

        while let Some(reg_idx) = stack.pop_front() {
            let neis = regs[reg_idx].neis.clone();
            for nei in neis {
                let n = nei as usize;
                if regs[n].layer_id != NULL_ID {
                    continue;
                }
                // Skip if the neighbour is overlapping the root region.
                if regs[i].layers.contains(&nei) {
                    continue;
                }
                // Skip if the height range would become too large.
                let ymin = regs[i].ymin.min(regs[n].ymin);
                let ymax = regs[i].ymax.max(regs[n].ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                if stack.len() < MAX_STACK {
                    stack.push_back(n);
                    regs[n].layer_id = layer_id as u8;

                    let overlaps = regs[n].layers.clone();
                    for l in overlaps {
                        if !add_unique(&mut regs[i].layers, MAX_LAYERS, l) {
                            log::error!("build_heightfield_layers: layer overflow");
                            return Err(Error::LayerOverflow);
                        }
                    }
                    regs[i].ymin = ymin;
                    regs[i].ymax = ymax;
                }
            }
        }

        layer_id += 1;
    }

    Ok(layer_id)
}

/// Merges non-overlapping layers that are close in height
fn merge_close_layers(regs: &mut [LayerRegion], merge_height: i32) -> Result<()> {
    let nregs = regs.len();

    for i in 0..nregs {
        if !regs[i].base {
            continue;
        }
        let new_id = regs[i].layer_id;

        loop {
            let mut old_id = NULL_ID;

            for j in 0..nregs {
                if i == j || !regs[j].base {
                    continue;
                }
                let ri = &regs[i];
                let rj = &regs[j];

                // Skip if the regions are not close to each other.
                if !overlap_range(ri.ymin, ri.ymax + merge_height, rj.ymin, rj.ymax + merge_height) {
                    continue;
                }
                // Skip if the height range would become too large.
                let ymin = ri.ymin.min(rj.ymin);
                let ymax = ri.ymax.max(rj.ymax);
                if ymax - ymin >= 255 {
                    continue;
                }

                // Make sure that there is no overlap when merging 'ri' and 'rj'.
                let overlap = regs
                    .iter()
                    .enumerate()
                    .any(|(k, rk)| rk.layer_id == rj.layer_id && ri.layers.contains(&(k as u8)));
                if overlap {
                    continue;
                }

                old_id = rj.layer_id;
                break;
            }

            if old_id == NULL_ID {
                break;
            }

            for j in 0..nregs {
                if regs[j].layer_id != old_id {
                    continue;
                }
                regs[j].base = false;
                regs[j].layer_id = new_id;

                let overlaps = regs[j].layers.clone();
                for l in overlaps {
                    if !add_unique(&mut regs[i].layers, MAX_LAYERS, l) {
                        log::error!("build_heightfield_layers: layer overflow");
                        return Err(Error::LayerOverflow);
                    }
                }
                regs[i].ymin = regs[i].ymin.min(regs[j].ymin);
                regs[i].ymax = regs[i].ymax.max(regs[j].ymax);
            }
        }
    }

    Ok(())
}

/// Remaps layer ids to a dense range and returns the number of layers
fn compact_layer_ids(regs: &mut [LayerRegion], layer_count: usize) -> usize {
    let mut remap = [0u8; 256];
    let mut used = [false; 256];
    for reg in regs.iter() {
        used[reg.layer_id as usize] = true;
    }

    let mut next_id = 0usize;
    for (id, slot) in remap.iter_mut().enumerate().take(layer_count) {
        if used[id] {
            *slot = next_id as u8;
            next_id += 1;
        }
    }

    for reg in regs.iter_mut() {
        reg.layer_id = remap[reg.layer_id as usize];
    }

    next_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compact_heightfield::tests::flat_desc;
    use crate::compact_heightfield::WalkableSpan;
    use crate::WALKABLE_AREA;

    #[test]
    fn test_flat_square_single_layer() {
        let desc = flat_desc(4, 4);
        let columns = vec![vec![WalkableSpan::new(4, WALKABLE_AREA)]; 16];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        let set = build_heightfield_layers(&chf, 0, 10).unwrap();
        assert_eq!(set.len(), 1);

        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (4, 4));
        assert_eq!((layer.minx, layer.maxx, layer.miny, layer.maxy), (0, 3, 0, 3));
        assert_eq!((layer.hmin, layer.hmax), (4, 4));
        assert!(layer.heights.iter().all(|&h| h == 0));
        assert_eq!(layer.walkable_cell_count(), 16);
        assert_eq!(layer.bmin.y, 2.0);

        // Interior cell is connected in all four directions, no portals.
        assert_eq!(layer.cons[5], 0x0f);
        // Corner (0,0) connects to +Z (dir 1) and +X (dir 2) only.
        assert_eq!(layer.cons[0], 0b0110);
    }

    #[test]
    fn test_bridge_splits_into_two_layers() {
        let desc = flat_desc(5, 5);
        let mut columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; 25];
        for x in 0..5 {
            columns[x + 2 * 5].push(WalkableSpan::new(20, WALKABLE_AREA));
        }
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        let set = build_heightfield_layers(&chf, 0, 10).unwrap();
        assert_eq!(set.len(), 2);

        let ground = set.layers.iter().find(|l| l.hmin == 0).unwrap();
        let bridge = set.layers.iter().find(|l| l.hmin == 20).unwrap();
        assert_eq!(ground.walkable_cell_count(), 25);
        assert_eq!(bridge.walkable_cell_count(), 5);
        assert_eq!((bridge.minx, bridge.maxx, bridge.miny, bridge.maxy), (0, 4, 2, 2));
    }

    #[test]
    fn test_border_becomes_portal() {
        let mut desc = flat_desc(4, 4);
        desc.border_size = 1;
        let columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; 16];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        let set = build_heightfield_layers(&chf, 1, 10).unwrap();
        assert_eq!(set.len(), 1);
        let layer = &set.layers[0];
        assert_eq!((layer.width, layer.height), (2, 2));
        // Cell (0,0) looks at border cells on -X and -Z: portals there.
        assert_eq!(layer.cons[0] >> 4, 0b1001);
        assert_eq!(layer.cons[0] & 0xf, 0b0110);
    }

    #[test]
    fn test_region_overflow() {
        // 256 isolated walkable cells each start their own region.
        let desc = flat_desc(32, 32);
        let mut columns = vec![Vec::new(); 32 * 32];
        for z in (0..32).step_by(2) {
            for x in (0..32).step_by(2) {
                columns[x + z * 32].push(WalkableSpan::new(0, WALKABLE_AREA));
            }
        }
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        let result = build_heightfield_layers(&chf, 0, 10);
        assert!(matches!(result, Err(Error::RegionOverflow)));
    }

    #[test]
    fn test_layer_overflow() {
        // Ground row whose end columns each stack 62 isolated platforms: the
        // ground region ends up overlapping 124 others.
        let desc = flat_desc(3, 1);
        let mut columns = vec![vec![WalkableSpan::new(0, WALKABLE_AREA)]; 3];
        for x in [0, 2] {
            for level in 1..=62u16 {
                columns[x].push(WalkableSpan::new(level * 12, WALKABLE_AREA));
            }
        }
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();
        assert_eq!(chf.span_count(), 3 + 2 * 62);

        let result = build_heightfield_layers(&chf, 0, 10);
        assert!(matches!(result, Err(Error::LayerOverflow)));
    }

    #[test]
    fn test_empty_heightfield() {
        let desc = flat_desc(3, 3);
        let columns = vec![Vec::new(); 9];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();
        assert!(build_heightfield_layers(&chf, 0, 10).unwrap().is_empty());
    }
}
