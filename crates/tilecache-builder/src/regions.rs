//! Monotone region partitioning of a tile layer
//!
//! Rows are swept left to right; runs of connected cells form sweeps that either
//! continue the region of the previous row or open a new one. Afterwards regions
//! of the same area that have exactly one shared border are merged, and the ids
//! are compacted to `0..reg_count`.

use tilecache_common::{Error, Result};

use super::tile_layer::TileLayer;
use super::NULL_AREA;

/// Maximum neighbours tracked for a monotone region
const MAX_NEIS: usize = 16;
/// Unassigned region id
const NULL_REG: u8 = 0xff;

#[derive(Debug, Clone, Copy, Default)]
struct LayerSweepSpan {
    ns: u16,
    id: u8,
    nei: u8,
}

#[derive(Debug, Clone)]
struct LayerMonotoneRegion {
    /// Number of cells in the region
    area: i32,
    neis: Vec<u8>,
    reg_id: u8,
    area_id: u8,
}

impl LayerMonotoneRegion {
    fn new() -> Self {
        Self {
            area: 0,
            neis: Vec::with_capacity(MAX_NEIS),
            reg_id: NULL_REG,
            area_id: NULL_AREA,
        }
    }

    /// Appends a neighbour unless it repeats the last one or the list is full
    fn add_unique_last(&mut self, v: u8) {
        if self.neis.last() == Some(&v) || self.neis.len() >= MAX_NEIS {
            return;
        }
        self.neis.push(v);
    }
}

/// Two cells are connected when they share an area and the step is climbable
#[inline]
fn is_connected(layer: &TileLayer, ia: usize, ib: usize, walkable_climb: i32) -> bool {
    if layer.areas[ia] != layer.areas[ib] {
        return false;
    }
    (layer.heights[ia] as i32 - layer.heights[ib] as i32).abs() <= walkable_climb
}

/// True if exactly one border links the regions labelled `old_reg_id` and `new_reg_id`
fn can_merge(old_reg_id: u8, new_reg_id: u8, regs: &[LayerMonotoneRegion]) -> bool {
    let mut count = 0;
    for reg in regs.iter().filter(|r| r.reg_id == old_reg_id) {
        for &nei in &reg.neis {
            if regs[nei as usize].reg_id == new_reg_id {
                count += 1;
            }
        }
    }
    count == 1
}

/// Partitions the walkable cells of `layer` into regions.
///
/// Fills `layer.regs` and `layer.reg_count`. Fails with
/// [`Error::RegionOverflow`] when the sweep needs more than 255 raw regions.
pub fn build_tile_cache_regions(layer: &mut TileLayer, walkable_climb: i32) -> Result<()> {
    let w = layer.width();
    let h = layer.height();

    layer.regs.fill(NULL_REG);
    layer.reg_count = 0;

    let mut sweeps = vec![LayerSweepSpan::default(); w.max(1) as usize];
    let mut prev_count = [0u16; 256];
    let mut reg_id = 0usize;

    for y in 0..h {
        prev_count[..reg_id].fill(0);
        let mut sweep_id = 0usize;

        for x in 0..w {
            let idx = (x + y * w) as usize;
            if layer.areas[idx] == NULL_AREA {
                continue;
            }

            let mut sid = NULL_REG;

            // -x
            if x > 0 {
                let xidx = idx - 1;
                if is_connected(layer, idx, xidx, walkable_climb) && layer.regs[xidx] != NULL_REG {
                    sid = layer.regs[xidx];
                }
            }

            if sid == NULL_REG {
                sid = sweep_id as u8;
                sweep_id += 1;
                sweeps[sid as usize].nei = NULL_REG;
                sweeps[sid as usize].ns = 0;
            }

            // -y
            if y > 0 {
                let yidx = idx - w as usize;
                if is_connected(layer, idx, yidx, walkable_climb) {
                    let nr = layer.regs[yidx];
                    if nr != NULL_REG {
                        let sweep = &mut sweeps[sid as usize];
                        // First valid neighbour wins.
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_count[nr as usize] += 1;
                        } else {
                            // More than one neighbour, never merge ambiguously.
                            sweep.nei = NULL_REG;
                        }
                    }
                }
            }

            layer.regs[idx] = sid;
        }

        for sweep in sweeps.iter_mut().take(sweep_id) {
            if sweep.nei != NULL_REG && prev_count[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if reg_id == NULL_REG as usize {
                    return Err(Error::RegionOverflow);
                }
                sweep.id = reg_id as u8;
                reg_id += 1;
            }
        }

        let row = (y * w) as usize..((y + 1) * w) as usize;
        for r in &mut layer.regs[row] {
            if *r != NULL_REG {
                *r = sweeps[*r as usize].id;
            }
        }
    }

    let nregs = reg_id;
    let mut regs = vec![LayerMonotoneRegion::new(); nregs];

    // Find region neighbours.
    for y in 0..h {
        for x in 0..w {
            let idx = (x + y * w) as usize;
            let ri = layer.regs[idx];
            if ri == NULL_REG {
                continue;
            }

            regs[ri as usize].area += 1;
            regs[ri as usize].area_id = layer.areas[idx];

            if y > 0 {
                let ymi = idx - w as usize;
                if is_connected(layer, idx, ymi, walkable_climb) {
                    let rai = layer.regs[ymi];
                    if rai != NULL_REG && rai != ri {
                        regs[ri as usize].add_unique_last(rai);
                        regs[rai as usize].add_unique_last(ri);
                    }
                }
            }
        }
    }

    for (i, reg) in regs.iter_mut().enumerate() {
        reg.reg_id = i as u8;
    }

    // Union regions with the largest compatible neighbour sharing a single border.
    for i in 0..nregs {
        let mut merge = None;
        let mut mergea = 0;

        for &nei in &regs[i].neis {
            let regn = &regs[nei as usize];
            if regs[i].reg_id == regn.reg_id || regs[i].area_id != regn.area_id {
                continue;
            }
            if regn.area > mergea && can_merge(regs[i].reg_id, regn.reg_id, &regs) {
                mergea = regn.area;
                merge = Some(nei as usize);
            }
        }

        if let Some(m) = merge {
            let old_id = regs[i].reg_id;
            let new_id = regs[m].reg_id;
            for reg in regs.iter_mut().filter(|r| r.reg_id == old_id) {
                reg.reg_id = new_id;
            }
        }
    }

    // Compact ids.
    let mut remap = [0u8; 256];
    let mut used = [false; 256];
    for reg in &regs {
        used[reg.reg_id as usize] = true;
    }
    let mut count = 0usize;
    for (id, slot) in remap.iter_mut().enumerate() {
        if used[id] {
            *slot = count as u8;
            count += 1;
        }
    }
    for reg in &mut regs {
        reg.reg_id = remap[reg.reg_id as usize];
    }

    layer.reg_count = count as u8;
    for r in &mut layer.regs {
        if *r != NULL_REG {
            *r = regs[*r as usize].reg_id;
        }
    }

    log::debug!(
        "Partitioned layer ({}, {}, {}) into {} regions ({} raw)",
        layer.header.tx,
        layer.header.ty,
        layer.header.tlayer,
        layer.reg_count,
        nregs
    );

    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::tile_layer::TileLayerHeader;
    use crate::WALKABLE_AREA;

    /// Builds a layer from an ASCII map: '.' walkable, '#' blocked, digits are
    /// walkable cells with that area id. Row 0 of the map is z = 0.
    pub(crate) fn layer_from_map(rows: &[&str]) -> TileLayer {
        let h = rows.len();
        let w = rows[0].len();
        let header = TileLayerHeader {
            width: w as u8,
            height: h as u8,
            maxx: (w - 1) as u8,
            maxy: (h - 1) as u8,
            bmax: [w as f32, 1.0, h as f32],
            ..TileLayerHeader::default()
        };

        let mut areas = vec![NULL_AREA; w * h];
        for (z, row) in rows.iter().enumerate() {
            for (x, c) in row.chars().enumerate() {
                areas[x + z * w] = match c {
                    '.' => WALKABLE_AREA,
                    '#' => NULL_AREA,
                    d => d.to_digit(10).map(|v| v as u8).unwrap_or(NULL_AREA),
                };
            }
        }

        let mut cons = vec![0u8; w * h];
        for z in 0..h as i32 {
            for x in 0..w as i32 {
                let idx = (x + z * w as i32) as usize;
                if areas[idx] == NULL_AREA {
                    continue;
                }
                for dir in 0..4 {
                    let nx = x + tilecache_common::get_dir_offset_x(dir);
                    let nz = z + tilecache_common::get_dir_offset_y(dir);
                    if nx < 0 || nz < 0 || nx >= w as i32 || nz >= h as i32 {
                        continue;
                    }
                    if areas[(nx + nz * w as i32) as usize] != NULL_AREA {
                        cons[idx] |= 1 << dir;
                    }
                }
            }
        }

        TileLayer::new(header, vec![0; w * h], areas, cons).unwrap()
    }

    fn region_ids_are_dense(layer: &TileLayer) -> bool {
        let mut seen = vec![false; layer.reg_count as usize];
        for &r in &layer.regs {
            if r == NULL_REG {
                continue;
            }
            if r >= layer.reg_count {
                return false;
            }
            seen[r as usize] = true;
        }
        seen.iter().all(|&s| s)
    }

    #[test]
    fn test_flat_square_single_region() {
        let mut layer = layer_from_map(&["..", ".."]);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 1);
        assert!(layer.regs.iter().all(|&r| r == 0));
    }

    #[test]
    fn test_blocked_cells_have_no_region() {
        let mut layer = layer_from_map(&["...", ".#.", "..."]);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.regs[4], NULL_REG);
        assert!(layer.reg_count >= 1);
        assert!(region_ids_are_dense(&layer));
    }

    #[test]
    fn test_separate_islands() {
        let mut layer = layer_from_map(&["..#..", "..#..", "..#.."]);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_ne!(layer.regs[0], layer.regs[3]);
        assert!(region_ids_are_dense(&layer));
    }

    #[test]
    fn test_areas_never_merge() {
        let mut layer = layer_from_map(&["1122", "1122"]);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_ne!(layer.regs[0], layer.regs[2]);
        assert_eq!(layer.regs[0], layer.regs[5]);
    }

    #[test]
    fn test_u_shape_stays_dense() {
        let mut layer = layer_from_map(&[".....", ".#.#.", ".#.#.", "....."]);
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert!(layer.reg_count >= 1);
        assert!(region_ids_are_dense(&layer));
        assert!(layer
            .areas
            .iter()
            .zip(&layer.regs)
            .all(|(&a, &r)| (a == NULL_AREA) == (r == NULL_REG)));
    }

    #[test]
    fn test_climb_splits_regions() {
        let mut layer = layer_from_map(&["....", "...."]);
        // Raise the right half by more than the climb.
        for idx in [2, 3, 6, 7] {
            layer.heights[idx] = 10;
        }
        build_tile_cache_regions(&mut layer, 2).unwrap();
        assert_eq!(layer.reg_count, 2);
        assert_ne!(layer.regs[0], layer.regs[3]);
    }

    #[test]
    fn test_region_overflow() {
        // Alternating walkable columns in a wide, tall layer produce one
        // region per column run per row segment.
        let row_a: String = (0..200).map(|x| if x % 2 == 0 { '.' } else { '#' }).collect();
        let row_b: String = "#".repeat(200);
        let rows: Vec<&str> = (0..6).map(|z| if z % 2 == 0 { row_a.as_str() } else { row_b.as_str() }).collect();
        let mut layer = layer_from_map(&rows);
        assert!(matches!(
            build_tile_cache_regions(&mut layer, 2),
            Err(Error::RegionOverflow)
        ));
    }
}
