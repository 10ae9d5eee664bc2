//! Compact heightfield input
//!
//! The compact heightfield is the hand-off point between the voxel producer and
//! the tile cache builder. Each grid column stores the walkable spans found in it
//! together with their area ids and the connectivity to the spans of the four
//! neighbouring columns.

use glam::Vec3;
use tilecache_common::{get_dir_offset_x, get_dir_offset_y, Error, Result};

/// Neighbour slot value meaning "no connection in this direction"
pub const NOT_CONNECTED: u8 = 0x3f;

/// Maximum number of spans a column can reference through a connection
const MAX_COLUMN_LAYERS: usize = NOT_CONNECTED as usize;

/// Clearance stored for spans with open sky above them
const MAX_SPAN_CLEARANCE: u16 = 0xff;

/// A compact cell in the heightfield
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span of the column
    pub index: u32,
    /// Number of spans in the column
    pub count: u8,
}

impl CompactCell {
    /// Range of span indices belonging to this cell
    pub fn spans(&self) -> std::ops::Range<usize> {
        let start = self.index as usize;
        start..start + self.count as usize
    }
}

/// A walkable span in the compact heightfield
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height of the span in voxels
    pub y: u16,
    /// Clearance above the floor in voxels (capped at 255)
    pub h: u8,
    /// Per-direction index of the connected span within the neighbour column
    con: [u8; 4],
}

impl CompactSpan {
    /// Creates an unconnected span
    pub fn new(y: u16, h: u8) -> Self {
        Self {
            y,
            h,
            con: [NOT_CONNECTED; 4],
        }
    }

    /// Returns the neighbour column layer index in direction `dir`
    #[inline]
    pub fn con(&self, dir: usize) -> Option<usize> {
        match self.con[dir & 0x3] {
            NOT_CONNECTED => None,
            c => Some(c as usize),
        }
    }

    /// Sets or clears the connection in direction `dir`
    #[inline]
    pub fn set_con(&mut self, dir: usize, layer: Option<usize>) {
        self.con[dir & 0x3] = match layer {
            Some(l) if l < MAX_COLUMN_LAYERS => l as u8,
            _ => NOT_CONNECTED,
        };
    }
}

/// Walkable span description handed over by the voxel producer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkableSpan {
    /// Floor height in voxels
    pub y: u16,
    /// Clearance above the floor in voxels, `None` for open sky
    pub clearance: Option<u16>,
    /// Area id of the span (0 is unwalkable)
    pub area: u8,
}

impl WalkableSpan {
    pub fn new(y: u16, area: u8) -> Self {
        Self {
            y,
            clearance: None,
            area,
        }
    }

    pub fn with_clearance(mut self, clearance: u16) -> Self {
        self.clearance = Some(clearance);
        self
    }
}

/// Grid geometry of a compact heightfield
#[derive(Debug, Clone)]
pub struct CompactHeightfieldDesc {
    /// Width of the grid in cells, including the border
    pub width: i32,
    /// Depth of the grid in cells, including the border
    pub height: i32,
    /// Border size in cells on each side of the tile
    pub border_size: i32,
    /// Minimum clearance in voxels for a span to be walkable under
    pub walkable_height: i32,
    /// Maximum step in voxels between connected spans
    pub walkable_climb: i32,
    /// Minimum bounds in world space
    pub bmin: Vec3,
    /// Maximum bounds in world space
    pub bmax: Vec3,
    /// Cell size (horizontal resolution)
    pub cs: f32,
    /// Cell height (vertical resolution)
    pub ch: f32,
}

/// Compact heightfield consumed by the heightfield layer builder
#[derive(Debug, Clone)]
pub struct CompactHeightfield {
    pub width: i32,
    pub height: i32,
    pub border_size: i32,
    pub walkable_height: i32,
    pub walkable_climb: i32,
    pub bmin: Vec3,
    pub bmax: Vec3,
    pub cs: f32,
    pub ch: f32,
    /// Columns of the grid
    pub cells: Vec<CompactCell>,
    /// All spans, grouped per column
    pub spans: Vec<CompactSpan>,
    /// Area id per span
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds a compact heightfield from per-column span lists.
    ///
    /// `columns` is indexed `x + z * width` and every column must list its spans
    /// bottom-up. Connectivity is derived from `walkable_height` and
    /// `walkable_climb`.
    pub fn from_columns(desc: &CompactHeightfieldDesc, columns: &[Vec<WalkableSpan>]) -> Result<Self> {
        if desc.width <= 0 || desc.height <= 0 {
            return Err(Error::InvalidParam(format!(
                "compact heightfield size {}x{} must be positive",
                desc.width, desc.height
            )));
        }
        let cell_count = (desc.width * desc.height) as usize;
        if columns.len() != cell_count {
            return Err(Error::InvalidParam(format!(
                "expected {} columns, got {}",
                cell_count,
                columns.len()
            )));
        }

        let mut chf = Self {
            width: desc.width,
            height: desc.height,
            border_size: desc.border_size,
            walkable_height: desc.walkable_height,
            walkable_climb: desc.walkable_climb,
            bmin: desc.bmin,
            bmax: desc.bmax,
            cs: desc.cs,
            ch: desc.ch,
            cells: vec![CompactCell::default(); cell_count],
            spans: Vec::new(),
            areas: Vec::new(),
        };

        for (cell, column) in chf.cells.iter_mut().zip(columns) {
            if column.len() > u8::MAX as usize {
                return Err(Error::BufferTooSmall(format!(
                    "column holds {} spans, at most 255 are supported",
                    column.len()
                )));
            }
            cell.index = chf.spans.len() as u32;
            cell.count = column.len() as u8;

            for (i, span) in column.iter().enumerate() {
                // Clearance runs up to the next floor unless given explicitly.
                let next_floor = column.get(i + 1).map(|n| n.y);
                let clearance = match (span.clearance, next_floor) {
                    (Some(c), _) => c,
                    (None, Some(top)) => top.saturating_sub(span.y),
                    (None, None) => MAX_SPAN_CLEARANCE,
                };
                chf.spans.push(CompactSpan::new(
                    span.y,
                    clearance.min(MAX_SPAN_CLEARANCE) as u8,
                ));
                chf.areas.push(span.area);
            }
        }

        chf.build_connections();

        log::debug!(
            "Compact heightfield {}x{}: {} spans",
            chf.width,
            chf.height,
            chf.spans.len()
        );

        Ok(chf)
    }

    /// Links every span to the first compatible span of each neighbour column
    fn build_connections(&mut self) {
        let w = self.width;
        let h = self.height;
        let mut too_high_neighbour = 0usize;

        for z in 0..h {
            for x in 0..w {
                let cell = self.cells[(x + z * w) as usize];
                for i in cell.spans() {
                    for dir in 0..4 {
                        self.spans[i].set_con(dir, None);

                        let nx = x + get_dir_offset_x(dir as i32);
                        let nz = z + get_dir_offset_y(dir as i32);
                        if nx < 0 || nz < 0 || nx >= w || nz >= h {
                            continue;
                        }

                        let s = self.spans[i];
                        let ncell = self.cells[(nx + nz * w) as usize];
                        for k in ncell.spans() {
                            let ns = self.spans[k];
                            let bot = s.y.max(ns.y) as i32;
                            let top = (s.y as i32 + s.h as i32).min(ns.y as i32 + ns.h as i32);

                            if top - bot >= self.walkable_height
                                && (ns.y as i32 - s.y as i32).abs() <= self.walkable_climb
                            {
                                let layer = k - ncell.index as usize;
                                if layer >= MAX_COLUMN_LAYERS {
                                    too_high_neighbour = too_high_neighbour.max(layer);
                                    continue;
                                }
                                self.spans[i].set_con(dir, Some(layer));
                                break;
                            }
                        }
                    }
                }
            }
        }

        if too_high_neighbour > 0 {
            log::warn!(
                "Heightfield has too many layers {} (max: {})",
                too_high_neighbour,
                MAX_COLUMN_LAYERS
            );
        }
    }

    /// Index of the span connected to span `i` of column (x, z) in direction `dir`
    #[inline]
    pub fn neighbour_span(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let layer = self.spans[i].con(dir)?;
        let nx = x + get_dir_offset_x(dir as i32);
        let nz = z + get_dir_offset_y(dir as i32);
        let cell = self.cells[(nx + nz * self.width) as usize];
        Some(cell.index as usize + layer)
    }

    /// Number of walkable spans in the heightfield
    pub fn span_count(&self) -> usize {
        self.spans.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn flat_desc(width: i32, height: i32) -> CompactHeightfieldDesc {
        CompactHeightfieldDesc {
            width,
            height,
            border_size: 0,
            walkable_height: 10,
            walkable_climb: 2,
            bmin: Vec3::ZERO,
            bmax: Vec3::new(width as f32, 10.0, height as f32),
            cs: 1.0,
            ch: 0.5,
        }
    }

    #[test]
    fn test_flat_connectivity() {
        let desc = flat_desc(3, 3);
        let columns = vec![vec![WalkableSpan::new(4, 63)]; 9];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        assert_eq!(chf.span_count(), 9);
        // Centre cell connects in every direction.
        let centre = chf.cells[4].index as usize;
        for dir in 0..4 {
            assert_eq!(chf.spans[centre].con(dir), Some(0));
        }
        // Corner cell (0,0) has no -X or -Z neighbour.
        let corner = chf.cells[0].index as usize;
        assert_eq!(chf.spans[corner].con(0), None);
        assert_eq!(chf.spans[corner].con(3), None);
        assert_eq!(chf.neighbour_span(0, 0, corner, 2), Some(chf.cells[1].index as usize));
    }

    #[test]
    fn test_climb_limits_connection() {
        let desc = flat_desc(2, 1);
        let columns = vec![vec![WalkableSpan::new(0, 63)], vec![WalkableSpan::new(5, 63)]];
        let chf = CompactHeightfield::from_columns(&desc, &columns).unwrap();

        assert_eq!(chf.spans[0].con(2), None);
        assert_eq!(chf.spans[1].con(0), None);
    }

    #[test]
    fn test_stacked_spans_pick_reachable_floor() {
        let desc = flat_desc(2, 1);
        // Ground at 0 and a bridge at 30 in both columns.
        let column = vec![WalkableSpan::new(0, 63), WalkableSpan::new(30, 63)];
        let chf = CompactHeightfield::from_columns(&desc, &[column.clone(), column]).unwrap();

        assert_eq!(chf.spans[0].h, 30);
        assert_eq!(chf.spans[0].con(2), Some(0));
        assert_eq!(chf.spans[1].con(2), Some(1));
    }

    #[test]
    fn test_column_count_mismatch() {
        let desc = flat_desc(2, 2);
        let result = CompactHeightfield::from_columns(&desc, &[Vec::new()]);
        assert!(matches!(result, Err(Error::InvalidParam(_))));
    }
}
