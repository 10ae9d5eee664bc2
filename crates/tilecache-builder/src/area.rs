//! Obstacle area marking on tile layers
//!
//! Each function rasterizes a shape into the layer grid and overwrites the area
//! id of every covered cell whose height lies within the shape's vertical
//! extent. `orig` is the world-space origin of the layer (its header `bmin`).

use glam::Vec3;

use super::tile_layer::TileLayer;

/// Cell range covered by a footprint, clamped to the grid; `None` if it misses the layer
struct CellRange {
    minx: i32,
    maxx: i32,
    minz: i32,
    maxz: i32,
    miny: i32,
    maxy: i32,
}

impl CellRange {
    fn clamp(layer: &TileLayer, minx: i32, maxx: i32, minz: i32, maxz: i32, miny: i32, maxy: i32) -> Option<Self> {
        let w = layer.width();
        let h = layer.height();

        if maxx < 0 || minx >= w || maxz < 0 || minz >= h {
            return None;
        }

        Some(Self {
            minx: minx.max(0),
            maxx: maxx.min(w - 1),
            minz: minz.max(0),
            maxz: maxz.min(h - 1),
            miny,
            maxy,
        })
    }

    /// Marks the cells accepted by `inside` whose height falls within the range
    fn mark(&self, layer: &mut TileLayer, area_id: u8, mut inside: impl FnMut(i32, i32) -> bool) -> usize {
        let w = layer.width();
        let mut marked = 0;

        for z in self.minz..=self.maxz {
            for x in self.minx..=self.maxx {
                if !inside(x, z) {
                    continue;
                }
                let idx = (x + z * w) as usize;
                let y = layer.heights[idx] as i32;
                if y < self.miny || y > self.maxy {
                    continue;
                }
                layer.areas[idx] = area_id;
                marked += 1;
            }
        }

        marked
    }
}

/// Marks the cells covered by an upright cylinder standing at `pos`.
///
/// Returns the number of cells whose area was overwritten.
#[allow(clippy::too_many_arguments)]
pub fn mark_cylinder_area(
    layer: &mut TileLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    pos: Vec3,
    radius: f32,
    height: f32,
    area_id: u8,
) -> usize {
    let bmin = Vec3::new(pos.x - radius, pos.y, pos.z - radius);
    let bmax = Vec3::new(pos.x + radius, pos.y + height, pos.z + radius);
    let r2 = (radius / cs + 0.5) * (radius / cs + 0.5);

    let ics = 1.0 / cs;
    let ich = 1.0 / ch;

    let px = (pos.x - orig.x) * ics;
    let pz = (pos.z - orig.z) * ics;

    let Some(range) = CellRange::clamp(
        layer,
        ((bmin.x - orig.x) * ics).floor() as i32,
        ((bmax.x - orig.x) * ics).floor() as i32,
        ((bmin.z - orig.z) * ics).floor() as i32,
        ((bmax.z - orig.z) * ics).floor() as i32,
        ((bmin.y - orig.y) * ich).floor() as i32,
        ((bmax.y - orig.y) * ich).floor() as i32,
    ) else {
        return 0;
    };

    range.mark(layer, area_id, |x, z| {
        let dx = x as f32 + 0.5 - px;
        let dz = z as f32 + 0.5 - pz;
        dx * dx + dz * dz <= r2
    })
}

/// Marks the cells covered by an axis-aligned box
pub fn mark_box_area(layer: &mut TileLayer, orig: Vec3, cs: f32, ch: f32, bmin: Vec3, bmax: Vec3, area_id: u8) -> usize {
    let ics = 1.0 / cs;
    let ich = 1.0 / ch;

    let Some(range) = CellRange::clamp(
        layer,
        ((bmin.x - orig.x) * ics).floor() as i32,
        ((bmax.x - orig.x) * ics).floor() as i32,
        ((bmin.z - orig.z) * ics).floor() as i32,
        ((bmax.z - orig.z) * ics).floor() as i32,
        ((bmin.y - orig.y) * ich).floor() as i32,
        ((bmax.y - orig.y) * ich).floor() as i32,
    ) else {
        return 0;
    };

    range.mark(layer, area_id, |_, _| true)
}

/// Marks the cells covered by a box rotated about the y axis.
///
/// `rot_aux` is `[cos(a/2) * sin(-a/2), cos(a/2)^2 - 0.5]` for a yaw of `a`
/// radians, as produced by [`oriented_box_rot_aux`].
#[allow(clippy::too_many_arguments)]
pub fn mark_oriented_box_area(
    layer: &mut TileLayer,
    orig: Vec3,
    cs: f32,
    ch: f32,
    center: Vec3,
    half_extents: Vec3,
    rot_aux: [f32; 2],
    area_id: u8,
) -> usize {
    let ics = 1.0 / cs;
    let ich = 1.0 / ch;

    let cx = (center.x - orig.x) * ics;
    let cz = (center.z - orig.z) * ics;

    let maxr = 1.41 * half_extents.x.max(half_extents.z);

    let Some(range) = CellRange::clamp(
        layer,
        (cx - maxr * ics).floor() as i32,
        (cx + maxr * ics).floor() as i32,
        (cz - maxr * ics).floor() as i32,
        (cz + maxr * ics).floor() as i32,
        ((center.y - half_extents.y - orig.y) * ich).floor() as i32,
        ((center.y + half_extents.y - orig.y) * ich).floor() as i32,
    ) else {
        return 0;
    };

    let xhalf = half_extents.x * ics + 0.5;
    let zhalf = half_extents.z * ics + 0.5;

    range.mark(layer, area_id, |x, z| {
        let x2 = 2.0 * (x as f32 - cx);
        let z2 = 2.0 * (z as f32 - cz);
        let xrot = rot_aux[1] * x2 + rot_aux[0] * z2;
        if xrot > xhalf || xrot < -xhalf {
            return false;
        }
        let zrot = rot_aux[1] * z2 - rot_aux[0] * x2;
        !(zrot > zhalf || zrot < -zhalf)
    })
}

/// Rotation terms used by [`mark_oriented_box_area`] for a yaw of `y_radians`
pub fn oriented_box_rot_aux(y_radians: f32) -> [f32; 2] {
    let coshalf = (0.5 * y_radians).cos();
    let sinhalf = (-0.5 * y_radians).sin();
    [coshalf * sinhalf, coshalf * coshalf - 0.5]
}
