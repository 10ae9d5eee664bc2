//! Scalar helpers and bounds tests

use glam::Vec3;

/// Returns the next power of two greater than or equal to `v`.
///
/// Zero maps to zero and values above 2^31 saturate to 2^31.
#[inline]
pub fn next_pow2(v: u32) -> u32 {
    if v == 0 {
        return 0;
    }
    v.checked_next_power_of_two().unwrap_or(1 << 31)
}

/// Returns the integer logarithm base 2
#[inline]
pub fn ilog2(mut v: u32) -> u32 {
    let mut r = if v > 0xffff { 16 } else { 0 };
    v >>= r;

    let shift = if v > 0xff { 8 } else { 0 };
    v >>= shift;
    r |= shift;

    let shift = if v > 0xf { 4 } else { 0 };
    v >>= shift;
    r |= shift;

    let shift = if v > 0x3 { 2 } else { 0 };
    v >>= shift;
    r |= shift;

    r | (v >> 1)
}

/// Number of bits needed to index `max_slots` slots, i.e. `ceil(log2(max_slots))`
#[inline]
pub fn slot_index_bits(max_slots: u32) -> u32 {
    ilog2(next_pow2(max_slots.max(1)))
}

/// Squares a value
#[inline]
pub fn sqr<T: std::ops::Mul<Output = T> + Copy>(x: T) -> T {
    x * x
}

/// Determines if two axis-aligned bounding boxes overlap (touching counts)
#[inline]
pub fn overlap_bounds(amin: &Vec3, amax: &Vec3, bmin: &Vec3, bmax: &Vec3) -> bool {
    !(amin.x > bmax.x
        || amax.x < bmin.x
        || amin.y > bmax.y
        || amax.y < bmin.y
        || amin.z > bmax.z
        || amax.z < bmin.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_pow2() {
        assert_eq!(next_pow2(0), 0);
        assert_eq!(next_pow2(1), 1);
        assert_eq!(next_pow2(3), 4);
        assert_eq!(next_pow2(64), 64);
        assert_eq!(next_pow2(65), 128);
        assert_eq!(next_pow2(1 << 31), 1 << 31);
        assert_eq!(next_pow2((1 << 31) + 1), 1 << 31);
        assert_eq!(next_pow2(u32::MAX), 1 << 31);
    }

    #[test]
    fn test_ilog2() {
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(2), 1);
        assert_eq!(ilog2(255), 7);
        assert_eq!(ilog2(256), 8);
        assert_eq!(ilog2(1 << 20), 20);
    }

    #[test]
    fn test_slot_index_bits() {
        assert_eq!(slot_index_bits(1), 0);
        assert_eq!(slot_index_bits(2), 1);
        assert_eq!(slot_index_bits(100), 7);
        assert_eq!(slot_index_bits(128), 7);
        assert_eq!(slot_index_bits(129), 8);
    }

    #[test]
    fn test_overlap_bounds() {
        let amin = Vec3::ZERO;
        let amax = Vec3::splat(1.0);
        assert!(overlap_bounds(&amin, &amax, &Vec3::splat(1.0), &Vec3::splat(2.0)));
        assert!(!overlap_bounds(
            &amin,
            &amax,
            &Vec3::new(1.5, 0.0, 0.0),
            &Vec3::new(2.0, 1.0, 1.0)
        ));
    }
}
