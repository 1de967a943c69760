//! Small integer and grid helpers used across the pipeline.

use glam::Vec3;

/// Area id meaning "not walkable".
pub const NULL_AREA: u8 = 0;
/// Default area id for walkable cells.
pub const WALKABLE_AREA: u8 = 63;

/// Offset in x for the four cardinal directions (W, N, E, S order used by
/// the compact heightfield connectivity).
pub const DIR_OFFSET_X: [i32; 4] = [-1, 0, 1, 0];
/// Offset in z for the four cardinal directions.
pub const DIR_OFFSET_Z: [i32; 4] = [0, 1, 0, -1];

/// Rounds up to the next power of two.
pub fn next_power_of_two(v: u32) -> u32 {
    let mut v = v.wrapping_sub(1);
    v |= v >> 1;
    v |= v >> 2;
    v |= v >> 4;
    v |= v >> 8;
    v |= v >> 16;
    v.wrapping_add(1)
}

/// Integer base-two logarithm (floor).
pub fn ilog2(mut v: u32) -> u32 {
    let mut r = 0;
    while v > 1 {
        v >>= 1;
        r += 1;
    }
    r
}

/// True if the two inclusive ranges overlap.
pub fn overlap_range(amin: i32, amax: i32, bmin: i32, bmax: i32) -> bool {
    !(amin > bmax || amax < bmin)
}

/// Computes the cell-grid size covering `[bmin, bmax]` at resolution `cs`.
pub fn calc_grid_size(bmin: Vec3, bmax: Vec3, cs: f32) -> (i32, i32) {
    let w = ((bmax.x - bmin.x) / cs + 0.5) as i32;
    let h = ((bmax.z - bmin.z) / cs + 0.5) as i32;
    (w, h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_power_of_two() {
        assert_eq!(next_power_of_two(1), 1);
        assert_eq!(next_power_of_two(3), 4);
        assert_eq!(next_power_of_two(4), 4);
        assert_eq!(next_power_of_two(17), 32);
    }

    #[test]
    fn test_ilog2() {
        assert_eq!(ilog2(1), 0);
        assert_eq!(ilog2(2), 1);
        assert_eq!(ilog2(16), 4);
        assert_eq!(ilog2(17), 4);
    }

    #[test]
    fn test_grid_size() {
        let (w, h) = calc_grid_size(Vec3::new(-6.0, 0.0, -6.0), Vec3::new(6.0, 0.0, 6.0), 0.3);
        assert_eq!(w, 40);
        assert_eq!(h, 40);
    }

    #[test]
    fn test_overlap_range() {
        assert!(overlap_range(0, 10, 5, 15));
        assert!(overlap_range(0, 10, 10, 15));
        assert!(!overlap_range(0, 10, 11, 15));
    }
}
