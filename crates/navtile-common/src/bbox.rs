//! Axis-aligned bounding box in world space.

use glam::Vec3;

/// Axis-aligned bounding box used for tile extents, geometry queries and
/// obstacle bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl BoundingBox {
    /// Creates a bounding box from min/max corners.
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Creates an inverted (empty) box ready for merging.
    pub fn empty() -> Self {
        Self {
            min: Vec3::splat(f32::MAX),
            max: Vec3::splat(f32::MIN),
        }
    }

    /// True if no point has been merged yet.
    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y || self.min.z > self.max.z
    }

    /// Grows the box to contain a point.
    pub fn merge_point(&mut self, p: Vec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Grows the box to contain another box.
    pub fn merge(&mut self, other: &BoundingBox) {
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }

    /// Expands the box by `amount` on every axis.
    pub fn padded(&self, amount: Vec3) -> Self {
        Self {
            min: self.min - amount,
            max: self.max + amount,
        }
    }

    /// True if the two boxes overlap on all three axes.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        !(self.min.x > other.max.x
            || self.max.x < other.min.x
            || self.min.y > other.max.y
            || self.max.y < other.min.y
            || self.min.z > other.max.z
            || self.max.z < other.min.z)
    }

    /// True if the point lies inside or on the box.
    pub fn contains(&self, p: Vec3) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Distance from a point to the box surface; zero inside.
    pub fn distance_to_point(&self, p: Vec3) -> f32 {
        let clamped = p.clamp(self.min, self.max);
        (p - clamped).length()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_and_intersect() {
        let mut b = BoundingBox::empty();
        assert!(b.is_empty());

        b.merge_point(Vec3::new(-1.0, 0.0, -1.0));
        b.merge_point(Vec3::new(1.0, 2.0, 1.0));
        assert!(!b.is_empty());
        assert_eq!(b.min, Vec3::new(-1.0, 0.0, -1.0));
        assert_eq!(b.max, Vec3::new(1.0, 2.0, 1.0));

        let other = BoundingBox::new(Vec3::new(0.5, 0.5, 0.5), Vec3::new(3.0, 3.0, 3.0));
        assert!(b.intersects(&other));

        let far = BoundingBox::new(Vec3::splat(10.0), Vec3::splat(11.0));
        assert!(!b.intersects(&far));
    }

    #[test]
    fn test_distance_to_point() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::splat(2.0));
        assert_eq!(b.distance_to_point(Vec3::splat(1.0)), 0.0);
        assert_eq!(b.distance_to_point(Vec3::new(5.0, 1.0, 1.0)), 3.0);
    }

    #[test]
    fn test_padded() {
        let b = BoundingBox::new(Vec3::ZERO, Vec3::ONE).padded(Vec3::splat(1.0));
        assert_eq!(b.min, Vec3::splat(-1.0));
        assert_eq!(b.max, Vec3::splat(2.0));
    }
}
