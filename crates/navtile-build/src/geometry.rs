//! Geometry source contract for tile builds.

use glam::Vec3;
use navtile_common::BoundingBox;

/// An off-mesh connection (jump link) between two points.
#[derive(Debug, Clone)]
pub struct OffMeshConnection {
    /// Start point in world space.
    pub start: Vec3,
    /// End point in world space.
    pub end: Vec3,
    /// Traversal radius.
    pub radius: f32,
    /// True if the link can be traversed in both directions.
    pub bidirectional: bool,
    /// Area id assigned to the link.
    pub area: u8,
    /// Poly flags assigned to the link.
    pub flags: u16,
}

impl OffMeshConnection {
    /// World-space bounds of the connection, padded by its radius.
    pub fn bounds(&self) -> BoundingBox {
        let mut b = BoundingBox::empty();
        b.merge_point(self.start);
        b.merge_point(self.end);
        b.padded(Vec3::splat(self.radius))
    }
}

/// A box volume that overrides the area id of walkable cells inside it.
#[derive(Debug, Clone)]
pub struct AreaVolume {
    /// Volume bounds in world space.
    pub bounds: BoundingBox,
    /// Area id to stamp.
    pub area: u8,
}

/// Geometry collected for one tile build.
#[derive(Debug, Clone, Default)]
pub struct GeometrySnapshot {
    /// Vertex positions.
    pub vertices: Vec<Vec3>,
    /// Triangle vertex indices, three per triangle.
    pub indices: Vec<u32>,
    /// Off-mesh connections whose bounds intersect the query box.
    pub off_mesh_connections: Vec<OffMeshConnection>,
    /// Area volumes intersecting the query box.
    pub area_volumes: Vec<AreaVolume>,
}

impl GeometrySnapshot {
    /// Number of triangles in the snapshot.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// True if the snapshot carries no triangles.
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// World bounds of the triangle vertices; empty box if no geometry.
    pub fn bounds(&self) -> BoundingBox {
        let mut b = BoundingBox::empty();
        for &v in &self.vertices {
            b.merge_point(v);
        }
        b
    }
}

/// Supplies the triangles, off-mesh connections and area volumes that
/// intersect a tile's expanded bounds. Called once per tile build.
pub trait GeometrySource {
    /// Collects all geometry intersecting `bounds`.
    fn collect(&self, bounds: &BoundingBox) -> GeometrySnapshot;
}
