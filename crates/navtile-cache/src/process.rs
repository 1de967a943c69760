//! Post-processing hook invoked on every assembled tile.

use navtile_common::{BoundingBox, NULL_AREA};
use navtile_build::OffMeshConnection;

use crate::mesh::{NavPoly, OffMeshLink, POLY_FLAG_WALK};

/// Mutable view of a tile handed to the mesh process hook.
pub struct TileProcessContext<'a> {
    /// World bounds of the tile being assembled.
    pub tile_bounds: BoundingBox,
    /// Polygons of the tile; flags may be rewritten.
    pub polys: &'a mut [NavPoly],
    /// Off-mesh links to attach to the tile; starts empty.
    pub off_mesh_links: &'a mut Vec<OffMeshLink>,
}

/// Hook that runs after a tile's polygons are assembled and before the tile
/// is installed into the mesh. Implementations assign poly flags and attach
/// off-mesh connections.
pub trait MeshProcess {
    /// Processes one assembled tile.
    fn process(&mut self, ctx: &mut TileProcessContext<'_>);
}

/// Default mesh process: walkable flags from area ids, plus cached off-mesh
/// connections.
///
/// The connection list is refreshed only when the number of connections
/// changes; edits that keep the count stable are picked up on the next
/// count change.
#[derive(Debug, Default)]
pub struct DefaultMeshProcess {
    connections: Vec<OffMeshConnection>,
    cached_count: usize,
}

impl DefaultMeshProcess {
    /// Creates a process with no off-mesh connections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offers a fresh connection list; adopted only when the count differs
    /// from the cached one.
    pub fn update_connections(&mut self, connections: Vec<OffMeshConnection>) {
        if connections.len() != self.cached_count {
            self.cached_count = connections.len();
            self.connections = connections;
        }
    }

    /// The currently cached connections.
    pub fn connections(&self) -> &[OffMeshConnection] {
        &self.connections
    }
}

impl MeshProcess for DefaultMeshProcess {
    fn process(&mut self, ctx: &mut TileProcessContext<'_>) {
        for poly in ctx.polys.iter_mut() {
            poly.flags = if poly.area != NULL_AREA {
                POLY_FLAG_WALK
            } else {
                0
            };
        }

        for con in &self.connections {
            if con.bounds().intersects(&ctx.tile_bounds) {
                ctx.off_mesh_links.push(OffMeshLink {
                    start: con.start,
                    end: con.end,
                    radius: con.radius,
                    bidirectional: con.bidirectional,
                    area: con.area,
                    flags: con.flags,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn poly(area: u8) -> NavPoly {
        NavPoly {
            verts: vec![0, 1, 2],
            neis: vec![0, 0, 0],
            flags: 0xffff,
            area,
        }
    }

    fn connection(start: Vec3) -> OffMeshConnection {
        OffMeshConnection {
            start,
            end: start + Vec3::new(1.0, 0.0, 0.0),
            radius: 0.5,
            bidirectional: true,
            area: 63,
            flags: POLY_FLAG_WALK,
        }
    }

    #[test]
    fn test_flags_follow_areas() {
        let mut process = DefaultMeshProcess::new();
        let mut polys = vec![poly(63), poly(0)];
        let mut links = Vec::new();
        let mut ctx = TileProcessContext {
            tile_bounds: BoundingBox::new(Vec3::ZERO, Vec3::splat(10.0)),
            polys: &mut polys,
            off_mesh_links: &mut links,
        };
        process.process(&mut ctx);

        assert_eq!(polys[0].flags, POLY_FLAG_WALK);
        assert_eq!(polys[1].flags, 0);
    }

    #[test]
    fn test_connections_filtered_by_tile_bounds() {
        let mut process = DefaultMeshProcess::new();
        process.update_connections(vec![
            connection(Vec3::new(2.0, 0.0, 2.0)),
            connection(Vec3::new(50.0, 0.0, 50.0)),
        ]);

        let mut polys = Vec::new();
        let mut links = Vec::new();
        let mut ctx = TileProcessContext {
            tile_bounds: BoundingBox::new(Vec3::ZERO, Vec3::splat(10.0)),
            polys: &mut polys,
            off_mesh_links: &mut links,
        };
        process.process(&mut ctx);

        assert_eq!(links.len(), 1);
        assert_eq!(links[0].start, Vec3::new(2.0, 0.0, 2.0));
    }

    #[test]
    fn test_connection_cache_keyed_on_count() {
        let mut process = DefaultMeshProcess::new();
        process.update_connections(vec![connection(Vec3::ZERO)]);

        // Same count: the moved connection is not adopted.
        process.update_connections(vec![connection(Vec3::new(9.0, 0.0, 9.0))]);
        assert_eq!(process.connections()[0].start, Vec3::ZERO);

        // Different count: the whole list is refreshed.
        process.update_connections(vec![
            connection(Vec3::new(9.0, 0.0, 9.0)),
            connection(Vec3::new(3.0, 0.0, 3.0)),
        ]);
        assert_eq!(process.connections().len(), 2);
        assert_eq!(process.connections()[0].start, Vec3::new(9.0, 0.0, 9.0));
    }
}
