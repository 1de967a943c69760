//! End-to-end tests across the builder, the cache and the orchestrator:
//! a 10x10 ground quad split into a 2x2 tile grid, with obstacles carved
//! and removed while the mesh stays queryable.

use glam::Vec3;
use navtile_common::BoundingBox;

use navtile_build::{GeometrySnapshot, GeometrySource, NavBuildConfig, OffMeshConnection};

use crate::cache::ObstacleShape;
use crate::dynamic_mesh::DynamicNavMesh;
use crate::mesh::POLY_FLAG_WALK;

struct GroundQuad {
    min: Vec3,
    max: Vec3,
    connections: Vec<OffMeshConnection>,
}

impl GroundQuad {
    fn new() -> Self {
        Self {
            min: Vec3::new(-5.0, 0.0, -5.0),
            max: Vec3::new(5.0, 0.0, 5.0),
            connections: Vec::new(),
        }
    }
}

impl GeometrySource for GroundQuad {
    fn collect(&self, bounds: &BoundingBox) -> GeometrySnapshot {
        let quad = BoundingBox::new(self.min, self.max);
        if !quad.intersects(bounds) {
            return GeometrySnapshot::default();
        }
        GeometrySnapshot {
            vertices: vec![
                Vec3::new(self.min.x, self.min.y, self.min.z),
                Vec3::new(self.max.x, self.min.y, self.min.z),
                Vec3::new(self.max.x, self.min.y, self.max.z),
                Vec3::new(self.min.x, self.min.y, self.max.z),
            ],
            indices: vec![0, 2, 1, 0, 3, 2],
            off_mesh_connections: self.connections.clone(),
            area_volumes: Vec::new(),
        }
    }
}

fn config() -> NavBuildConfig {
    NavBuildConfig {
        tile_size: 32,
        agent_radius: 0.3,
        agent_height: 2.0,
        agent_max_climb: 0.3,
        ..Default::default()
    }
}

fn built_mesh() -> DynamicNavMesh {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut nav = DynamicNavMesh::new(config()).unwrap();
    nav.build(&GroundQuad::new()).unwrap();
    nav
}

fn settle(nav: &mut DynamicNavMesh) {
    for _ in 0..64 {
        if !nav.update(0.016).unwrap() {
            return;
        }
    }
    panic!("update loop did not settle");
}

/// Probe points well inside the eroded walkable surface, covering all four
/// tile columns.
fn probes() -> Vec<Vec3> {
    let mut points = Vec::new();
    for ix in -3..=3 {
        for iz in -3..=3 {
            points.push(Vec3::new(ix as f32 * 1.4, 0.1, iz as f32 * 1.4));
        }
    }
    points
}

fn walkable_set(nav: &DynamicNavMesh) -> Vec<bool> {
    let mesh = nav.nav_mesh().unwrap();
    probes()
        .iter()
        .map(|p| mesh.find_poly_at(*p).is_some())
        .collect()
}

#[test]
fn test_ground_quad_is_fully_walkable() {
    let nav = built_mesh();
    assert_eq!(nav.num_tiles(), Some((2, 2)));
    assert!(walkable_set(&nav).iter().all(|&w| w));

    let mesh = nav.nav_mesh().unwrap();
    // Beyond the quad there is nothing to stand on.
    assert!(mesh.find_poly_at(Vec3::new(7.0, 0.1, 0.0)).is_none());
    assert!(mesh.find_poly_at(Vec3::new(0.0, 0.1, -8.0)).is_none());

    // Every installed polygon carries the walk flag.
    for ty in 0..2 {
        for tx in 0..2 {
            for tile in mesh.tiles_at(tx, ty) {
                assert!(!tile.polys.is_empty());
                for poly in &tile.polys {
                    assert_eq!(poly.flags & POLY_FLAG_WALK, POLY_FLAG_WALK);
                }
            }
        }
    }
}

#[test]
fn test_obstacle_across_tile_boundary_carves_and_restores() {
    let mut nav = built_mesh();
    let before = walkable_set(&nav);

    // Centered on the seam between all four tile columns.
    let id = nav.add_obstacle(ObstacleShape {
        position: Vec3::new(0.0, 0.0, 0.0),
        radius: 1.6,
        height: 2.0,
    });
    settle(&mut nav);

    let mesh = nav.nav_mesh().unwrap();
    for offset in [
        Vec3::new(0.7, 0.1, 0.7),
        Vec3::new(-0.7, 0.1, 0.7),
        Vec3::new(0.7, 0.1, -0.7),
        Vec3::new(-0.7, 0.1, -0.7),
    ] {
        assert!(mesh.find_poly_at(offset).is_none(), "{offset} not carved");
    }
    // Outside the cylinder the floor is untouched.
    assert!(mesh.find_poly_at(Vec3::new(3.0, 0.1, 3.0)).is_some());
    assert!(mesh.find_poly_at(Vec3::new(-3.0, 0.1, 0.0)).is_some());

    // Removing the obstacle restores the exact pre-add walkability.
    nav.remove_obstacle(id);
    settle(&mut nav);
    assert_eq!(walkable_set(&nav), before);
}

#[test]
fn test_two_obstacles_carve_independently() {
    let mut nav = built_mesh();

    let left = nav.add_obstacle(ObstacleShape {
        position: Vec3::new(-3.0, 0.0, 0.0),
        radius: 1.0,
        height: 2.0,
    });
    nav.add_obstacle(ObstacleShape {
        position: Vec3::new(3.0, 0.0, 0.0),
        radius: 1.0,
        height: 2.0,
    });
    settle(&mut nav);

    let mesh = nav.nav_mesh().unwrap();
    assert!(mesh.find_poly_at(Vec3::new(-3.0, 0.1, 0.0)).is_none());
    assert!(mesh.find_poly_at(Vec3::new(3.0, 0.1, 0.0)).is_none());
    assert!(mesh.find_poly_at(Vec3::new(0.0, 0.1, 3.0)).is_some());

    // Removing one leaves the other's hole in place.
    nav.remove_obstacle(left);
    settle(&mut nav);
    let mesh = nav.nav_mesh().unwrap();
    assert!(mesh.find_poly_at(Vec3::new(-3.0, 0.1, 0.0)).is_some());
    assert!(mesh.find_poly_at(Vec3::new(3.0, 0.1, 0.0)).is_none());
}

#[test]
fn test_save_load_preserves_every_column() {
    let nav = built_mesh();
    let mut buf = Vec::new();
    nav.save(&mut buf).unwrap();

    let mut restored = DynamicNavMesh::new(config()).unwrap();
    restored.load(&mut buf.as_slice()).unwrap();

    for ty in 0..2 {
        for tx in 0..2 {
            assert_eq!(
                restored.tile_data(tx, ty).unwrap(),
                nav.tile_data(tx, ty).unwrap(),
                "column ({tx}, {ty}) differs after reload"
            );
        }
    }
    assert_eq!(walkable_set(&restored), walkable_set(&nav));
}

#[test]
fn test_obstacles_survive_reload() {
    let mut nav = built_mesh();
    nav.add_obstacle(ObstacleShape {
        position: Vec3::new(0.0, 0.0, 0.0),
        radius: 1.0,
        height: 2.0,
    });
    settle(&mut nav);

    // Saving stores only the unobstructed layers; the obstacle is scene
    // state and gets resubmitted on load.
    let mut buf = Vec::new();
    nav.save(&mut buf).unwrap();
    nav.load(&mut buf.as_slice()).unwrap();
    settle(&mut nav);

    let mesh = nav.nav_mesh().unwrap();
    assert!(mesh.find_poly_at(Vec3::new(0.0, 0.1, 0.0)).is_none());
    assert!(mesh.find_poly_at(Vec3::new(3.0, 0.1, 3.0)).is_some());
}

#[test]
fn test_many_obstacle_requests_settle() {
    let mut nav = built_mesh();

    // More requests than the queue holds at once; the busy-wait in the
    // obstacle API drains the queue as needed.
    let mut ids = Vec::new();
    for i in 0..80 {
        let x = -4.0 + (i % 9) as f32;
        let z = -4.0 + (i / 9) as f32;
        ids.push(nav.add_obstacle(ObstacleShape {
            position: Vec3::new(x, 0.0, z),
            radius: 0.4,
            height: 1.0,
        }));
    }
    assert_eq!(nav.obstacle_count(), 80);
    settle(&mut nav);

    for id in ids {
        nav.remove_obstacle(id);
    }
    settle(&mut nav);
    assert_eq!(nav.obstacle_count(), 0);
    assert!(walkable_set(&nav).iter().all(|&w| w));
}
