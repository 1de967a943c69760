//! Tile cache: compressed storage for navigation tile layers, dynamic
//! obstacle tracking and incremental mesh assembly.
//!
//! The cache stores the compressed layers emitted by the tile builder.
//! Obstacles are queued as requests and folded into the mesh tile by tile
//! across `update()` calls, carving the decompressed layer data without
//! touching the stored layers. The [`DynamicNavMesh`] orchestrator ties the
//! builder, the cache and the assembled [`NavMesh`] together.

mod alloc;
mod assembly;
mod cache;
mod dynamic_mesh;
mod events;
mod io;
mod mesh;
mod process;

#[cfg(test)]
mod scenario_tests;

pub use alloc::LinearAllocator;
pub use assembly::build_mesh_tile;
pub use cache::{
    ObstacleRef, ObstacleShape, TileCache, TileCacheParams, TileRef, MAX_OBSTACLE_REQUESTS,
};
pub use dynamic_mesh::{DynamicNavMesh, ObstacleId};
pub use events::{NavEvent, ObserverHandle};
pub use io::{read_tile_set, write_tile_set, TileSetHeader, TILE_SET_MAGIC, TILE_SET_VERSION};
pub use mesh::{MeshTile, NavMesh, NavMeshParams, NavPoly, OffMeshLink};
pub use process::{DefaultMeshProcess, MeshProcess, TileProcessContext};
