//! Tile builder: rasterizes triangle geometry into voxel heightfields and
//! emits compressed navigation tile layers.
//!
//! The pipeline per tile is the classic one: rasterize walkable triangles
//! into a span heightfield, filter unwalkable spans, build a compact
//! heightfield, erode by the agent radius, stamp area volumes, partition
//! regions, extract 2.5D layers and compress them.

mod builder;
mod compact;
mod config;
mod geometry;
mod heightfield;
mod layers;
mod rasterize;
mod region;

pub use builder::{NavBuildData, TileBuilder};
pub use compact::{CompactCell, CompactHeightfield, CompactSpan, NOT_CONNECTED};
pub use config::{NavBuildConfig, PartitionType, TileConfig};
pub use geometry::{AreaVolume, GeometrySnapshot, GeometrySource, OffMeshConnection};
pub use heightfield::{Heightfield, Span};
pub use layers::{build_heightfield_layers, HeightfieldLayer};
pub use rasterize::{mark_walkable_triangles, rasterize_triangles};
pub use region::{build_regions_monotone, build_regions_watershed, BORDER_REG};
