//! Build configuration for the navigation tile pipeline.

use glam::Vec3;
use navtile_common::{BoundingBox, Error, Result};

/// How walkable cells are grouped into regions before polygonization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PartitionType {
    /// Watershed partitioning: slower, produces the nicest region shapes.
    Watershed,
    /// Monotone partitioning: fast, no holes, may produce long thin regions.
    #[default]
    Monotone,
}

/// World-space build parameters shared by every tile.
#[derive(Debug, Clone)]
pub struct NavBuildConfig {
    /// Horizontal voxel resolution in world units.
    pub cell_size: f32,
    /// Vertical voxel resolution in world units.
    pub cell_height: f32,

    /// Minimum height an agent needs to pass under an obstacle.
    pub agent_height: f32,
    /// Agent radius; walkable area is eroded by this much.
    pub agent_radius: f32,
    /// Maximum ledge height the agent can step up.
    pub agent_max_climb: f32,
    /// Maximum walkable slope in degrees.
    pub agent_max_slope: f32,

    /// Tile edge length in cells.
    pub tile_size: i32,

    /// Minimum region size in cells; smaller islands are culled.
    pub region_min_size: f32,
    /// Regions smaller than this are merged with neighbors when possible.
    pub region_merge_size: f32,

    /// Maximum contour edge length in world units (carried for mesh params).
    pub edge_max_length: f32,
    /// Maximum contour simplification error (carried for mesh params).
    pub edge_max_error: f32,
    /// Detail mesh sampling distance (carried for mesh params).
    pub detail_sample_distance: f32,
    /// Detail mesh maximum sample error (carried for mesh params).
    pub detail_sample_max_error: f32,

    /// Region partition algorithm.
    pub partition_type: PartitionType,

    /// Extra padding applied to the mesh bounding box on every axis.
    pub padding: Vec3,

    /// Maximum number of layers per tile column. Read through
    /// [`max_layers`](Self::max_layers), which clamps to `[3, 255]`.
    pub max_layers: u32,
    /// Maximum number of dynamic obstacles the cache will track.
    pub max_obstacles: u32,
}

impl Default for NavBuildConfig {
    fn default() -> Self {
        Self {
            cell_size: 0.3,
            cell_height: 0.2,
            agent_height: 2.0,
            agent_radius: 0.6,
            agent_max_climb: 0.9,
            agent_max_slope: 45.0,
            tile_size: 128,
            region_min_size: 8.0,
            region_merge_size: 20.0,
            edge_max_length: 12.0,
            edge_max_error: 1.3,
            detail_sample_distance: 6.0,
            detail_sample_max_error: 1.0,
            partition_type: PartitionType::default(),
            padding: Vec3::ONE,
            max_layers: 16,
            max_obstacles: 1024,
        }
    }
}

impl NavBuildConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maximum number of layers per tile column, clamped to `[3, 255]`.
    pub fn max_layers(&self) -> u32 {
        self.max_layers.clamp(3, 255)
    }

    /// Sets the layer cap, clamped to `[3, 255]`.
    pub fn set_max_layers(&mut self, max_layers: u32) {
        self.max_layers = max_layers.clamp(3, 255);
    }

    /// Tile edge length in world units.
    pub fn tile_edge_length(&self) -> f32 {
        self.tile_size as f32 * self.cell_size
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cell_size <= 0.0 || self.cell_height <= 0.0 {
            return Err(Error::Config(
                "cell size and cell height must be positive".to_string(),
            ));
        }
        if self.tile_size <= 0 {
            return Err(Error::Config("tile size must be positive".to_string()));
        }
        if !(0.0..=90.0).contains(&self.agent_max_slope) {
            return Err(Error::Config(format!(
                "walkable slope angle {} out of range [0, 90]",
                self.agent_max_slope
            )));
        }
        if self.agent_height <= 0.0 || self.agent_radius < 0.0 {
            return Err(Error::Config(
                "agent height must be positive and radius non-negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Derives the per-tile voxel configuration for tile `(tx, ty)` of a
    /// mesh whose (padded) bounds start at `mesh_bounds.min`.
    pub fn tile_config(&self, mesh_bounds: &BoundingBox, tx: i32, ty: i32) -> TileConfig {
        let cs = self.cell_size;
        let ch = self.cell_height;

        let walkable_height = (self.agent_height / ch).ceil() as i32;
        let walkable_climb = (self.agent_max_climb / ch).floor() as i32;
        let walkable_radius = (self.agent_radius / cs).ceil() as i32;
        // Extra cells around the walkable radius so region borders never
        // touch the tile edge.
        let border_size = walkable_radius + 3;

        let tile_edge = self.tile_edge_length();
        let border = border_size as f32 * cs;

        let bmin = Vec3::new(
            mesh_bounds.min.x + tx as f32 * tile_edge - border,
            mesh_bounds.min.y,
            mesh_bounds.min.z + ty as f32 * tile_edge - border,
        );
        let bmax = Vec3::new(
            mesh_bounds.min.x + (tx + 1) as f32 * tile_edge + border,
            mesh_bounds.max.y,
            mesh_bounds.min.z + (ty + 1) as f32 * tile_edge + border,
        );

        TileConfig {
            width: self.tile_size + border_size * 2,
            height: self.tile_size + border_size * 2,
            bmin,
            bmax,
            walkable_height,
            walkable_climb,
            walkable_radius,
            border_size,
            min_region_area: (self.region_min_size * self.region_min_size) as i32,
            merge_region_area: (self.region_merge_size * self.region_merge_size) as i32,
        }
    }
}

/// Cell-unit configuration derived for one tile build.
#[derive(Debug, Clone)]
pub struct TileConfig {
    /// Grid width in cells, tile size plus borders.
    pub width: i32,
    /// Grid height (depth) in cells.
    pub height: i32,
    /// Expanded tile bounds minimum.
    pub bmin: Vec3,
    /// Expanded tile bounds maximum.
    pub bmax: Vec3,
    /// Agent height in cell-height units.
    pub walkable_height: i32,
    /// Maximum step height in cell-height units.
    pub walkable_climb: i32,
    /// Agent radius in cell-size units.
    pub walkable_radius: i32,
    /// Border width in cells around the core tile area.
    pub border_size: i32,
    /// Minimum region area in cells.
    pub min_region_area: i32,
    /// Merge threshold region area in cells.
    pub merge_region_area: i32,
}
