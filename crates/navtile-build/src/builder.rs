//! Per-tile build orchestration.

use navtile_common::{
    BoundingBox, CompressedLayer, Error, Result, TileCompressor, TileLayerHeader, LAYER_MAGIC,
    LAYER_VERSION,
};

use crate::compact::CompactHeightfield;
use crate::config::{NavBuildConfig, PartitionType, TileConfig};
use crate::geometry::{GeometrySnapshot, GeometrySource};
use crate::heightfield::Heightfield;
use crate::layers::build_heightfield_layers;
use crate::rasterize::{mark_walkable_triangles, rasterize_triangles};
use crate::region::{build_regions_monotone, build_regions_watershed};

/// Scratch state for one tile build. Dropped when the build finishes, so
/// intermediate voxel data never outlives the tile it was built for.
#[derive(Debug, Default)]
pub struct NavBuildData {
    /// Geometry collected for the tile.
    pub snapshot: GeometrySnapshot,
    /// Span heightfield, present after rasterization.
    pub heightfield: Option<Heightfield>,
    /// Compact heightfield, present after compaction.
    pub compact: Option<CompactHeightfield>,
}

/// Builds compressed navigation layers for single tiles.
///
/// Holds only shared-immutable configuration, so one builder can serve
/// concurrent builds of disjoint tiles.
#[derive(Debug, Clone)]
pub struct TileBuilder {
    config: NavBuildConfig,
}

impl TileBuilder {
    /// Creates a builder for the given configuration.
    pub fn new(config: NavBuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The build configuration.
    pub fn config(&self) -> &NavBuildConfig {
        &self.config
    }

    /// Builds the compressed layers of tile `(tx, ty)`.
    ///
    /// Returns an empty vector when the tile contains no geometry or no
    /// walkable surface. A failure inside the voxel pipeline is logged and
    /// likewise yields an empty vector; it never poisons other tiles.
    pub fn build_tile(
        &self,
        source: &dyn GeometrySource,
        mesh_bounds: &BoundingBox,
        tx: i32,
        ty: i32,
        compressor: &dyn TileCompressor,
    ) -> Result<Vec<CompressedLayer>> {
        let tile_config = self.config.tile_config(mesh_bounds, tx, ty);
        let snapshot = source.collect(&BoundingBox::new(tile_config.bmin, tile_config.bmax));
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        let mut data = NavBuildData {
            snapshot,
            ..Default::default()
        };

        match self.build_layers(&mut data, &tile_config, tx, ty, compressor) {
            Ok(layers) => Ok(layers),
            Err(e) => {
                log::error!("building tile ({tx}, {ty}) failed: {e}");
                Ok(Vec::new())
            }
        }
    }

    fn build_layers(
        &self,
        data: &mut NavBuildData,
        tc: &TileConfig,
        tx: i32,
        ty: i32,
        compressor: &dyn TileCompressor,
    ) -> Result<Vec<CompressedLayer>> {
        let mut hf = Heightfield::new(
            tc.width,
            tc.height,
            tc.bmin,
            tc.bmax,
            self.config.cell_size,
            self.config.cell_height,
        )?;

        let areas = mark_walkable_triangles(
            self.config.agent_max_slope,
            &data.snapshot.vertices,
            &data.snapshot.indices,
        );
        rasterize_triangles(
            &mut hf,
            &data.snapshot.vertices,
            &data.snapshot.indices,
            &areas,
            tc.walkable_climb,
        )?;

        hf.filter_low_hanging_walkable_obstacles(tc.walkable_climb);
        hf.filter_ledge_spans(tc.walkable_height, tc.walkable_climb);
        hf.filter_walkable_low_height_spans(tc.walkable_height);

        if hf.span_count() == 0 {
            return Ok(Vec::new());
        }

        let mut chf = CompactHeightfield::build(
            &hf,
            tc.walkable_height,
            tc.walkable_climb,
            tc.border_size,
        )?;
        data.heightfield = Some(hf);

        chf.erode_walkable_area(tc.walkable_radius);

        for volume in &data.snapshot.area_volumes {
            chf.mark_box_area(&volume.bounds, volume.area);
        }

        match self.config.partition_type {
            PartitionType::Monotone => {
                build_regions_monotone(&mut chf, tc.border_size, tc.min_region_area)?
            }
            PartitionType::Watershed => {
                build_regions_watershed(&mut chf, tc.border_size, tc.min_region_area)?
            }
        }

        let layers = build_heightfield_layers(&chf, tc.border_size, tc.walkable_height)?;
        data.compact = Some(chf);

        let mut compressed = Vec::with_capacity(layers.len());
        for (tlayer, layer) in layers.iter().enumerate() {
            if layer.width > u8::MAX as i32 || layer.height > u8::MAX as i32 {
                return Err(Error::Build(format!(
                    "layer grid {}x{} exceeds storable size",
                    layer.width, layer.height
                )));
            }
            let header = TileLayerHeader {
                magic: LAYER_MAGIC,
                version: LAYER_VERSION,
                tx,
                ty,
                tlayer: tlayer as i32,
                bmin: layer.bmin,
                bmax: layer.bmax,
                hmin: layer.hmin.clamp(0, u16::MAX as i32) as u16,
                hmax: layer.hmax.clamp(0, u16::MAX as i32) as u16,
                width: layer.width as u8,
                height: layer.height as u8,
                minx: layer.minx as u8,
                maxx: layer.maxx as u8,
                miny: layer.miny as u8,
                maxy: layer.maxy as u8,
            };
            let payload = compressor.compress(&layer.grids.to_bytes())?;
            compressed.push(CompressedLayer { header, payload });
        }

        log::debug!(
            "built tile ({tx}, {ty}): {} layer(s), {} span(s)",
            compressed.len(),
            data.heightfield.as_ref().map_or(0, Heightfield::span_count),
        );
        Ok(compressed)
    }
}
