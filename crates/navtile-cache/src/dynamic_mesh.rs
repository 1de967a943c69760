//! Scene-level dynamic navigation mesh.
//!
//! Ties the tile builder, the compressed tile cache and the assembled
//! [`NavMesh`] together: full and partial rebuilds from a geometry source,
//! per-column tile streaming, whole tile set save/load, and the obstacle
//! API that feeds the cache's request queue.

use std::collections::{BTreeSet, HashMap};
use std::io::{Read, Write};

use glam::Vec3;
use navtile_common::{BoundingBox, Error, Lz4Compressor, Result};

use navtile_build::{GeometrySource, NavBuildConfig, TileBuilder};

use crate::cache::{ObstacleRef, ObstacleShape, TileCache, TileCacheParams};
use crate::events::{NavEvent, ObserverHandle, ObserverSet};
use crate::io::{read_layer_record, read_tile_set, write_layer_record, write_tile_set, TileSetHeader};
use crate::mesh::{NavMesh, NavMeshParams};
use crate::process::DefaultMeshProcess;

/// Attempts an obstacle submission makes before giving up.
const OBSTACLE_SUBMIT_RETRIES: usize = 8;

/// Identity of a scene obstacle, stable across rebuilds and reloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObstacleId(u64);

#[derive(Debug, Clone, Copy)]
struct SceneObstacle {
    shape: ObstacleShape,
    cache_ref: ObstacleRef,
}

struct Allocated {
    bounds: BoundingBox,
    tiles_x: i32,
    tiles_y: i32,
    cache: TileCache<DefaultMeshProcess>,
    mesh: NavMesh,
}

/// Navigation mesh that rebuilds tiles incrementally as obstacles come and
/// go. The assembled mesh is always derivable from the cached compressed
/// layers plus the live obstacle set.
pub struct DynamicNavMesh {
    config: NavBuildConfig,
    builder: TileBuilder,
    compressor: Lz4Compressor,
    state: Option<Allocated>,
    obstacles: HashMap<ObstacleId, SceneObstacle>,
    next_obstacle_id: u64,
    observers: ObserverSet,
}

impl std::fmt::Debug for DynamicNavMesh {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicNavMesh")
            .field("config", &self.config)
            .field("allocated", &self.state.is_some())
            .field("obstacles", &self.obstacles.len())
            .finish()
    }
}

impl DynamicNavMesh {
    /// Creates an unallocated dynamic mesh for the given configuration.
    pub fn new(config: NavBuildConfig) -> Result<Self> {
        let builder = TileBuilder::new(config.clone())?;
        Ok(Self {
            config,
            builder,
            compressor: Lz4Compressor,
            state: None,
            obstacles: HashMap::new(),
            next_obstacle_id: 1,
            observers: ObserverSet::new(),
        })
    }

    /// The build configuration.
    pub fn config(&self) -> &NavBuildConfig {
        &self.config
    }

    /// True once `allocate`, `build` or `load` has set up the tile grid.
    pub fn is_allocated(&self) -> bool {
        self.state.is_some()
    }

    /// Padded world bounds of the tile grid.
    pub fn bounds(&self) -> Option<BoundingBox> {
        self.state.as_ref().map(|s| s.bounds)
    }

    /// Tile grid dimensions `(tiles_x, tiles_y)`.
    pub fn num_tiles(&self) -> Option<(i32, i32)> {
        self.state.as_ref().map(|s| (s.tiles_x, s.tiles_y))
    }

    /// The assembled mesh, if allocated.
    pub fn nav_mesh(&self) -> Option<&NavMesh> {
        self.state.as_ref().map(|s| &s.mesh)
    }

    /// Registers an observer for [`NavEvent`] notifications.
    pub fn add_observer(&mut self, observer: Box<dyn FnMut(&NavEvent)>) -> ObserverHandle {
        self.observers.register(observer)
    }

    /// Unregisters an observer.
    pub fn remove_observer(&mut self, handle: ObserverHandle) {
        self.observers.unregister(handle);
    }

    /// Sets up an empty tile grid over `bounds` for streaming tiles in via
    /// `add_tile_data`. Registered obstacles are resubmitted against the
    /// new grid. Emits [`NavEvent::MeshRebuilt`].
    pub fn allocate(&mut self, bounds: &BoundingBox, max_tiles: i32) -> Result<()> {
        let padded = bounds.padded(self.config.padding);
        let mut state = self.make_state(&padded, max_tiles)?;
        self.resubmit_obstacles(&mut state);
        self.state = Some(state);
        self.observers.notify(&NavEvent::MeshRebuilt);
        Ok(())
    }

    /// Full rebuild from `source`: sizes the tile grid from the merged and
    /// padded geometry bounds, builds every tile, assembles the mesh and
    /// resubmits registered obstacles. Returns the number of tile columns
    /// that produced layers.
    pub fn build(&mut self, source: &dyn GeometrySource) -> Result<usize> {
        let everything = BoundingBox::new(Vec3::splat(f32::MIN), Vec3::splat(f32::MAX));
        let snapshot = source.collect(&everything);
        if snapshot.vertices.is_empty() {
            return Err(Error::InvalidParam(
                "geometry source produced no vertices".to_string(),
            ));
        }

        let mut bounds = BoundingBox::empty();
        for v in &snapshot.vertices {
            bounds.merge_point(*v);
        }
        let padded = bounds.padded(self.config.padding);

        let (tiles_x, tiles_y) = self.grid_dimensions(&padded);
        let max_tiles =
            (tiles_x as i64 * tiles_y as i64 * self.config.max_layers() as i64).min(0x10000) as i32;
        let mut state = self.make_state(&padded, max_tiles)?;
        state
            .cache
            .process_mut()
            .update_connections(snapshot.off_mesh_connections.clone());

        let mut built = Vec::new();
        for ty in 0..tiles_y {
            for tx in 0..tiles_x {
                let layers = self
                    .builder
                    .build_tile(source, &padded, tx, ty, &self.compressor)?;
                if layers.is_empty() {
                    continue;
                }
                for layer in layers {
                    state.cache.add_tile(layer)?;
                }
                state.cache.build_tiles_at(tx, ty, &mut state.mesh)?;
                built.push((tx, ty));
            }
        }
        while state.cache.update(0.0, &mut state.mesh)? {}
        self.resubmit_obstacles(&mut state);
        self.state = Some(state);

        for tile in &built {
            self.observers.notify(&NavEvent::TileAdded { tile: *tile });
        }
        self.observers.notify(&NavEvent::MeshRebuilt);
        log::info!(
            "built navigation mesh: {}x{} tile grid, {} column(s) covered",
            tiles_x,
            tiles_y,
            built.len()
        );
        Ok(built.len())
    }

    /// Rebuilds the tile columns overlapping `region` from `source`.
    /// Requires a prior full build or allocation. Emits
    /// [`NavEvent::AreaRebuilt`].
    pub fn build_region(
        &mut self,
        source: &dyn GeometrySource,
        region: &BoundingBox,
    ) -> Result<usize> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;

        let tile_edge = self.config.tile_edge_length();
        let origin = state.bounds.min;
        let tx0 = (((region.min.x - origin.x) / tile_edge).floor() as i32).clamp(0, state.tiles_x - 1);
        let tx1 = (((region.max.x - origin.x) / tile_edge).floor() as i32).clamp(0, state.tiles_x - 1);
        let ty0 = (((region.min.z - origin.z) / tile_edge).floor() as i32).clamp(0, state.tiles_y - 1);
        let ty1 = (((region.max.z - origin.z) / tile_edge).floor() as i32).clamp(0, state.tiles_y - 1);

        let bounds = state.bounds;
        // Off-mesh connections span tiles, so the refreshed list comes from
        // the whole grid bounds rather than the rebuilt region.
        let snapshot = source.collect(&bounds);
        state
            .cache
            .process_mut()
            .update_connections(snapshot.off_mesh_connections);

        let mut rebuilt = 0;
        for ty in ty0..=ty1 {
            for tx in tx0..=tx1 {
                clear_column(state, tx, ty)?;
                let layers = self
                    .builder
                    .build_tile(source, &bounds, tx, ty, &self.compressor)?;
                if layers.is_empty() {
                    continue;
                }
                for layer in layers {
                    state.cache.add_tile(layer)?;
                }
                state.cache.build_tiles_at(tx, ty, &mut state.mesh)?;
                rebuilt += 1;
            }
        }
        while state.cache.update(0.0, &mut state.mesh)? {}

        self.observers
            .notify(&NavEvent::AreaRebuilt { bounds: *region });
        Ok(rebuilt)
    }

    /// Serializes the stored layers of the column `(tx, ty)`. Columns with
    /// no layers yield an empty blob.
    pub fn tile_data(&self, tx: i32, ty: i32) -> Result<Vec<u8>> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;

        let mut data = Vec::new();
        for tile in state.cache.tiles_at(tx, ty) {
            if let Some(layer) = state.cache.tile_by_ref(tile) {
                write_layer_record(&mut data, layer)?;
            }
        }
        Ok(data)
    }

    /// Imports column blobs produced by `tile_data`, replacing any layers
    /// already stored at the same coordinates, and rebuilds the affected
    /// columns. Emits [`NavEvent::TileAdded`] per column.
    pub fn add_tile_data(&mut self, data: &[u8]) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;

        let mut reader = data;
        let mut touched = BTreeSet::new();
        while let Some(layer) = read_layer_record(&mut reader)? {
            let (tx, ty, tlayer) = (layer.header.tx, layer.header.ty, layer.header.tlayer);
            if let Some(existing) = state.cache.tile_ref_at(tx, ty, tlayer) {
                state.cache.remove_tile(existing)?;
                state.mesh.remove_tile(tx, ty, tlayer);
            }
            state.cache.add_tile(layer)?;
            touched.insert((tx, ty));
        }

        for &(tx, ty) in &touched {
            state.cache.build_tiles_at(tx, ty, &mut state.mesh)?;
            self.observers.notify(&NavEvent::TileAdded { tile: (tx, ty) });
        }
        Ok(())
    }

    /// Removes the column `(tx, ty)` from the cache and the mesh.
    pub fn remove_tile(&mut self, tx: i32, ty: i32) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;
        clear_column(state, tx, ty)
    }

    /// Removes every tile from the cache and the mesh.
    pub fn remove_all_tiles(&mut self) -> Result<()> {
        let state = self
            .state
            .as_mut()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;
        for ty in 0..state.tiles_y {
            for tx in 0..state.tiles_x {
                clear_column(state, tx, ty)?;
            }
        }
        state.mesh.remove_all_tiles();
        Ok(())
    }

    /// Writes the whole tile set to `writer`.
    pub fn save<W: Write>(&self, writer: &mut W) -> Result<()> {
        let state = self
            .state
            .as_ref()
            .ok_or_else(|| Error::InvalidParam("navigation mesh not built".to_string()))?;

        let header = TileSetHeader {
            bounds: state.bounds,
            tiles_x: state.tiles_x,
            tiles_y: state.tiles_y,
            mesh_params: state.mesh.params().clone(),
            cache_params: state.cache.params().clone(),
        };
        let mut layers = Vec::new();
        for ty in 0..state.tiles_y {
            for tx in 0..state.tiles_x {
                for tile in state.cache.tiles_at(tx, ty) {
                    if let Some(layer) = state.cache.tile_by_ref(tile) {
                        layers.push(layer.clone());
                    }
                }
            }
        }
        write_tile_set(writer, &header, &layers)
    }

    /// Loads a tile set written by `save`, replacing the current state only
    /// on success. Registered obstacles are resubmitted against the loaded
    /// grid. Emits [`NavEvent::MeshRebuilt`].
    pub fn load<R: Read>(&mut self, reader: &mut R) -> Result<()> {
        let (header, layers) = read_tile_set(reader)?;

        let mesh = NavMesh::new(header.mesh_params)?;
        let cache = TileCache::new(
            header.cache_params,
            Box::new(self.compressor),
            DefaultMeshProcess::new(),
        )?;
        let mut state = Allocated {
            bounds: header.bounds,
            tiles_x: header.tiles_x,
            tiles_y: header.tiles_y,
            cache,
            mesh,
        };

        let mut touched = BTreeSet::new();
        for layer in layers {
            touched.insert((layer.header.tx, layer.header.ty));
            state.cache.add_tile(layer)?;
        }
        for &(tx, ty) in &touched {
            state.cache.build_tiles_at(tx, ty, &mut state.mesh)?;
        }
        self.resubmit_obstacles(&mut state);
        self.state = Some(state);
        self.observers.notify(&NavEvent::MeshRebuilt);
        Ok(())
    }

    /// Drives one step of the incremental rebuild loop. Returns true while
    /// obstacle work remains. A no-op before allocation.
    pub fn update(&mut self, dt: f32) -> Result<bool> {
        match self.state.as_mut() {
            Some(state) => state.cache.update(dt, &mut state.mesh),
            None => Ok(false),
        }
    }

    /// Registers an obstacle and, if the mesh is allocated, submits it to
    /// the cache, driving `update` while the request queue is full. On
    /// submission failure the obstacle stays registered but absent from the
    /// mesh until the next rebuild.
    pub fn add_obstacle(&mut self, shape: ObstacleShape) -> ObstacleId {
        let id = ObstacleId(self.next_obstacle_id);
        self.next_obstacle_id += 1;

        let cache_ref = match self.state.as_mut() {
            Some(state) => submit_obstacle(state, shape),
            None => ObstacleRef::NULL,
        };
        self.obstacles.insert(id, SceneObstacle { shape, cache_ref });

        if !cache_ref.is_null() {
            self.observers.notify(&NavEvent::ObstacleAdded {
                obstacle: cache_ref,
                position: shape.position,
                radius: shape.radius,
                height: shape.height,
            });
        }
        id
    }

    /// Unregisters an obstacle. A removal the cache refuses is logged and
    /// treated as already gone.
    pub fn remove_obstacle(&mut self, id: ObstacleId) {
        let Some(obstacle) = self.obstacles.remove(&id) else {
            return;
        };
        if !obstacle.cache_ref.is_null() {
            if let Some(state) = self.state.as_mut() {
                withdraw_obstacle(state, obstacle.cache_ref);
            }
            self.observers.notify(&NavEvent::ObstacleRemoved {
                obstacle: obstacle.cache_ref,
                position: obstacle.shape.position,
                radius: obstacle.shape.radius,
                height: obstacle.shape.height,
            });
        }
    }

    /// Replaces an obstacle's shape as a remove-then-add. Between the two
    /// submissions the obstacle is briefly absent from the mesh.
    pub fn obstacle_changed(&mut self, id: ObstacleId, shape: ObstacleShape) {
        let Some(obstacle) = self.obstacles.get_mut(&id) else {
            return;
        };
        let old = *obstacle;
        obstacle.shape = shape;
        obstacle.cache_ref = ObstacleRef::NULL;

        if let Some(state) = self.state.as_mut() {
            if !old.cache_ref.is_null() {
                withdraw_obstacle(state, old.cache_ref);
            }
            let cache_ref = submit_obstacle(state, shape);
            if let Some(obstacle) = self.obstacles.get_mut(&id) {
                obstacle.cache_ref = cache_ref;
            }
            if !old.cache_ref.is_null() {
                self.observers.notify(&NavEvent::ObstacleRemoved {
                    obstacle: old.cache_ref,
                    position: old.shape.position,
                    radius: old.shape.radius,
                    height: old.shape.height,
                });
            }
            if !cache_ref.is_null() {
                self.observers.notify(&NavEvent::ObstacleAdded {
                    obstacle: cache_ref,
                    position: shape.position,
                    radius: shape.radius,
                    height: shape.height,
                });
            }
        }
    }

    /// The registered shape of an obstacle.
    pub fn obstacle(&self, id: ObstacleId) -> Option<&ObstacleShape> {
        self.obstacles.get(&id).map(|o| &o.shape)
    }

    /// Number of registered obstacles.
    pub fn obstacle_count(&self) -> usize {
        self.obstacles.len()
    }

    fn grid_dimensions(&self, padded: &BoundingBox) -> (i32, i32) {
        let (gw, gh) = navtile_common::calc_grid_size(padded.min, padded.max, self.config.cell_size);
        let ts = self.config.tile_size;
        (((gw + ts - 1) / ts).max(1), ((gh + ts - 1) / ts).max(1))
    }

    fn make_state(&self, padded: &BoundingBox, max_tiles: i32) -> Result<Allocated> {
        let (tiles_x, tiles_y) = self.grid_dimensions(padded);
        let tile_edge = self.config.tile_edge_length();

        let mesh = NavMesh::new(NavMeshParams {
            origin: padded.min,
            tile_width: tile_edge,
            tile_height: tile_edge,
            max_tiles,
        })?;

        let walkable_radius = (self.config.agent_radius / self.config.cell_size).ceil() as i32;
        let border_size = walkable_radius + 3;
        let cache = TileCache::new(
            TileCacheParams {
                origin: padded.min,
                cs: self.config.cell_size,
                ch: self.config.cell_height,
                width: self.config.tile_size + border_size * 2,
                height: self.config.tile_size + border_size * 2,
                max_tiles,
                max_layers: self.config.max_layers() as i32,
                max_obstacles: self.config.max_obstacles as i32,
            },
            Box::new(self.compressor),
            DefaultMeshProcess::new(),
        )?;

        Ok(Allocated {
            bounds: *padded,
            tiles_x,
            tiles_y,
            cache,
            mesh,
        })
    }

    fn resubmit_obstacles(&mut self, state: &mut Allocated) {
        let mut ids: Vec<ObstacleId> = self.obstacles.keys().copied().collect();
        ids.sort();
        for id in ids {
            if let Some(obstacle) = self.obstacles.get_mut(&id) {
                obstacle.cache_ref = submit_obstacle(state, obstacle.shape);
            }
        }
    }
}

/// Submits an obstacle, draining the update loop while the request queue
/// pushes back. Returns the null ref on failure.
fn submit_obstacle(state: &mut Allocated, shape: ObstacleShape) -> ObstacleRef {
    for _ in 0..OBSTACLE_SUBMIT_RETRIES {
        match state.cache.add_obstacle(shape) {
            Ok(cache_ref) => return cache_ref,
            Err(err) if err.is_retryable() => {
                if let Err(err) = state.cache.update(0.0, &mut state.mesh) {
                    log::warn!("update while submitting obstacle failed: {err}");
                    return ObstacleRef::NULL;
                }
            }
            Err(err) => {
                log::warn!("adding obstacle failed: {err}");
                return ObstacleRef::NULL;
            }
        }
    }
    log::warn!("obstacle request queue stayed full; obstacle left out of the mesh");
    ObstacleRef::NULL
}

/// Withdraws an obstacle with the same retry discipline; a failure is
/// logged and the obstacle treated as already gone.
fn withdraw_obstacle(state: &mut Allocated, cache_ref: ObstacleRef) {
    for _ in 0..OBSTACLE_SUBMIT_RETRIES {
        match state.cache.remove_obstacle(cache_ref) {
            Ok(()) => return,
            Err(err) if err.is_retryable() => {
                if let Err(err) = state.cache.update(0.0, &mut state.mesh) {
                    log::warn!("update while removing obstacle failed: {err}");
                    return;
                }
            }
            Err(err) => {
                log::warn!("removing obstacle failed: {err}");
                return;
            }
        }
    }
    log::warn!("obstacle request queue stayed full; removal dropped");
}

/// Removes every stored layer and mesh tile of one column.
fn clear_column(state: &mut Allocated, tx: i32, ty: i32) -> Result<()> {
    for tile in state.cache.tiles_at(tx, ty) {
        let layer = state.cache.remove_tile(tile)?;
        state.mesh.remove_tile(tx, ty, layer.header.tlayer);
    }
    Ok(())
}
