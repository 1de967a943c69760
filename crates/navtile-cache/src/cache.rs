//! Compressed tile layer storage with dynamic obstacle support.
//!
//! Obstacle changes are queued as requests and folded into the mesh
//! incrementally: each `update()` call drains pending requests into the
//! obstacle table and rebuilds at most one touched tile, so the cost of an
//! obstacle change is spread over several frames.

use std::collections::VecDeque;

use glam::Vec3;
use navtile_common::{
    BoundingBox, CompressedLayer, Error, LayerGrids, Result, TileCompressor,
};

use crate::alloc::LinearAllocator;
use crate::assembly::build_mesh_tile;
use crate::mesh::NavMesh;
use crate::process::MeshProcess;

/// Maximum number of queued obstacle requests between `update()` calls.
pub const MAX_OBSTACLE_REQUESTS: usize = 64;

/// Reference to a stored tile layer. Encodes a slot index and a salt so
/// references to freed slots never resolve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileRef(pub(crate) u32);

impl TileRef {
    /// The null reference; resolves to nothing.
    pub const NULL: TileRef = TileRef(0);

    /// True for the null reference.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Reference to a live obstacle, salted the same way as [`TileRef`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObstacleRef(pub(crate) u32);

impl ObstacleRef {
    /// The null reference; resolves to nothing.
    pub const NULL: ObstacleRef = ObstacleRef(0);

    /// True for the null reference.
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

/// Cylinder obstacle carved out of the walkable surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObstacleShape {
    /// Cylinder base center in world space.
    pub position: Vec3,
    /// Cylinder radius.
    pub radius: f32,
    /// Cylinder height above the base.
    pub height: f32,
}

impl ObstacleShape {
    /// World-space bounds of the cylinder.
    pub fn bounds(&self) -> BoundingBox {
        let r = Vec3::new(self.radius, 0.0, self.radius);
        BoundingBox::new(
            self.position - r,
            self.position + r + Vec3::new(0.0, self.height, 0.0),
        )
    }
}

/// Construction parameters for a [`TileCache`].
#[derive(Debug, Clone, PartialEq)]
pub struct TileCacheParams {
    /// World-space origin of tile (0, 0).
    pub origin: Vec3,
    /// Cell size in world units.
    pub cs: f32,
    /// Cell height in world units.
    pub ch: f32,
    /// Tile width in cells, including border.
    pub width: i32,
    /// Tile height (depth) in cells, including border.
    pub height: i32,
    /// Maximum number of stored tile layers.
    pub max_tiles: i32,
    /// Maximum number of layers per tile column.
    pub max_layers: i32,
    /// Maximum number of simultaneous obstacles.
    pub max_obstacles: i32,
}

impl TileCacheParams {
    fn validate(&self) -> Result<()> {
        if self.cs <= 0.0 || self.ch <= 0.0 {
            return Err(Error::Config("cell size and height must be positive".to_string()));
        }
        if self.width <= 0 || self.height <= 0 {
            return Err(Error::Config("tile dimensions must be positive".to_string()));
        }
        if self.max_tiles <= 0 || self.max_layers <= 0 {
            return Err(Error::Config("tile capacities must be positive".to_string()));
        }
        if self.max_obstacles <= 0 {
            return Err(Error::Config("max obstacles must be positive".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct TileSlot {
    salt: u16,
    layer: Option<CompressedLayer>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObstacleState {
    Empty,
    Processing,
    Processed,
    Removing,
}

#[derive(Debug)]
struct ObstacleSlot {
    salt: u16,
    state: ObstacleState,
    shape: ObstacleShape,
    touched: Vec<TileRef>,
    pending: Vec<TileRef>,
}

#[derive(Debug, Clone, Copy)]
enum ObstacleRequest {
    Add(ObstacleRef),
    Remove(ObstacleRef),
}

/// Store of compressed tile layers plus the obstacle machinery that carves
/// them into an assembled [`NavMesh`].
pub struct TileCache<P: MeshProcess> {
    params: TileCacheParams,
    compressor: Box<dyn TileCompressor>,
    process: P,
    tiles: Vec<TileSlot>,
    obstacles: Vec<ObstacleSlot>,
    requests: VecDeque<ObstacleRequest>,
    dirty: VecDeque<TileRef>,
    arena: LinearAllocator,
}

impl<P: MeshProcess> std::fmt::Debug for TileCache<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TileCache")
            .field("params", &self.params)
            .field("tile_count", &self.tile_count())
            .field("obstacle_count", &self.obstacle_count())
            .field("pending_requests", &self.requests.len())
            .finish()
    }
}

fn encode_ref(salt: u16, index: usize) -> u32 {
    ((salt as u32) << 16) | (index as u32 & 0xffff)
}

fn decode_ref(r: u32) -> (u16, usize) {
    ((r >> 16) as u16, (r & 0xffff) as usize)
}

fn advance_salt(salt: &mut u16) {
    *salt = salt.wrapping_add(1);
    if *salt == 0 {
        *salt = 1;
    }
}

impl<P: MeshProcess> TileCache<P> {
    /// Creates an empty cache.
    pub fn new(
        params: TileCacheParams,
        compressor: Box<dyn TileCompressor>,
        process: P,
    ) -> Result<Self> {
        params.validate()?;
        let tiles = (0..params.max_tiles)
            .map(|_| TileSlot {
                salt: 1,
                layer: None,
            })
            .collect();
        let obstacles = (0..params.max_obstacles)
            .map(|_| ObstacleSlot {
                salt: 1,
                state: ObstacleState::Empty,
                shape: ObstacleShape {
                    position: Vec3::ZERO,
                    radius: 0.0,
                    height: 0.0,
                },
                touched: Vec::new(),
                pending: Vec::new(),
            })
            .collect();
        let cell_count = (params.width * params.height) as usize;
        Ok(Self {
            params,
            compressor,
            process,
            tiles,
            obstacles,
            requests: VecDeque::new(),
            dirty: VecDeque::new(),
            arena: LinearAllocator::new(cell_count * 4),
        })
    }

    /// Cache parameters.
    pub fn params(&self) -> &TileCacheParams {
        &self.params
    }

    /// The mesh process hook.
    pub fn process(&self) -> &P {
        &self.process
    }

    /// Mutable access to the mesh process hook.
    pub fn process_mut(&mut self) -> &mut P {
        &mut self.process
    }

    /// Number of stored tile layers.
    pub fn tile_count(&self) -> usize {
        self.tiles.iter().filter(|s| s.layer.is_some()).count()
    }

    /// Number of live obstacles.
    pub fn obstacle_count(&self) -> usize {
        self.obstacles
            .iter()
            .filter(|s| s.state != ObstacleState::Empty)
            .count()
    }

    /// True when no more obstacle requests can be queued before `update()`
    /// drains the queue.
    pub fn is_request_queue_full(&self) -> bool {
        self.requests.len() >= MAX_OBSTACLE_REQUESTS
    }

    /// Stores a compressed layer, returning its reference.
    ///
    /// Fails with [`Error::Full`] when the slot for this column and layer is
    /// already occupied, the column already holds `max_layers` layers, or
    /// all tile slots are taken. The stored set is never modified on
    /// failure.
    pub fn add_tile(&mut self, layer: CompressedLayer) -> Result<TileRef> {
        layer.header.validate()?;
        let (tx, ty, tlayer) = (layer.header.tx, layer.header.ty, layer.header.tlayer);

        let mut column_layers = 0;
        for slot in &self.tiles {
            if let Some(stored) = &slot.layer {
                if stored.header.tx == tx && stored.header.ty == ty {
                    if stored.header.tlayer == tlayer {
                        return Err(Error::Full(format!(
                            "tile ({tx}, {ty}) layer {tlayer} already stored"
                        )));
                    }
                    column_layers += 1;
                }
            }
        }
        if column_layers >= self.params.max_layers {
            return Err(Error::Full(format!(
                "tile ({tx}, {ty}) already holds {column_layers} layers"
            )));
        }

        let index = self
            .tiles
            .iter()
            .position(|s| s.layer.is_none())
            .ok_or_else(|| {
                Error::Full(format!("tile capacity {} reached", self.params.max_tiles))
            })?;
        self.tiles[index].layer = Some(layer);
        Ok(TileRef(encode_ref(self.tiles[index].salt, index)))
    }

    /// Removes a stored layer, returning its data. The reference is dead
    /// afterwards.
    pub fn remove_tile(&mut self, tile: TileRef) -> Result<CompressedLayer> {
        let index = self.resolve_tile(tile)?;
        let layer = self.tiles[index]
            .layer
            .take()
            .ok_or_else(|| Error::NotFound(format!("tile ref {:#x}", tile.0)))?;
        advance_salt(&mut self.tiles[index].salt);
        self.dirty.retain(|d| *d != tile);
        for slot in &mut self.obstacles {
            slot.touched.retain(|t| *t != tile);
            slot.pending.retain(|t| *t != tile);
        }
        Ok(layer)
    }

    /// The stored layer behind a reference, if still live.
    pub fn tile_by_ref(&self, tile: TileRef) -> Option<&CompressedLayer> {
        let (salt, index) = decode_ref(tile.0);
        let slot = self.tiles.get(index)?;
        if slot.salt != salt {
            return None;
        }
        slot.layer.as_ref()
    }

    /// References of all layers stored for the column `(tx, ty)`.
    pub fn tiles_at(&self, tx: i32, ty: i32) -> Vec<TileRef> {
        let mut refs: Vec<(i32, TileRef)> = self
            .tiles
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let layer = slot.layer.as_ref()?;
                if layer.header.tx == tx && layer.header.ty == ty {
                    Some((layer.header.tlayer, TileRef(encode_ref(slot.salt, i))))
                } else {
                    None
                }
            })
            .collect();
        refs.sort_by_key(|(tlayer, _)| *tlayer);
        refs.into_iter().map(|(_, r)| r).collect()
    }

    /// Reference of the layer at `(tx, ty, tlayer)`, if stored.
    pub fn tile_ref_at(&self, tx: i32, ty: i32, tlayer: i32) -> Option<TileRef> {
        self.tiles.iter().enumerate().find_map(|(i, slot)| {
            let layer = slot.layer.as_ref()?;
            if layer.header.tx == tx && layer.header.ty == ty && layer.header.tlayer == tlayer {
                Some(TileRef(encode_ref(slot.salt, i)))
            } else {
                None
            }
        })
    }

    /// The shape of a live obstacle.
    pub fn obstacle(&self, obstacle: ObstacleRef) -> Option<&ObstacleShape> {
        let (salt, index) = decode_ref(obstacle.0);
        let slot = self.obstacles.get(index)?;
        if slot.salt != salt || slot.state == ObstacleState::Empty {
            return None;
        }
        Some(&slot.shape)
    }

    /// Queues an obstacle for addition.
    ///
    /// Fails with [`Error::Busy`] when the request queue is full; drive
    /// `update()` and retry. Fails with [`Error::Full`] when every obstacle
    /// slot is live.
    pub fn add_obstacle(&mut self, shape: ObstacleShape) -> Result<ObstacleRef> {
        if self.is_request_queue_full() {
            return Err(Error::Busy);
        }
        let index = self
            .obstacles
            .iter()
            .position(|s| s.state == ObstacleState::Empty)
            .ok_or_else(|| {
                Error::Full(format!(
                    "obstacle capacity {} reached",
                    self.params.max_obstacles
                ))
            })?;
        let slot = &mut self.obstacles[index];
        slot.state = ObstacleState::Processing;
        slot.shape = shape;
        slot.touched.clear();
        slot.pending.clear();
        let obstacle = ObstacleRef(encode_ref(slot.salt, index));
        self.requests.push_back(ObstacleRequest::Add(obstacle));
        Ok(obstacle)
    }

    /// Queues an obstacle for removal.
    ///
    /// Fails with [`Error::Busy`] when the request queue is full and with
    /// [`Error::NotFound`] when the reference is stale.
    pub fn remove_obstacle(&mut self, obstacle: ObstacleRef) -> Result<()> {
        if self.is_request_queue_full() {
            return Err(Error::Busy);
        }
        self.resolve_obstacle(obstacle)?;
        self.requests.push_back(ObstacleRequest::Remove(obstacle));
        Ok(())
    }

    /// Drains pending obstacle requests and rebuilds at most one touched
    /// tile in `mesh`. Returns true while more touched tiles remain, so
    /// callers keep pumping until it settles.
    pub fn update(&mut self, _dt: f32, mesh: &mut NavMesh) -> Result<bool> {
        while let Some(request) = self.requests.pop_front() {
            match request {
                ObstacleRequest::Add(obstacle) => self.begin_add(obstacle),
                ObstacleRequest::Remove(obstacle) => self.begin_remove(obstacle),
            }
        }

        if let Some(tile) = self.dirty.pop_front() {
            self.build_tile(tile, mesh)?;
            self.finish_tile(tile);
        }

        Ok(!self.dirty.is_empty())
    }

    /// Rebuilds every stored layer of the column `(tx, ty)` into `mesh`.
    pub fn build_tiles_at(&mut self, tx: i32, ty: i32, mesh: &mut NavMesh) -> Result<()> {
        for tile in self.tiles_at(tx, ty) {
            self.build_tile(tile, mesh)?;
        }
        Ok(())
    }

    fn begin_add(&mut self, obstacle: ObstacleRef) {
        let (salt, index) = decode_ref(obstacle.0);
        let bounds = {
            let slot = &self.obstacles[index];
            if slot.salt != salt || slot.state != ObstacleState::Processing {
                return;
            }
            slot.shape.bounds()
        };
        let touched = self.touched_tiles(&bounds);
        let slot = &mut self.obstacles[index];
        slot.touched = touched.clone();
        slot.pending = touched.clone();
        if slot.pending.is_empty() {
            slot.state = ObstacleState::Processed;
        }
        self.mark_dirty(&touched);
    }

    fn begin_remove(&mut self, obstacle: ObstacleRef) {
        let (salt, index) = decode_ref(obstacle.0);
        let touched = {
            let slot = &mut self.obstacles[index];
            if slot.salt != salt || slot.state == ObstacleState::Empty {
                return;
            }
            slot.state = ObstacleState::Removing;
            slot.pending = slot.touched.clone();
            slot.touched.clone()
        };
        if touched.is_empty() {
            self.free_obstacle(index);
        }
        self.mark_dirty(&touched);
    }

    fn free_obstacle(&mut self, index: usize) {
        let slot = &mut self.obstacles[index];
        slot.state = ObstacleState::Empty;
        slot.touched.clear();
        slot.pending.clear();
        advance_salt(&mut slot.salt);
    }

    fn mark_dirty(&mut self, tiles: &[TileRef]) {
        for tile in tiles {
            if !self.dirty.contains(tile) {
                self.dirty.push_back(*tile);
            }
        }
    }

    fn touched_tiles(&self, bounds: &BoundingBox) -> Vec<TileRef> {
        self.tiles
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                let layer = slot.layer.as_ref()?;
                let tile_bounds = BoundingBox::new(layer.header.bmin, layer.header.bmax);
                if tile_bounds.intersects(bounds) {
                    Some(TileRef(encode_ref(slot.salt, i)))
                } else {
                    None
                }
            })
            .collect()
    }

    fn finish_tile(&mut self, tile: TileRef) {
        let mut to_free = Vec::new();
        for (index, slot) in self.obstacles.iter_mut().enumerate() {
            if slot.state == ObstacleState::Empty {
                continue;
            }
            slot.pending.retain(|t| *t != tile);
            if slot.pending.is_empty() {
                match slot.state {
                    ObstacleState::Processing => slot.state = ObstacleState::Processed,
                    ObstacleState::Removing => to_free.push(index),
                    _ => {}
                }
            }
        }
        for index in to_free {
            self.free_obstacle(index);
        }
    }

    /// Rebuilds one stored layer into `mesh`, carving every live obstacle
    /// that touches it. A layer that fails to decompress is removed from
    /// the mesh and logged rather than aborting the update loop.
    fn build_tile(&mut self, tile: TileRef, mesh: &mut NavMesh) -> Result<()> {
        let index = self.resolve_tile(tile)?;
        let (header, payload) = match &self.tiles[index].layer {
            Some(layer) => (layer.header.clone(), layer.payload.clone()),
            None => return Err(Error::NotFound(format!("tile ref {:#x}", tile.0))),
        };

        let cell_count = header.width as usize * header.height as usize;
        let mut grids = match self
            .compressor
            .decompress(&payload)
            .and_then(|raw| LayerGrids::from_bytes(&raw, cell_count))
        {
            Ok(grids) => grids,
            Err(err) => {
                log::error!(
                    "dropping tile ({}, {}) layer {}: {err}",
                    header.tx,
                    header.ty,
                    header.tlayer
                );
                mesh.remove_tile(header.tx, header.ty, header.tlayer);
                return Ok(());
            }
        };

        let shapes: Vec<ObstacleShape> = self
            .obstacles
            .iter()
            .filter(|slot| {
                matches!(
                    slot.state,
                    ObstacleState::Processing | ObstacleState::Processed
                ) && slot.touched.contains(&tile)
            })
            .map(|slot| slot.shape)
            .collect();

        self.arena.resize(cell_count * 4);
        let assembled = build_mesh_tile(
            &header,
            &mut grids,
            &shapes,
            self.params.cs,
            self.params.ch,
            &mut self.arena,
            &mut self.process,
        )?;
        mesh.add_tile(assembled)?;
        Ok(())
    }

    fn resolve_tile(&self, tile: TileRef) -> Result<usize> {
        let (salt, index) = decode_ref(tile.0);
        match self.tiles.get(index) {
            Some(slot) if slot.salt == salt && slot.layer.is_some() => Ok(index),
            _ => Err(Error::NotFound(format!("tile ref {:#x}", tile.0))),
        }
    }

    fn resolve_obstacle(&self, obstacle: ObstacleRef) -> Result<usize> {
        let (salt, index) = decode_ref(obstacle.0);
        match self.obstacles.get(index) {
            Some(slot) if slot.salt == salt && slot.state != ObstacleState::Empty => Ok(index),
            _ => Err(Error::NotFound(format!("obstacle ref {:#x}", obstacle.0))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::NavMeshParams;
    use crate::process::DefaultMeshProcess;
    use navtile_common::{
        Lz4Compressor, TileLayerHeader, LAYER_MAGIC, LAYER_VERSION, WALKABLE_AREA,
    };

    const SIDE: usize = 8;

    fn params() -> TileCacheParams {
        TileCacheParams {
            origin: Vec3::ZERO,
            cs: 1.0,
            ch: 0.5,
            width: SIDE as i32,
            height: SIDE as i32,
            max_tiles: 8,
            max_layers: 2,
            max_obstacles: 4,
        }
    }

    fn cache() -> TileCache<DefaultMeshProcess> {
        TileCache::new(params(), Box::new(Lz4Compressor), DefaultMeshProcess::new()).unwrap()
    }

    fn flat_layer(tx: i32, ty: i32, tlayer: i32) -> CompressedLayer {
        let origin = Vec3::new(tx as f32 * SIDE as f32, 0.0, ty as f32 * SIDE as f32);
        let header = TileLayerHeader {
            magic: LAYER_MAGIC,
            version: LAYER_VERSION,
            tx,
            ty,
            tlayer,
            bmin: origin,
            bmax: origin + Vec3::new(SIDE as f32, 2.0, SIDE as f32),
            hmin: 0,
            hmax: 4,
            width: SIDE as u8,
            height: SIDE as u8,
            minx: 0,
            maxx: SIDE as u8 - 1,
            miny: 0,
            maxy: SIDE as u8 - 1,
        };
        let mut grids = LayerGrids::new(SIDE * SIDE);
        for z in 0..SIDE {
            for x in 0..SIDE {
                let idx = x + z * SIDE;
                grids.heights[idx] = 1;
                grids.areas[idx] = WALKABLE_AREA;
                let mut con = 0u8;
                if x > 0 {
                    con |= 1;
                }
                if z + 1 < SIDE {
                    con |= 1 << 1;
                }
                if x + 1 < SIDE {
                    con |= 1 << 2;
                }
                if z > 0 {
                    con |= 1 << 3;
                }
                grids.cons[idx] = con;
            }
        }
        let payload = Lz4Compressor.compress(&grids.to_bytes()).unwrap();
        CompressedLayer { header, payload }
    }

    fn mesh() -> NavMesh {
        NavMesh::new(NavMeshParams {
            origin: Vec3::ZERO,
            tile_width: SIDE as f32,
            tile_height: SIDE as f32,
            max_tiles: 8,
        })
        .unwrap()
    }

    fn settle(cache: &mut TileCache<DefaultMeshProcess>, mesh: &mut NavMesh) {
        for _ in 0..64 {
            if !cache.update(0.0, mesh).unwrap() {
                return;
            }
        }
        panic!("update loop did not settle");
    }

    #[test]
    fn test_add_remove_tile_refs() {
        let mut cache = cache();
        let tile = cache.add_tile(flat_layer(0, 0, 0)).unwrap();
        assert!(!tile.is_null());
        assert_eq!(cache.tile_count(), 1);
        assert_eq!(cache.tile_ref_at(0, 0, 0), Some(tile));

        let layer = cache.remove_tile(tile).unwrap();
        assert_eq!(layer.header.tx, 0);
        assert_eq!(cache.tile_count(), 0);
        // The old reference is dead even after the slot is reused.
        let again = cache.add_tile(flat_layer(0, 0, 0)).unwrap();
        assert_ne!(again, tile);
        assert!(cache.tile_by_ref(tile).is_none());
        assert!(cache.remove_tile(tile).is_err());
    }

    #[test]
    fn test_layer_limit_per_column() {
        let mut cache = cache();
        cache.add_tile(flat_layer(0, 0, 0)).unwrap();
        cache.add_tile(flat_layer(0, 0, 1)).unwrap();
        // Third layer of the same column exceeds max_layers 2.
        assert!(matches!(
            cache.add_tile(flat_layer(0, 0, 2)),
            Err(Error::Full(_))
        ));
        // Occupied slot is rejected without touching the stored layer.
        assert!(matches!(
            cache.add_tile(flat_layer(0, 0, 0)),
            Err(Error::Full(_))
        ));
        assert_eq!(cache.tile_count(), 2);
        // Other columns are unaffected.
        cache.add_tile(flat_layer(1, 0, 0)).unwrap();
    }

    #[test]
    fn test_obstacle_carve_and_restore() {
        let mut cache = cache();
        let mut mesh = mesh();

        cache.add_tile(flat_layer(0, 0, 0)).unwrap();
        cache.build_tiles_at(0, 0, &mut mesh).unwrap();
        let center = Vec3::new(4.0, 0.5, 4.0);
        assert!(mesh.find_poly_at(center).is_some());

        let obstacle = cache
            .add_obstacle(ObstacleShape {
                position: Vec3::new(4.0, 0.0, 4.0),
                radius: 1.2,
                height: 2.0,
            })
            .unwrap();
        settle(&mut cache, &mut mesh);
        assert!(mesh.find_poly_at(center).is_none());
        assert!(cache.obstacle(obstacle).is_some());

        cache.remove_obstacle(obstacle).unwrap();
        settle(&mut cache, &mut mesh);
        assert!(mesh.find_poly_at(center).is_some());
        assert!(cache.obstacle(obstacle).is_none());
        assert_eq!(cache.obstacle_count(), 0);
    }

    #[test]
    fn test_update_rebuilds_one_tile_per_call() {
        let mut cache = cache();
        let mut mesh = mesh();

        cache.add_tile(flat_layer(0, 0, 0)).unwrap();
        cache.add_tile(flat_layer(1, 0, 0)).unwrap();
        cache.build_tiles_at(0, 0, &mut mesh).unwrap();
        cache.build_tiles_at(1, 0, &mut mesh).unwrap();

        // An obstacle straddling the tile boundary touches both tiles.
        cache
            .add_obstacle(ObstacleShape {
                position: Vec3::new(8.0, 0.0, 4.0),
                radius: 1.5,
                height: 2.0,
            })
            .unwrap();

        // First call rebuilds one tile and reports work remaining.
        assert!(cache.update(0.0, &mut mesh).unwrap());
        assert!(!cache.update(0.0, &mut mesh).unwrap());
        assert!(mesh.find_poly_at(Vec3::new(7.5, 0.5, 4.0)).is_none());
        assert!(mesh.find_poly_at(Vec3::new(8.5, 0.5, 4.0)).is_none());
    }

    #[test]
    fn test_request_queue_backpressure() {
        let mut cache = TileCache::new(
            TileCacheParams {
                max_obstacles: MAX_OBSTACLE_REQUESTS as i32 + 8,
                ..params()
            },
            Box::new(Lz4Compressor),
            DefaultMeshProcess::new(),
        )
        .unwrap();

        let shape = ObstacleShape {
            position: Vec3::new(100.0, 0.0, 100.0),
            radius: 0.5,
            height: 1.0,
        };
        for _ in 0..MAX_OBSTACLE_REQUESTS {
            cache.add_obstacle(shape).unwrap();
        }
        let err = cache.add_obstacle(shape).unwrap_err();
        assert!(matches!(err, Error::Busy));
        assert!(err.is_retryable());
        assert!(cache.is_request_queue_full());

        // Draining the queue makes room again.
        let mut mesh = mesh();
        cache.update(0.0, &mut mesh).unwrap();
        assert!(!cache.is_request_queue_full());
        cache.add_obstacle(shape).unwrap();
    }

    #[test]
    fn test_corrupt_payload_drops_tile_without_aborting() {
        let mut cache = cache();
        let mut mesh = mesh();

        let mut layer = flat_layer(0, 0, 0);
        layer.payload = vec![0xff, 0xff, 0xff, 0x7f, 1, 2, 3];
        cache.add_tile(layer).unwrap();
        cache.add_tile(flat_layer(1, 0, 0)).unwrap();

        cache.build_tiles_at(0, 0, &mut mesh).unwrap();
        cache.build_tiles_at(1, 0, &mut mesh).unwrap();
        assert!(mesh.tile_at(0, 0, 0).is_none());
        assert!(mesh.tile_at(1, 0, 0).is_some());
    }
}
