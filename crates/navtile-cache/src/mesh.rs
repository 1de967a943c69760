//! Assembled navigation mesh storage.
//!
//! The mesh is derived data: every tile in it can be rebuilt at any time
//! from the cache's compressed layers and the active obstacle set.

use std::collections::HashMap;

use glam::Vec3;
use navtile_common::{BoundingBox, Error, Result};

/// Poly flag set on every walkable polygon.
pub const POLY_FLAG_WALK: u16 = 0x01;

/// Parameters of the assembled mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshParams {
    /// World-space origin of tile (0, 0).
    pub origin: Vec3,
    /// Tile edge length along x in world units.
    pub tile_width: f32,
    /// Tile edge length along z in world units.
    pub tile_height: f32,
    /// Maximum number of tiles the mesh will hold.
    pub max_tiles: i32,
}

/// A convex polygon of an assembled tile.
#[derive(Debug, Clone)]
pub struct NavPoly {
    /// Indices into the tile's vertex array, counter-clockwise.
    pub verts: Vec<u16>,
    /// Neighbor polygon index plus one per edge; 0 = border edge.
    pub neis: Vec<u16>,
    /// Poly flags; `POLY_FLAG_WALK` marks traversable polygons.
    pub flags: u16,
    /// Area id the polygon was built from.
    pub area: u8,
}

/// An off-mesh connection attached to a tile.
#[derive(Debug, Clone)]
pub struct OffMeshLink {
    /// Start point in world space.
    pub start: Vec3,
    /// End point in world space.
    pub end: Vec3,
    /// Traversal radius.
    pub radius: f32,
    /// True if traversable in both directions.
    pub bidirectional: bool,
    /// Area id of the link.
    pub area: u8,
    /// Poly flags of the link.
    pub flags: u16,
}

/// One assembled mesh tile.
#[derive(Debug, Clone)]
pub struct MeshTile {
    /// Tile column x coordinate.
    pub tx: i32,
    /// Tile column z coordinate.
    pub ty: i32,
    /// Layer index within the column.
    pub layer: i32,
    /// Tile bounds in world space.
    pub bounds: BoundingBox,
    /// Vertex positions in world space.
    pub vertices: Vec<Vec3>,
    /// Polygons of the tile.
    pub polys: Vec<NavPoly>,
    /// Off-mesh connections starting in this tile.
    pub off_mesh_links: Vec<OffMeshLink>,
}

impl MeshTile {
    /// Index of the walkable polygon containing `pos` in the XZ plane.
    pub fn poly_at(&self, pos: Vec3) -> Option<usize> {
        self.polys.iter().position(|poly| {
            poly.flags & POLY_FLAG_WALK != 0 && self.poly_contains_xz(poly, pos)
        })
    }

    fn poly_contains_xz(&self, poly: &NavPoly, pos: Vec3) -> bool {
        // Point-in-polygon on the XZ plane, edge crossing count.
        let mut inside = false;
        let n = poly.verts.len();
        let mut j = n - 1;
        for i in 0..n {
            let vi = self.vertices[poly.verts[i] as usize];
            let vj = self.vertices[poly.verts[j] as usize];
            if (vi.z > pos.z) != (vj.z > pos.z)
                && pos.x < (vj.x - vi.x) * (pos.z - vi.z) / (vj.z - vi.z) + vi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// Tile-grid navigation mesh assembled from cached layers.
#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: HashMap<(i32, i32, i32), MeshTile>,
}

impl NavMesh {
    /// Creates an empty mesh.
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::Config("invalid tile dimensions".to_string()));
        }
        if params.max_tiles <= 0 {
            return Err(Error::Config("max tiles must be positive".to_string()));
        }
        Ok(Self {
            params,
            tiles: HashMap::new(),
        })
    }

    /// Mesh parameters.
    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    /// Installs a tile, replacing any previous tile at the same slot.
    pub fn add_tile(&mut self, tile: MeshTile) -> Result<()> {
        let key = (tile.tx, tile.ty, tile.layer);
        if !self.tiles.contains_key(&key) && self.tiles.len() >= self.params.max_tiles as usize {
            return Err(Error::Full(format!(
                "mesh tile capacity {} reached",
                self.params.max_tiles
            )));
        }
        self.tiles.insert(key, tile);
        Ok(())
    }

    /// Removes the tile at `(tx, ty, layer)` if present.
    pub fn remove_tile(&mut self, tx: i32, ty: i32, layer: i32) -> Option<MeshTile> {
        self.tiles.remove(&(tx, ty, layer))
    }

    /// Removes every tile.
    pub fn remove_all_tiles(&mut self) {
        self.tiles.clear();
    }

    /// Tile at `(tx, ty, layer)`.
    pub fn tile_at(&self, tx: i32, ty: i32, layer: i32) -> Option<&MeshTile> {
        self.tiles.get(&(tx, ty, layer))
    }

    /// All layers of the tile column `(tx, ty)`, bottom-up.
    pub fn tiles_at(&self, tx: i32, ty: i32) -> Vec<&MeshTile> {
        let mut tiles: Vec<&MeshTile> = self
            .tiles
            .values()
            .filter(|t| t.tx == tx && t.ty == ty)
            .collect();
        tiles.sort_by_key(|t| t.layer);
        tiles
    }

    /// Number of installed tiles.
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// Finds the walkable polygon under `pos`, searching the column the
    /// position falls into. Returns the tile key and polygon index.
    pub fn find_poly_at(&self, pos: Vec3) -> Option<((i32, i32, i32), usize)> {
        let tx = ((pos.x - self.params.origin.x) / self.params.tile_width).floor() as i32;
        let ty = ((pos.z - self.params.origin.z) / self.params.tile_height).floor() as i32;

        for tile in self.tiles_at(tx, ty) {
            if let Some(poly) = tile.poly_at(pos) {
                return Some(((tile.tx, tile.ty, tile.layer), poly));
            }
        }
        None
    }
}
