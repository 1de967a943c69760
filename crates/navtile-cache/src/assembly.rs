//! Mesh tile assembly from decompressed layer grids.
//!
//! Works on a decompressed copy of the stored layer: active obstacles are
//! carved into the copy's area grid, the remaining walkable cells are
//! partitioned into climb-connected regions with a monotone sweep, and each
//! region is decomposed into axis-aligned rectangles that become convex
//! quad polygons.

use std::collections::HashMap;

use glam::Vec3;
use navtile_common::{
    BoundingBox, Error, LayerGrids, Result, TileLayerHeader, LAYER_EMPTY_HEIGHT, NULL_AREA,
};

use crate::alloc::LinearAllocator;
use crate::cache::ObstacleShape;
use crate::mesh::{MeshTile, NavPoly};
use crate::process::{MeshProcess, TileProcessContext};

/// Assembles a mesh tile from a decompressed layer.
///
/// `grids` is the caller's decompressed copy; obstacle carving mutates it
/// and never touches the compressed layer it came from.
pub fn build_mesh_tile(
    header: &TileLayerHeader,
    grids: &mut LayerGrids,
    obstacles: &[ObstacleShape],
    cs: f32,
    ch: f32,
    arena: &mut LinearAllocator,
    process: &mut dyn MeshProcess,
) -> Result<MeshTile> {
    let w = header.width as i32;
    let h = header.height as i32;
    let cell_count = (w * h) as usize;
    if grids.heights.len() != cell_count {
        return Err(Error::Parse(format!(
            "layer grids hold {} cells, header says {cell_count}",
            grids.heights.len()
        )));
    }

    for obstacle in obstacles {
        carve_cylinder(header, grids, cs, ch, obstacle);
    }

    arena.reset();
    let scratch = arena.alloc(cell_count * 4)?;
    let (reg_buf, poly_buf) = arena.slice_mut(scratch).split_at_mut(cell_count * 2);

    let region_count = partition_layer_regions(grids, w, h, reg_buf)?;

    let mut tile = MeshTile {
        tx: header.tx,
        ty: header.ty,
        layer: header.tlayer,
        bounds: BoundingBox::new(header.bmin, header.bmax),
        vertices: Vec::new(),
        polys: Vec::new(),
        off_mesh_links: Vec::new(),
    };

    if region_count > 0 {
        decompose_rectangles(header, grids, w, h, cs, ch, reg_buf, poly_buf, &mut tile)?;
    }

    let mut ctx = TileProcessContext {
        tile_bounds: tile.bounds,
        polys: &mut tile.polys,
        off_mesh_links: &mut tile.off_mesh_links,
    };
    process.process(&mut ctx);

    Ok(tile)
}

/// Clears the area of every cell inside the obstacle cylinder.
fn carve_cylinder(
    header: &TileLayerHeader,
    grids: &mut LayerGrids,
    cs: f32,
    ch: f32,
    obstacle: &ObstacleShape,
) {
    let w = header.width as i32;
    let h = header.height as i32;
    let pos = obstacle.position;
    let radius = obstacle.radius;

    let x0 = (((pos.x - radius - header.bmin.x) / cs).floor() as i32).max(0);
    let x1 = (((pos.x + radius - header.bmin.x) / cs).floor() as i32).min(w - 1);
    let z0 = (((pos.z - radius - header.bmin.z) / cs).floor() as i32).max(0);
    let z1 = (((pos.z + radius - header.bmin.z) / cs).floor() as i32).min(h - 1);
    if x0 > x1 || z0 > z1 {
        return;
    }

    let y0 = ((pos.y - header.bmin.y) / ch).floor() as i32;
    let y1 = ((pos.y + obstacle.height - header.bmin.y) / ch).floor() as i32;
    let r2 = radius * radius;

    for z in z0..=z1 {
        for x in x0..=x1 {
            let dx = header.bmin.x + (x as f32 + 0.5) * cs - pos.x;
            let dz = header.bmin.z + (z as f32 + 0.5) * cs - pos.z;
            if dx * dx + dz * dz > r2 {
                continue;
            }
            let idx = (x + z * w) as usize;
            let y = grids.heights[idx];
            if y == LAYER_EMPTY_HEIGHT {
                continue;
            }
            if (y as i32) >= y0 && (y as i32) <= y1 {
                grids.areas[idx] = NULL_AREA;
            }
        }
    }
}

/// Monotone sweep partitioning of walkable layer cells. Region ids are
/// written into `reg_buf` as little-endian u16 per cell; 0 = no region.
///
/// While a row is being processed its cells hold row-local sweep ids; the
/// remap at the end of the row replaces them with final region ids, so
/// previous rows always carry final ids.
fn partition_layer_regions(
    grids: &LayerGrids,
    w: i32,
    h: i32,
    reg_buf: &mut [u8],
) -> Result<u16> {
    struct Sweep {
        id: u16,
        nei: u16,
        ns: u16,
    }

    const NULL_NEI: u16 = u16::MAX;

    let walkable = |idx: usize| {
        grids.areas[idx] != NULL_AREA && grids.heights[idx] != LAYER_EMPTY_HEIGHT
    };
    let connected = |idx: usize, dir: usize| grids.cons[idx] & (1 << dir) != 0;

    let mut region_id: u16 = 1;
    let mut prev_counts: Vec<u16> = Vec::new();

    for z in 0..h {
        let mut sweeps: Vec<Sweep> = Vec::new();
        prev_counts.clear();
        prev_counts.resize(region_id as usize, 0);

        for x in 0..w {
            let idx = (x + z * w) as usize;
            if !walkable(idx) {
                continue;
            }

            // Continue the -x neighbor's sweep when walk-connected and the
            // area matches.
            let mut sid = 0u16;
            if x > 0 && connected(idx, 0) {
                let widx = idx - 1;
                if walkable(widx)
                    && grids.areas[widx] == grids.areas[idx]
                    && get_u16(reg_buf, widx) != 0
                {
                    sid = get_u16(reg_buf, widx);
                }
            }
            if sid == 0 {
                sweeps.push(Sweep {
                    id: 0,
                    nei: 0,
                    ns: 0,
                });
                sid = sweeps.len() as u16;
            }

            // Remember the previous row's region this sweep touches; more
            // than one distinct neighbor invalidates the merge.
            if z > 0 && connected(idx, 3) {
                let sidx = idx - w as usize;
                let nr = get_u16(reg_buf, sidx);
                if nr != 0 && walkable(sidx) && grids.areas[sidx] == grids.areas[idx] {
                    let sweep = &mut sweeps[sid as usize - 1];
                    if sweep.nei == 0 || sweep.nei == nr {
                        sweep.nei = nr;
                        sweep.ns += 1;
                        prev_counts[nr as usize] += 1;
                    } else {
                        sweep.nei = NULL_NEI;
                    }
                }
            }

            set_u16(reg_buf, idx, sid);
        }

        // A sweep joins its previous-row region only as a sole successor.
        for sweep in &mut sweeps {
            if sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev_counts[sweep.nei as usize] == sweep.ns
            {
                sweep.id = sweep.nei;
            } else {
                if region_id == u16::MAX {
                    return Err(Error::Full("too many layer regions".to_string()));
                }
                sweep.id = region_id;
                region_id += 1;
            }
        }

        for x in 0..w {
            let idx = (x + z * w) as usize;
            let r = get_u16(reg_buf, idx);
            if r != 0 {
                set_u16(reg_buf, idx, sweeps[r as usize - 1].id);
            }
        }
    }

    Ok(region_id - 1)
}

/// Greedy decomposition of each region into axis-aligned rectangles,
/// emitted as quad polygons with shared-edge adjacency.
#[allow(clippy::too_many_arguments)]
fn decompose_rectangles(
    header: &TileLayerHeader,
    grids: &LayerGrids,
    w: i32,
    h: i32,
    cs: f32,
    ch: f32,
    reg_buf: &[u8],
    poly_buf: &mut [u8],
    tile: &mut MeshTile,
) -> Result<()> {
    struct Rect {
        x0: i32,
        x1: i32,
        z0: i32,
        z1: i32,
        area: u8,
    }

    let region_at = |x: i32, z: i32| get_u16(reg_buf, (x + z * w) as usize);
    let mut rects: Vec<Rect> = Vec::new();

    for z in 0..h {
        for x in 0..w {
            let idx = (x + z * w) as usize;
            let region = get_u16(reg_buf, idx);
            if region == 0 || get_u16(poly_buf, idx) != 0 {
                continue;
            }

            // Grow east, then grow the whole strip south.
            let mut x1 = x;
            while x1 + 1 < w
                && region_at(x1 + 1, z) == region
                && get_u16(poly_buf, (x1 + 1 + z * w) as usize) == 0
            {
                x1 += 1;
            }
            let mut z1 = z;
            'grow: while z1 + 1 < h {
                for cx in x..=x1 {
                    let cidx = (cx + (z1 + 1) * w) as usize;
                    if get_u16(reg_buf, cidx) != region || get_u16(poly_buf, cidx) != 0 {
                        break 'grow;
                    }
                }
                z1 += 1;
            }

            if rects.len() + 1 > u16::MAX as usize {
                return Err(Error::Full("too many polygons in tile".to_string()));
            }
            let poly_id = rects.len() as u16 + 1;
            for cz in z..=z1 {
                for cx in x..=x1 {
                    set_u16(poly_buf, (cx + cz * w) as usize, poly_id);
                }
            }
            rects.push(Rect {
                x0: x,
                x1,
                z0: z,
                z1,
                area: grids.areas[idx],
            });
        }
    }

    // Emit quads with deduplicated corner vertices. Corner heights come
    // from the covered cell next to the corner.
    let mut vertex_lookup: HashMap<(i32, i32), u16> = HashMap::new();
    let mut vertex_for = |gx: i32, gz: i32, cell_x: i32, cell_z: i32, tile: &mut MeshTile| {
        *vertex_lookup.entry((gx, gz)).or_insert_with(|| {
            let height = grids.heights[(cell_x + cell_z * w) as usize];
            let y = if height == LAYER_EMPTY_HEIGHT {
                header.bmin.y
            } else {
                header.bmin.y + height as f32 * ch
            };
            tile.vertices.push(Vec3::new(
                header.bmin.x + gx as f32 * cs,
                y,
                header.bmin.z + gz as f32 * cs,
            ));
            (tile.vertices.len() - 1) as u16
        })
    };

    let poly_at = |x: i32, z: i32| -> u16 {
        if x < 0 || z < 0 || x >= w || z >= h {
            0
        } else {
            get_u16(poly_buf, (x + z * w) as usize)
        }
    };

    for (i, rect) in rects.iter().enumerate() {
        let v0 = vertex_for(rect.x0, rect.z0, rect.x0, rect.z0, tile);
        let v1 = vertex_for(rect.x0, rect.z1 + 1, rect.x0, rect.z1, tile);
        let v2 = vertex_for(rect.x1 + 1, rect.z1 + 1, rect.x1, rect.z1, tile);
        let v3 = vertex_for(rect.x1 + 1, rect.z0, rect.x1, rect.z0, tile);

        // Edge midpoints sample the neighboring polygon; edge order is
        // west, north, east, south to match the vertex loop.
        let mid_z = (rect.z0 + rect.z1) / 2;
        let mid_x = (rect.x0 + rect.x1) / 2;
        let own = (i + 1) as u16;
        let nei = |p: u16| if p == own { 0 } else { p };
        let neis = vec![
            nei(poly_at(rect.x0 - 1, mid_z)),
            nei(poly_at(mid_x, rect.z1 + 1)),
            nei(poly_at(rect.x1 + 1, mid_z)),
            nei(poly_at(mid_x, rect.z0 - 1)),
        ];

        tile.polys.push(NavPoly {
            verts: vec![v0, v1, v2, v3],
            neis,
            flags: 0,
            area: rect.area,
        });
    }

    Ok(())
}

fn get_u16(buf: &[u8], idx: usize) -> u16 {
    u16::from_le_bytes([buf[idx * 2], buf[idx * 2 + 1]])
}

fn set_u16(buf: &mut [u8], idx: usize, value: u16) {
    let bytes = value.to_le_bytes();
    buf[idx * 2] = bytes[0];
    buf[idx * 2 + 1] = bytes[1];
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::DefaultMeshProcess;
    use navtile_common::{WALKABLE_AREA, LAYER_MAGIC, LAYER_VERSION};

    /// An 8x8 flat layer, fully walkable and fully connected.
    fn flat_layer() -> (TileLayerHeader, LayerGrids) {
        let w = 8usize;
        let header = TileLayerHeader {
            magic: LAYER_MAGIC,
            version: LAYER_VERSION,
            tx: 0,
            ty: 0,
            tlayer: 0,
            bmin: Vec3::new(0.0, 0.0, 0.0),
            bmax: Vec3::new(8.0, 2.0, 8.0),
            hmin: 0,
            hmax: 4,
            width: w as u8,
            height: w as u8,
            minx: 0,
            maxx: 7,
            miny: 0,
            maxy: 7,
        };
        let mut grids = LayerGrids::new(w * w);
        for z in 0..w {
            for x in 0..w {
                let idx = x + z * w;
                grids.heights[idx] = 1;
                grids.areas[idx] = WALKABLE_AREA;
                let mut con = 0u8;
                if x > 0 {
                    con |= 1; // west
                }
                if z + 1 < w {
                    con |= 1 << 1; // north
                }
                if x + 1 < w {
                    con |= 1 << 2; // east
                }
                if z > 0 {
                    con |= 1 << 3; // south
                }
                grids.cons[idx] = con;
            }
        }
        (header, grids)
    }

    #[test]
    fn test_flat_layer_becomes_single_quad() {
        let (header, mut grids) = flat_layer();
        let mut arena = LinearAllocator::new(8 * 8 * 4);
        let mut process = DefaultMeshProcess::new();

        let tile = build_mesh_tile(
            &header,
            &mut grids,
            &[],
            1.0,
            0.5,
            &mut arena,
            &mut process,
        )
        .unwrap();

        assert_eq!(tile.polys.len(), 1);
        let poly = &tile.polys[0];
        assert_eq!(poly.verts.len(), 4);
        assert_ne!(poly.flags, 0);
        // The quad spans the whole layer footprint.
        assert!(tile.poly_at(Vec3::new(4.0, 0.5, 4.0)).is_some());
    }

    #[test]
    fn test_obstacle_carves_hole() {
        let (header, mut grids) = flat_layer();
        let mut arena = LinearAllocator::new(8 * 8 * 4);
        let mut process = DefaultMeshProcess::new();

        let obstacle = ObstacleShape {
            position: Vec3::new(4.0, 0.0, 4.0),
            radius: 1.2,
            height: 2.0,
        };
        let tile = build_mesh_tile(
            &header,
            &mut grids,
            &[obstacle],
            1.0,
            0.5,
            &mut arena,
            &mut process,
        )
        .unwrap();

        // The carved center is not walkable; the surroundings still are.
        assert!(tile.poly_at(Vec3::new(4.0, 0.5, 4.0)).is_none());
        assert!(tile.poly_at(Vec3::new(1.0, 0.5, 1.0)).is_some());
        // Carving never touches the header or dimensions.
        assert!(tile.polys.len() > 1);
    }

    #[test]
    fn test_carve_is_local_to_the_copy() {
        let (header, grids) = flat_layer();
        let mut first = grids.clone();
        let mut second = grids.clone();
        let mut arena = LinearAllocator::new(8 * 8 * 4);
        let mut process = DefaultMeshProcess::new();

        let obstacle = ObstacleShape {
            position: Vec3::new(4.0, 0.0, 4.0),
            radius: 1.2,
            height: 2.0,
        };
        build_mesh_tile(
            &header,
            &mut first,
            &[obstacle],
            1.0,
            0.5,
            &mut arena,
            &mut process,
        )
        .unwrap();

        // Rebuilding from a fresh copy with no obstacles restores the
        // original walkable surface.
        let tile = build_mesh_tile(
            &header,
            &mut second,
            &[],
            1.0,
            0.5,
            &mut arena,
            &mut process,
        )
        .unwrap();
        assert!(tile.poly_at(Vec3::new(4.0, 0.5, 4.0)).is_some());
        assert_eq!(second, grids);
    }

    #[test]
    fn test_adjacency_between_rectangles() {
        let (header, mut grids) = flat_layer();
        // Split the layer into two areas so two rectangles emerge.
        for z in 0..8 {
            for x in 4..8 {
                grids.areas[x + z * 8] = 7;
            }
        }
        let mut arena = LinearAllocator::new(8 * 8 * 4);
        let mut process = DefaultMeshProcess::new();

        let tile = build_mesh_tile(
            &header,
            &mut grids,
            &[],
            1.0,
            0.5,
            &mut arena,
            &mut process,
        )
        .unwrap();

        assert_eq!(tile.polys.len(), 2);
        // The two quads reference each other across the shared edge.
        assert!(tile.polys[0].neis.contains(&2));
        assert!(tile.polys[1].neis.contains(&1));
    }
}
