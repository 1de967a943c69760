//! Compact heightfield: open walkable space above the solid spans, with
//! 4-direction neighbor connectivity.

use glam::Vec3;
use navtile_common::{
    BoundingBox, Error, Result, DIR_OFFSET_X, DIR_OFFSET_Z, NULL_AREA,
};

use crate::heightfield::{Heightfield, MAX_SPAN_HEIGHT};

/// Neighbor slot value meaning "no connection in this direction".
pub const NOT_CONNECTED: u8 = 0x3f;

const MAX_LAYERS_PER_DIR: u32 = NOT_CONNECTED as u32 - 1;

/// One cell of the compact grid: the index and count of its spans.
#[derive(Debug, Clone, Copy, Default)]
pub struct CompactCell {
    /// Index of the first span in the cell.
    pub index: u32,
    /// Number of spans in the cell.
    pub count: u32,
}

/// Open space above one solid span.
#[derive(Debug, Clone, Copy)]
pub struct CompactSpan {
    /// Floor height in cell units.
    pub y: u16,
    /// Region id assigned during partitioning, 0 = none.
    pub reg: u16,
    /// Packed neighbor connections, 6 bits per direction.
    pub con: u32,
    /// Open height above the floor, clamped to 255.
    pub h: u8,
}

impl CompactSpan {
    /// Neighbor span offset in direction `dir`, or `NOT_CONNECTED`.
    pub fn con(&self, dir: usize) -> u8 {
        ((self.con >> (dir * 6)) & 0x3f) as u8
    }

    fn set_con(&mut self, dir: usize, value: u8) {
        let shift = dir * 6;
        self.con = (self.con & !(0x3f << shift)) | ((value as u32 & 0x3f) << shift);
    }
}

/// Compact representation of the walkable space in a heightfield.
#[derive(Debug)]
pub struct CompactHeightfield {
    /// Width along the x-axis in cells.
    pub width: i32,
    /// Height (depth) along the z-axis in cells.
    pub height: i32,
    /// Minimum bounds; y is raised by the walkable height.
    pub bmin: Vec3,
    /// Maximum bounds.
    pub bmax: Vec3,
    /// Horizontal cell resolution.
    pub cs: f32,
    /// Vertical cell resolution.
    pub ch: f32,
    /// Agent height in cell units.
    pub walkable_height: i32,
    /// Agent climb in cell units.
    pub walkable_climb: i32,
    /// Border width in cells.
    pub border_size: i32,
    /// Highest region id assigned, 0 if regions were not built.
    pub max_regions: u16,
    /// Grid cells, row-major.
    pub cells: Vec<CompactCell>,
    /// All spans, grouped per cell.
    pub spans: Vec<CompactSpan>,
    /// Per-span area ids.
    pub areas: Vec<u8>,
}

impl CompactHeightfield {
    /// Builds the compact heightfield from the walkable spans of `hf`.
    pub fn build(
        hf: &Heightfield,
        walkable_height: i32,
        walkable_climb: i32,
        border_size: i32,
    ) -> Result<Self> {
        let width = hf.width;
        let height = hf.height;

        let mut cells = vec![CompactCell::default(); (width * height) as usize];
        let mut spans = Vec::new();
        let mut areas = Vec::new();

        for z in 0..height {
            for x in 0..width {
                let cell = &mut cells[(x + z * width) as usize];
                cell.index = spans.len() as u32;

                let column = hf.column(x, z);
                for (i, span) in column.iter().enumerate() {
                    if span.area == NULL_AREA {
                        continue;
                    }
                    let bottom = span.smax as i32;
                    let top = column
                        .get(i + 1)
                        .map_or(MAX_SPAN_HEIGHT, |s| s.smin as i32);
                    spans.push(CompactSpan {
                        y: bottom.clamp(0, u16::MAX as i32) as u16,
                        reg: 0,
                        con: init_con(),
                        h: (top - bottom).clamp(0, 255) as u8,
                    });
                    areas.push(span.area);
                }
                cell.count = spans.len() as u32 - cell.index;
            }
        }

        let mut chf = Self {
            width,
            height,
            bmin: Vec3::new(
                hf.bmin.x,
                hf.bmin.y,
                hf.bmin.z,
            ),
            bmax: Vec3::new(
                hf.bmax.x,
                hf.bmax.y + walkable_height as f32 * hf.ch,
                hf.bmax.z,
            ),
            cs: hf.cs,
            ch: hf.ch,
            walkable_height,
            walkable_climb,
            border_size,
            max_regions: 0,
            cells,
            spans,
            areas,
        };
        chf.build_connectivity()?;
        Ok(chf)
    }

    fn build_connectivity(&mut self) -> Result<()> {
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cells[(x + z * self.width) as usize];
                for i in cell.index..cell.index + cell.count {
                    for dir in 0..4 {
                        let nx = x + DIR_OFFSET_X[dir];
                        let nz = z + DIR_OFFSET_Z[dir];
                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            continue;
                        }

                        let span = self.spans[i as usize];
                        let ncell = self.cells[(nx + nz * self.width) as usize];
                        let mut connection = None;

                        for k in ncell.index..ncell.index + ncell.count {
                            let nspan = self.spans[k as usize];
                            let bottom = span.y.max(nspan.y) as i32;
                            let top = (span.y as i32 + span.h as i32)
                                .min(nspan.y as i32 + nspan.h as i32);

                            if top - bottom >= self.walkable_height
                                && (nspan.y as i32 - span.y as i32).abs() <= self.walkable_climb
                            {
                                let offset = k - ncell.index;
                                if offset > MAX_LAYERS_PER_DIR {
                                    return Err(Error::Build(format!(
                                        "too many layers in cell ({nx}, {nz})"
                                    )));
                                }
                                connection = Some(offset as u8);
                                break;
                            }
                        }

                        if let Some(offset) = connection {
                            self.spans[i as usize].set_con(dir, offset);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Cell at `(x, z)`.
    pub fn cell(&self, x: i32, z: i32) -> CompactCell {
        self.cells[(x + z * self.width) as usize]
    }

    /// Index of the span connected to span `i` at `(x, z)` in `dir`, if any.
    pub fn connected_index(&self, x: i32, z: i32, i: usize, dir: usize) -> Option<usize> {
        let offset = self.spans[i].con(dir);
        if offset == NOT_CONNECTED {
            return None;
        }
        let nx = x + DIR_OFFSET_X[dir];
        let nz = z + DIR_OFFSET_Z[dir];
        let ncell = self.cells[(nx + nz * self.width) as usize];
        Some((ncell.index + offset as u32) as usize)
    }

    /// Erodes the walkable area by `radius` cells.
    ///
    /// Computes a chamfer distance to the nearest unwalkable cell and clears
    /// areas closer than the radius.
    pub fn erode_walkable_area(&mut self, radius: i32) {
        let span_count = self.spans.len();
        let mut dist = vec![255u8; span_count];

        // Boundary seeds: spans with a missing or unwalkable neighbor.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if self.areas[i] == NULL_AREA {
                        dist[i] = 0;
                        continue;
                    }
                    let mut connected_walkable = 0;
                    for dir in 0..4 {
                        if let Some(n) = self.connected_index(x, z, i, dir) {
                            if self.areas[n] != NULL_AREA {
                                connected_walkable += 1;
                            }
                        }
                    }
                    if connected_walkable != 4 {
                        dist[i] = 0;
                    }
                }
            }
        }

        // Two-pass chamfer distance over the connectivity graph.
        for z in 0..self.height {
            for x in 0..self.width {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    // (-1, 0) and (0, -1), plus their diagonals.
                    self.chamfer_step(x, z, i, 0, 3, &mut dist);
                    self.chamfer_step(x, z, i, 3, 2, &mut dist);
                }
            }
        }
        for z in (0..self.height).rev() {
            for x in (0..self.width).rev() {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    // (1, 0) and (0, 1), plus their diagonals.
                    self.chamfer_step(x, z, i, 2, 1, &mut dist);
                    self.chamfer_step(x, z, i, 1, 0, &mut dist);
                }
            }
        }

        let threshold = (radius * 2) as u8;
        for i in 0..span_count {
            if dist[i] < threshold {
                self.areas[i] = NULL_AREA;
            }
        }
    }

    fn chamfer_step(&self, x: i32, z: i32, i: usize, dir: usize, diag_dir: usize, dist: &mut [u8]) {
        if let Some(n) = self.connected_index(x, z, i, dir) {
            let straight = dist[n].saturating_add(2);
            if straight < dist[i] {
                dist[i] = straight;
            }
            let nx = x + DIR_OFFSET_X[dir];
            let nz = z + DIR_OFFSET_Z[dir];
            if let Some(nn) = self.connected_index(nx, nz, n, diag_dir) {
                let diagonal = dist[nn].saturating_add(3);
                if diagonal < dist[i] {
                    dist[i] = diagonal;
                }
            }
        }
    }

    /// Stamps `area` onto every walkable span inside the world-space box.
    pub fn mark_box_area(&mut self, bounds: &BoundingBox, area: u8) {
        let min_x = ((bounds.min.x - self.bmin.x) / self.cs) as i32;
        let min_y = ((bounds.min.y - self.bmin.y) / self.ch) as i32;
        let min_z = ((bounds.min.z - self.bmin.z) / self.cs) as i32;
        let max_x = ((bounds.max.x - self.bmin.x) / self.cs) as i32;
        let max_y = ((bounds.max.y - self.bmin.y) / self.ch) as i32;
        let max_z = ((bounds.max.z - self.bmin.z) / self.cs) as i32;

        let x0 = min_x.max(0);
        let x1 = max_x.min(self.width - 1);
        let z0 = min_z.max(0);
        let z1 = max_z.min(self.height - 1);
        if x0 > x1 || z0 > z1 {
            return;
        }

        for z in z0..=z1 {
            for x in x0..=x1 {
                let cell = self.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let y = self.spans[i].y as i32;
                    if y >= min_y && y <= max_y && self.areas[i] != NULL_AREA {
                        self.areas[i] = area;
                    }
                }
            }
        }
    }
}

fn init_con() -> u32 {
    let mut con = 0u32;
    for dir in 0..4 {
        con |= (NOT_CONNECTED as u32) << (dir * 6);
    }
    con
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtile_common::WALKABLE_AREA;

    /// Flat 8x8 walkable floor at height 2.
    fn flat_field() -> CompactHeightfield {
        let mut hf = Heightfield::new(
            8,
            8,
            Vec3::ZERO,
            Vec3::new(8.0, 10.0, 8.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..8 {
            for x in 0..8 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build(&hf, 2, 1, 0).unwrap()
    }

    #[test]
    fn test_build_counts_walkable_spans() {
        let chf = flat_field();
        assert_eq!(chf.spans.len(), 64);
        assert!(chf.areas.iter().all(|&a| a == WALKABLE_AREA));
    }

    #[test]
    fn test_connectivity_on_flat_ground() {
        let chf = flat_field();
        // Interior cells connect in all four directions.
        let cell = chf.cell(4, 4);
        let i = cell.index as usize;
        for dir in 0..4 {
            assert!(chf.connected_index(4, 4, i, dir).is_some());
        }
        // Corner cell connects only east and north.
        let corner = chf.cell(0, 0).index as usize;
        assert!(chf.connected_index(0, 0, corner, 0).is_none());
        assert!(chf.connected_index(0, 0, corner, 3).is_none());
        assert!(chf.connected_index(0, 0, corner, 1).is_some());
        assert!(chf.connected_index(0, 0, corner, 2).is_some());
    }

    #[test]
    fn test_erode_shrinks_walkable_area() {
        let mut chf = flat_field();
        chf.erode_walkable_area(1);

        // The outermost ring is gone, the center survives.
        let corner = chf.cell(0, 0).index as usize;
        assert_eq!(chf.areas[corner], NULL_AREA);
        let center = chf.cell(4, 4).index as usize;
        assert_eq!(chf.areas[center], WALKABLE_AREA);
    }

    #[test]
    fn test_mark_box_area() {
        let mut chf = flat_field();
        let bounds = BoundingBox::new(Vec3::new(2.0, 0.0, 2.0), Vec3::new(5.0, 5.0, 5.0));
        chf.mark_box_area(&bounds, 7);

        let inside = chf.cell(3, 3).index as usize;
        assert_eq!(chf.areas[inside], 7);
        let outside = chf.cell(7, 7).index as usize;
        assert_eq!(chf.areas[outside], WALKABLE_AREA);
    }
}
