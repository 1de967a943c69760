//! Span heightfield, the first structure in the voxel pipeline.
//!
//! Each cell of the XZ grid holds a column of solid spans sorted by height.
//! Spans are merged on insert, so a column is always a disjoint, ordered
//! sequence.

use glam::Vec3;
use navtile_common::{Error, Result, NULL_AREA};

/// Ceiling used when a span has nothing above it.
pub const MAX_SPAN_HEIGHT: i32 = 0xffff;

/// A solid vertical span in a heightfield column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    /// Span bottom in cell-height units.
    pub smin: u16,
    /// Span top in cell-height units.
    pub smax: u16,
    /// Area id of the span's top surface; `NULL_AREA` = not walkable.
    pub area: u8,
}

/// Grid of solid span columns.
#[derive(Debug)]
pub struct Heightfield {
    /// Width along the x-axis in cells.
    pub width: i32,
    /// Height (depth) along the z-axis in cells.
    pub height: i32,
    /// Minimum bounds of the field.
    pub bmin: Vec3,
    /// Maximum bounds of the field.
    pub bmax: Vec3,
    /// Horizontal cell resolution.
    pub cs: f32,
    /// Vertical cell resolution.
    pub ch: f32,
    columns: Vec<Vec<Span>>,
}

impl Heightfield {
    /// Creates an empty heightfield.
    pub fn new(width: i32, height: i32, bmin: Vec3, bmax: Vec3, cs: f32, ch: f32) -> Result<Self> {
        if width <= 0 || height <= 0 {
            return Err(Error::Build(format!(
                "invalid heightfield size {width}x{height}"
            )));
        }
        if cs <= 0.0 || ch <= 0.0 {
            return Err(Error::Build("invalid heightfield resolution".to_string()));
        }
        Ok(Self {
            width,
            height,
            bmin,
            bmax,
            cs,
            ch,
            columns: vec![Vec::new(); (width * height) as usize],
        })
    }

    /// Spans of the column at `(x, z)`, sorted by height.
    pub fn column(&self, x: i32, z: i32) -> &[Span] {
        &self.columns[(x + z * self.width) as usize]
    }

    /// Adds a span to the column at `(x, z)`, merging any overlap.
    ///
    /// When merging, the span keeps the area id of the taller surface unless
    /// the tops are within `flag_merge_threshold`, in which case the higher
    /// priority (larger) area id wins. Out-of-bounds coordinates are
    /// silently ignored so triangle footprints can spill over the border.
    pub fn add_span(
        &mut self,
        x: i32,
        z: i32,
        smin: u16,
        smax: u16,
        area: u8,
        flag_merge_threshold: i32,
    ) -> Result<()> {
        if x < 0 || z < 0 || x >= self.width || z >= self.height {
            return Ok(());
        }
        if smin > smax {
            return Err(Error::Build(format!(
                "invalid span range [{smin}, {smax}]"
            )));
        }

        let column = &mut self.columns[(x + z * self.width) as usize];

        let mut new_min = smin;
        let mut new_max = smax;
        let mut new_area = area;

        // Find the range of existing spans that touch the new one, merge
        // them into it and splice it back in their place.
        let start = column.partition_point(|s| s.smax < new_min);
        let mut end = start;
        while end < column.len() && column[end].smin <= new_max {
            let existing = column[end];
            new_min = new_min.min(existing.smin);
            new_max = new_max.max(existing.smax);
            if (new_max as i32 - existing.smax as i32).abs() <= flag_merge_threshold {
                new_area = new_area.max(existing.area);
            }
            end += 1;
        }

        column.splice(
            start..end,
            std::iter::once(Span {
                smin: new_min,
                smax: new_max,
                area: new_area,
            }),
        );
        Ok(())
    }

    /// Total number of spans in the field.
    pub fn span_count(&self) -> usize {
        self.columns.iter().map(Vec::len).sum()
    }

    /// Marks unwalkable spans the agent can step over as walkable.
    ///
    /// A span that lost its walkable flag but sits at most `walkable_climb`
    /// above a walkable span below it inherits that span's area.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: i32) {
        for column in &mut self.columns {
            let mut previous_walkable = false;
            let mut previous_area = NULL_AREA;
            let mut previous_max = 0i32;

            for span in column.iter_mut() {
                let walkable = span.area != NULL_AREA;
                if !walkable
                    && previous_walkable
                    && span.smax as i32 - previous_max <= walkable_climb
                {
                    span.area = previous_area;
                }
                // Track the original walkability so a run of solid spans is
                // not promoted step by step.
                previous_walkable = walkable;
                previous_area = span.area;
                previous_max = span.smax as i32;
            }
        }
    }

    /// Marks spans next to a drop higher than `walkable_climb` unwalkable.
    pub fn filter_ledge_spans(&mut self, walkable_height: i32, walkable_climb: i32) {
        for z in 0..self.height {
            for x in 0..self.width {
                for i in 0..self.columns[(x + z * self.width) as usize].len() {
                    let span = self.columns[(x + z * self.width) as usize][i];
                    if span.area == NULL_AREA {
                        continue;
                    }

                    let floor = span.smax as i32;
                    let ceiling = self
                        .span_above(x, z, i)
                        .map_or(MAX_SPAN_HEIGHT, |s| s.smin as i32);

                    let mut lowest_neighbor_floor = MAX_SPAN_HEIGHT;
                    let mut lowest_traversable = floor;
                    let mut highest_traversable = floor;

                    for dir in 0..4 {
                        let nx = x + navtile_common::DIR_OFFSET_X[dir];
                        let nz = z + navtile_common::DIR_OFFSET_Z[dir];

                        if nx < 0 || nz < 0 || nx >= self.width || nz >= self.height {
                            lowest_neighbor_floor = -walkable_climb - 1;
                            break;
                        }

                        let neighbor = self.column(nx, nz);

                        // The void below the neighbor's first span counts as
                        // a bottomless drop when the agent fits into it.
                        let first_ceiling = neighbor
                            .first()
                            .map_or(MAX_SPAN_HEIGHT, |s| s.smin as i32);
                        if ceiling.min(first_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor = -walkable_climb - 1;
                        }

                        for (k, nspan) in neighbor.iter().enumerate() {
                            let neighbor_floor = nspan.smax as i32;
                            let neighbor_ceiling = neighbor
                                .get(k + 1)
                                .map_or(MAX_SPAN_HEIGHT, |s| s.smin as i32);

                            // Skip gaps the agent cannot stand in.
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                continue;
                            }

                            let diff = neighbor_floor - floor;
                            lowest_neighbor_floor = lowest_neighbor_floor.min(diff);
                            if diff.abs() <= walkable_climb {
                                lowest_traversable = lowest_traversable.min(neighbor_floor);
                                highest_traversable = highest_traversable.max(neighbor_floor);
                            }
                        }
                    }

                    // A drop deeper than the climb limit, or too much height
                    // variance among traversable neighbors, makes a ledge.
                    if lowest_neighbor_floor < -walkable_climb
                        || highest_traversable - lowest_traversable > walkable_climb
                    {
                        self.columns[(x + z * self.width) as usize][i].area = NULL_AREA;
                    }
                }
            }
        }
    }

    /// Marks spans with less than `walkable_height` clearance unwalkable.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: i32) {
        for column in &mut self.columns {
            for i in 0..column.len() {
                let ceiling = column
                    .get(i + 1)
                    .map_or(MAX_SPAN_HEIGHT, |s| s.smin as i32);
                if ceiling - (column[i].smax as i32) < walkable_height {
                    column[i].area = NULL_AREA;
                }
            }
        }
    }

    fn span_above(&self, x: i32, z: i32, i: usize) -> Option<&Span> {
        self.columns[(x + z * self.width) as usize].get(i + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navtile_common::WALKABLE_AREA;

    fn field() -> Heightfield {
        Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 10.0, 4.0),
            1.0,
            1.0,
        )
        .unwrap()
    }

    #[test]
    fn test_add_span_keeps_order() {
        let mut hf = field();
        hf.add_span(1, 1, 10, 12, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 1, 5, 6, WALKABLE_AREA, 1).unwrap();

        let col = hf.column(1, 1);
        assert_eq!(col.len(), 3);
        assert!(col[0].smax < col[1].smin && col[1].smax < col[2].smin);
    }

    #[test]
    fn test_add_span_merges_overlap() {
        let mut hf = field();
        hf.add_span(0, 0, 0, 5, NULL_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 8, WALKABLE_AREA, 1).unwrap();

        let col = hf.column(0, 0);
        assert_eq!(col.len(), 1);
        assert_eq!(col[0].smin, 0);
        assert_eq!(col[0].smax, 8);
        assert_eq!(col[0].area, WALKABLE_AREA);
    }

    #[test]
    fn test_add_span_out_of_bounds_ignored() {
        let mut hf = field();
        hf.add_span(-1, 0, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 99, 0, 1, WALKABLE_AREA, 1).unwrap();
        assert_eq!(hf.span_count(), 0);
    }

    #[test]
    fn test_low_height_filter() {
        let mut hf = field();
        // Floor span with a ceiling 2 units above it.
        hf.add_span(2, 2, 0, 1, WALKABLE_AREA, 1).unwrap();
        hf.add_span(2, 2, 3, 5, WALKABLE_AREA, 1).unwrap();

        hf.filter_walkable_low_height_spans(4);
        let col = hf.column(2, 2);
        assert_eq!(col[0].area, NULL_AREA);
        // Top span keeps its area, nothing above it.
        assert_eq!(col[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_low_hanging_obstacle_promoted() {
        // Solid span whose top is 3 units above the walkable floor below it:
        // unreachable with climb 1, steppable with climb 3.
        let mut hf = field();
        hf.add_span(0, 0, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(0, 0, 4, 5, NULL_AREA, 0).unwrap();
        hf.filter_low_hanging_walkable_obstacles(1);
        assert_eq!(hf.column(0, 0)[1].area, NULL_AREA);

        let mut hf = field();
        hf.add_span(1, 0, 0, 2, WALKABLE_AREA, 1).unwrap();
        hf.add_span(1, 0, 4, 5, NULL_AREA, 0).unwrap();
        hf.filter_low_hanging_walkable_obstacles(3);
        assert_eq!(hf.column(1, 0)[1].area, WALKABLE_AREA);
    }

    #[test]
    fn test_ledge_filter_marks_border_spans() {
        let mut hf = field();
        // A lone platform: every neighbor cell is empty, so stepping off is
        // a drop to nothing.
        hf.add_span(1, 1, 0, 5, WALKABLE_AREA, 1).unwrap();
        hf.filter_ledge_spans(2, 1);
        assert_eq!(hf.column(1, 1)[0].area, NULL_AREA);
    }
}
