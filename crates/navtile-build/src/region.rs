//! Region partitioning over the compact heightfield.
//!
//! Walkable spans are grouped into connected regions before layer
//! extraction. Two algorithms are provided: monotone sweep partitioning and
//! watershed partitioning over a distance field.

use navtile_common::{Result, DIR_OFFSET_X, DIR_OFFSET_Z, NULL_AREA};

use crate::compact::CompactHeightfield;

/// Region id flag marking tile border regions.
pub const BORDER_REG: u16 = 0x8000;

const NULL_NEI: u16 = 0xffff;

/// Partitions walkable spans into regions with a per-row monotone sweep.
///
/// Produces regions without holes in a single pass; long thin regions can
/// appear on diagonal terrain.
pub fn build_regions_monotone(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    let width = chf.width;
    let height = chf.height;
    let mut src_reg = vec![0u16; chf.spans.len()];
    let mut region_id: u16 = 1;

    if border_size > 0 {
        let bw = border_size.min(width);
        let bh = border_size.min(height);
        paint_rect_region(chf, &mut src_reg, 0, bw, 0, height, region_id | BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, width - bw, width, 0, height, region_id | BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, width, 0, bh, region_id | BORDER_REG);
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, width, height - bh, height, region_id | BORDER_REG);
        region_id += 1;
    }

    struct Sweep {
        id: u16,
        nei: u16,
        ns: u16,
    }

    let mut prev_counts: Vec<u16> = Vec::new();

    for z in border_size..height - border_size {
        let mut sweeps: Vec<Sweep> = Vec::new();
        prev_counts.clear();
        prev_counts.resize(region_id as usize + 1, 0);

        for x in border_size..width - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                // Continue the sweep of the -x neighbor when it shares the
                // same area and already belongs to this row.
                let mut sweep_id = None;
                if let Some(n) = chf.connected_index(x, z, i, 0) {
                    if chf.areas[n] == chf.areas[i]
                        && src_reg[n] != 0
                        && src_reg[n] & BORDER_REG == 0
                        && (src_reg[n] as usize) <= sweeps.len()
                    {
                        sweep_id = Some(src_reg[n]);
                    }
                }
                let sweep_id = match sweep_id {
                    Some(id) => id,
                    None => {
                        sweeps.push(Sweep {
                            id: 0,
                            nei: 0,
                            ns: 0,
                        });
                        sweeps.len() as u16
                    }
                };

                // Track which previous-row region this sweep touches; more
                // than one distinct neighbor invalidates the merge.
                if let Some(n) = chf.connected_index(x, z, i, 3) {
                    let nr = src_reg[n];
                    if nr != 0 && nr & BORDER_REG == 0 && chf.areas[n] == chf.areas[i] {
                        let sweep = &mut sweeps[sweep_id as usize - 1];
                        if sweep.nei == 0 || sweep.nei == nr {
                            sweep.nei = nr;
                            sweep.ns += 1;
                            prev_counts[nr as usize] += 1;
                        } else {
                            sweep.nei = NULL_NEI;
                        }
                    }
                }

                src_reg[i] = sweep_id;
            }
        }

        // A sweep merges with its previous-row neighbor only when it is
        // that region's sole successor.
        for sweep in &mut sweeps {
            if sweep.nei != NULL_NEI
                && sweep.nei != 0
                && prev_counts[sweep.nei as usize] == sweep.ns
            {
                sweep.id = sweep.nei;
            } else {
                sweep.id = region_id;
                region_id += 1;
                prev_counts.resize(region_id as usize + 1, 0);
            }
        }

        for x in border_size..width - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let r = src_reg[i];
                if r > 0 && r & BORDER_REG == 0 && (r as usize) <= sweeps.len() {
                    src_reg[i] = sweeps[r as usize - 1].id;
                }
            }
        }
    }

    remove_small_regions(chf, &mut src_reg, region_id, min_region_area);

    for (span, &reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = reg;
    }
    chf.max_regions = region_id;
    Ok(())
}

/// Partitions walkable spans with a watershed over the chamfer distance
/// field. Slower than the monotone sweep but yields rounder regions.
pub fn build_regions_watershed(
    chf: &mut CompactHeightfield,
    border_size: i32,
    min_region_area: i32,
) -> Result<()> {
    let dist = build_distance_field(chf);
    let max_dist = dist.iter().copied().max().unwrap_or(0);

    let mut src_reg = vec![0u16; chf.spans.len()];
    let mut region_id: u16 = 1;

    if border_size > 0 {
        let bw = border_size.min(chf.width);
        let bh = border_size.min(chf.height);
        paint_rect_region(chf, &mut src_reg, 0, bw, 0, chf.height, region_id | BORDER_REG);
        region_id += 1;
        paint_rect_region(
            chf,
            &mut src_reg,
            chf.width - bw,
            chf.width,
            0,
            chf.height,
            region_id | BORDER_REG,
        );
        region_id += 1;
        paint_rect_region(chf, &mut src_reg, 0, chf.width, 0, bh, region_id | BORDER_REG);
        region_id += 1;
        paint_rect_region(
            chf,
            &mut src_reg,
            0,
            chf.width,
            chf.height - bh,
            chf.height,
            region_id | BORDER_REG,
        );
        region_id += 1;
    }

    let mut level = (max_dist + 1) & !1;
    while level > 0 {
        level = level.saturating_sub(2);

        expand_regions(chf, &dist, &mut src_reg, level, 8);

        // Seed a new basin at every still-unassigned span above the level.
        for z in border_size..chf.height - border_size {
            for x in border_size..chf.width - border_size {
                let cell = chf.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if dist[i] >= level && src_reg[i] == 0 && chf.areas[i] != NULL_AREA {
                        flood_region(chf, &dist, &mut src_reg, x, z, i, level, region_id);
                        region_id += 1;
                    }
                }
            }
        }
    }

    expand_regions(chf, &dist, &mut src_reg, 0, 64);
    remove_small_regions(chf, &mut src_reg, region_id, min_region_area);

    for (span, &reg) in chf.spans.iter_mut().zip(&src_reg) {
        span.reg = reg;
    }
    chf.max_regions = region_id;
    Ok(())
}

/// Chamfer distance from each walkable span to the nearest area boundary,
/// smoothed with a small box blur.
fn build_distance_field(chf: &CompactHeightfield) -> Vec<u16> {
    let span_count = chf.spans.len();
    let mut dist = vec![u16::MAX; span_count];

    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let mut boundary = chf.areas[i] == NULL_AREA;
                if !boundary {
                    let mut connected = 0;
                    for dir in 0..4 {
                        if let Some(n) = chf.connected_index(x, z, i, dir) {
                            if chf.areas[n] == chf.areas[i] {
                                connected += 1;
                            }
                        }
                    }
                    boundary = connected != 4;
                }
                if boundary {
                    dist[i] = 0;
                }
            }
        }
    }

    let chamfer = |x: i32, z: i32, i: usize, dir: usize, diag: usize, dist: &mut Vec<u16>| {
        if let Some(n) = chf.connected_index(x, z, i, dir) {
            let straight = dist[n].saturating_add(2);
            if straight < dist[i] {
                dist[i] = straight;
            }
            let nx = x + DIR_OFFSET_X[dir];
            let nz = z + DIR_OFFSET_Z[dir];
            if let Some(nn) = chf.connected_index(nx, nz, n, diag) {
                let diagonal = dist[nn].saturating_add(3);
                if diagonal < dist[i] {
                    dist[i] = diagonal;
                }
            }
        }
    };

    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                chamfer(x, z, i, 0, 3, &mut dist);
                chamfer(x, z, i, 3, 2, &mut dist);
            }
        }
    }
    for z in (0..chf.height).rev() {
        for x in (0..chf.width).rev() {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                chamfer(x, z, i, 2, 1, &mut dist);
                chamfer(x, z, i, 1, 0, &mut dist);
            }
        }
    }

    // Box blur to stop the watershed from splitting on single-cell noise.
    let mut blurred = dist.clone();
    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let d = dist[i];
                if d <= 2 {
                    continue;
                }
                let mut total = d as u32;
                for dir in 0..4 {
                    if let Some(n) = chf.connected_index(x, z, i, dir) {
                        total += dist[n] as u32;
                    } else {
                        total += d as u32;
                    }
                }
                blurred[i] = ((total + 2) / 5) as u16;
            }
        }
    }
    blurred
}

/// Grows existing regions into unassigned spans whose distance is at least
/// `level`, preferring the neighbor closest to a boundary.
fn expand_regions(
    chf: &CompactHeightfield,
    dist: &[u16],
    src_reg: &mut [u16],
    level: u16,
    max_iterations: usize,
) {
    for _ in 0..max_iterations {
        let mut changed = false;
        let mut updates: Vec<(usize, u16)> = Vec::new();

        for z in 0..chf.height {
            for x in 0..chf.width {
                let cell = chf.cell(x, z);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    if src_reg[i] != 0 || dist[i] < level || chf.areas[i] == NULL_AREA {
                        continue;
                    }
                    let mut best: Option<(u16, u16)> = None;
                    for dir in 0..4 {
                        if let Some(n) = chf.connected_index(x, z, i, dir) {
                            let nr = src_reg[n];
                            if nr != 0
                                && nr & BORDER_REG == 0
                                && chf.areas[n] == chf.areas[i]
                                && best.is_none_or(|(_, d)| dist[n] < d)
                            {
                                best = Some((nr, dist[n]));
                            }
                        }
                    }
                    if let Some((reg, _)) = best {
                        updates.push((i, reg));
                    }
                }
            }
        }

        for (i, reg) in updates {
            src_reg[i] = reg;
            changed = true;
        }
        if !changed {
            break;
        }
    }
}

/// Flood-fills a new basin from span `seed` over same-area spans whose
/// distance is at least `level`.
fn flood_region(
    chf: &CompactHeightfield,
    dist: &[u16],
    src_reg: &mut [u16],
    x: i32,
    z: i32,
    seed: usize,
    level: u16,
    region: u16,
) {
    let area = chf.areas[seed];
    let mut stack = vec![(x, z, seed)];
    src_reg[seed] = region;

    while let Some((cx, cz, ci)) = stack.pop() {
        for dir in 0..4 {
            if let Some(n) = chf.connected_index(cx, cz, ci, dir) {
                if src_reg[n] == 0 && dist[n] >= level && chf.areas[n] == area {
                    src_reg[n] = region;
                    stack.push((cx + DIR_OFFSET_X[dir], cz + DIR_OFFSET_Z[dir], n));
                }
            }
        }
    }
}

fn paint_rect_region(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    min_x: i32,
    max_x: i32,
    min_z: i32,
    max_z: i32,
    region: u16,
) {
    for z in min_z..max_z {
        for x in min_x..max_x {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] != NULL_AREA {
                    src_reg[i] = region;
                }
            }
        }
    }
}

/// Clears regions smaller than `min_region_area` that do not touch a tile
/// border region.
fn remove_small_regions(
    chf: &CompactHeightfield,
    src_reg: &mut [u16],
    region_count: u16,
    min_region_area: i32,
) {
    let mut sizes = vec![0i32; region_count as usize + 1];
    let mut touches_border = vec![false; region_count as usize + 1];

    for z in 0..chf.height {
        for x in 0..chf.width {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let r = src_reg[i];
                if r == 0 || r & BORDER_REG != 0 {
                    continue;
                }
                sizes[r as usize] += 1;
                for dir in 0..4 {
                    if let Some(n) = chf.connected_index(x, z, i, dir) {
                        if src_reg[n] & BORDER_REG != 0 {
                            touches_border[r as usize] = true;
                        }
                    }
                }
            }
        }
    }

    for r in src_reg.iter_mut() {
        let idx = *r as usize;
        if *r != 0
            && *r & BORDER_REG == 0
            && sizes[idx] < min_region_area
            && !touches_border[idx]
        {
            *r = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use glam::Vec3;
    use navtile_common::WALKABLE_AREA;

    fn flat_compact(size: i32) -> CompactHeightfield {
        let mut hf = Heightfield::new(
            size,
            size,
            Vec3::ZERO,
            Vec3::new(size as f32, 10.0, size as f32),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..size {
            for x in 0..size {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build(&hf, 2, 1, 0).unwrap()
    }

    #[test]
    fn test_monotone_flat_ground_single_region() {
        let mut chf = flat_compact(10);
        build_regions_monotone(&mut chf, 0, 1).unwrap();

        let first = chf.spans[0].reg;
        assert_ne!(first, 0);
        assert!(chf.spans.iter().all(|s| s.reg == first));
    }

    #[test]
    fn test_monotone_disconnected_islands_get_distinct_regions() {
        // Two walkable strips separated by an empty gap.
        let mut hf = Heightfield::new(
            9,
            3,
            Vec3::ZERO,
            Vec3::new(9.0, 10.0, 3.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..3 {
            for x in 0..3 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
                hf.add_span(x + 6, z, 0, 2, WALKABLE_AREA, 1).unwrap();
            }
        }
        let mut chf = CompactHeightfield::build(&hf, 2, 1, 0).unwrap();
        build_regions_monotone(&mut chf, 0, 1).unwrap();

        let left = chf.cell(0, 0).index as usize;
        let right = chf.cell(7, 0).index as usize;
        assert_ne!(chf.spans[left].reg, 0);
        assert_ne!(chf.spans[right].reg, 0);
        assert_ne!(chf.spans[left].reg, chf.spans[right].reg);
    }

    #[test]
    fn test_watershed_flat_ground_single_region() {
        let mut chf = flat_compact(10);
        build_regions_watershed(&mut chf, 0, 1).unwrap();

        let first = chf.spans[0].reg;
        assert_ne!(first, 0);
        assert!(chf.spans.iter().all(|s| s.reg == first));
    }

    #[test]
    fn test_border_regions_marked() {
        let mut chf = flat_compact(12);
        build_regions_monotone(&mut chf, 2, 1).unwrap();

        let corner = chf.cell(0, 0).index as usize;
        assert_ne!(chf.spans[corner].reg & BORDER_REG, 0);
        let center = chf.cell(6, 6).index as usize;
        assert_eq!(chf.spans[center].reg & BORDER_REG, 0);
        assert_ne!(chf.spans[center].reg, 0);
    }
}
