//! Heightfield layer extraction.
//!
//! Splits the walkable spans of a compact heightfield into non-overlapping
//! 2.5D layers so stacked walkable surfaces (bridges, multi-storey floors)
//! end up in separate grids. Each layer spans at most 255 height units.

use glam::Vec3;
use navtile_common::{Error, LayerGrids, Result, NULL_AREA};

use crate::compact::CompactHeightfield;

const NO_REGION: u8 = 0xff;
const NO_LAYER: u8 = 0xff;

/// One extracted 2.5D layer of walkable cells.
#[derive(Debug, Clone)]
pub struct HeightfieldLayer {
    /// Layer bounds minimum in world space.
    pub bmin: Vec3,
    /// Layer bounds maximum in world space.
    pub bmax: Vec3,
    /// Horizontal cell resolution.
    pub cs: f32,
    /// Vertical cell resolution.
    pub ch: f32,
    /// Grid width in cells (core tile area, borders stripped).
    pub width: i32,
    /// Grid height in cells.
    pub height: i32,
    /// Bounds of used cells within the grid.
    pub minx: i32,
    /// See `minx`.
    pub maxx: i32,
    /// See `minx`.
    pub miny: i32,
    /// See `minx`.
    pub maxy: i32,
    /// Minimum floor height of the layer in cell units.
    pub hmin: i32,
    /// Maximum floor height of the layer in cell units.
    pub hmax: i32,
    /// Height, area and connectivity grids.
    pub grids: LayerGrids,
}

#[derive(Debug, Clone, Default)]
struct LayerRegion {
    layer_id: u8,
    base: bool,
    ymin: u16,
    ymax: u16,
    /// Region ids overlapping this one in some column.
    layers: Vec<u8>,
    /// Region ids connected by a walkable edge.
    neis: Vec<u8>,
}

/// Partitions the walkable spans of `chf` into heightfield layers.
///
/// `border_size` cells are stripped from each side of the output grids.
/// Returns an empty vector when no walkable spans remain.
pub fn build_heightfield_layers(
    chf: &CompactHeightfield,
    border_size: i32,
    walkable_height: i32,
) -> Result<Vec<HeightfieldLayer>> {
    let w = chf.width;
    let h = chf.height;

    let (src_reg, region_count) = partition_monotone(chf, border_size)?;
    if region_count == 0 {
        return Ok(Vec::new());
    }

    let mut regs = vec![LayerRegion::default(); region_count as usize];
    for reg in &mut regs {
        reg.layer_id = NO_LAYER;
        reg.ymin = u16::MAX;
    }

    // Collect per-region height ranges, stacked-region pairs and edge
    // neighbors.
    let mut column_regs: Vec<u8> = Vec::with_capacity(16);
    for z in 0..h {
        for x in 0..w {
            let cell = chf.cell(x, z);
            column_regs.clear();

            for i in cell.index as usize..(cell.index + cell.count) as usize {
                let ri = src_reg[i];
                if ri == NO_REGION {
                    continue;
                }
                let span = chf.spans[i];
                let reg = &mut regs[ri as usize];
                reg.ymin = reg.ymin.min(span.y);
                reg.ymax = reg.ymax.max(span.y);
                column_regs.push(ri);

                for dir in 0..4 {
                    if let Some(n) = chf.connected_index(x, z, i, dir) {
                        let rn = src_reg[n];
                        if rn != NO_REGION && rn != ri {
                            add_unique(&mut regs[ri as usize].neis, rn);
                        }
                    }
                }
            }

            // Any two regions sharing a column overlap vertically and must
            // not land in the same layer.
            for a in 0..column_regs.len() {
                for b in a + 1..column_regs.len() {
                    let (ra, rb) = (column_regs[a], column_regs[b]);
                    if ra != rb {
                        add_unique(&mut regs[ra as usize].layers, rb);
                        add_unique(&mut regs[rb as usize].layers, ra);
                    }
                }
            }
        }
    }

    // Walk connected regions outward from each unassigned root, merging
    // whatever fits into the same layer.
    let mut layer_id: u8 = 0;
    let mut stack: Vec<u8> = Vec::with_capacity(64);
    for root_idx in 0..regs.len() {
        if regs[root_idx].layer_id != NO_LAYER {
            continue;
        }
        regs[root_idx].layer_id = layer_id;
        regs[root_idx].base = true;
        stack.clear();
        stack.push(root_idx as u8);

        while let Some(ri) = stack.pop() {
            let neis = regs[ri as usize].neis.clone();
            for nei in neis {
                let root = &regs[root_idx];
                let regn = &regs[nei as usize];
                if regn.layer_id != NO_LAYER {
                    continue;
                }
                // Skip regions stacked over the current layer.
                if root.layers.contains(&nei) {
                    continue;
                }
                // Skip if the merged height range would not fit a layer.
                let ymin = root.ymin.min(regn.ymin);
                let ymax = root.ymax.max(regn.ymax);
                if ymax as i32 - ymin as i32 >= 255 {
                    continue;
                }

                stack.push(nei);
                let merged_layers = regn.layers.clone();
                let (regn_ymin, regn_ymax) = (regn.ymin, regn.ymax);
                regs[nei as usize].layer_id = layer_id;
                let root = &mut regs[root_idx];
                for l in merged_layers {
                    add_unique(&mut root.layers, l);
                }
                root.ymin = root.ymin.min(regn_ymin);
                root.ymax = root.ymax.max(regn_ymax);
            }
        }
        layer_id += 1;
    }

    merge_close_layers(&mut regs, walkable_height * 4);

    // Compact layer ids.
    let mut remap = vec![NO_LAYER; 256];
    for reg in &regs {
        if reg.layer_id != NO_LAYER {
            remap[reg.layer_id as usize] = 0;
        }
    }
    let mut layer_count: u8 = 0;
    for slot in remap.iter_mut() {
        if *slot == 0 {
            *slot = layer_count;
            layer_count += 1;
        }
    }
    for reg in &mut regs {
        if reg.layer_id != NO_LAYER {
            reg.layer_id = remap[reg.layer_id as usize];
        }
    }

    if layer_count == 0 {
        return Ok(Vec::new());
    }

    // Emit the layer grids, borders stripped.
    let lw = w - border_size * 2;
    let lh = h - border_size * 2;
    if lw <= 0 || lh <= 0 {
        return Err(Error::Build("border larger than tile".to_string()));
    }

    let mut layers = Vec::with_capacity(layer_count as usize);
    for cur_id in 0..layer_count {
        let mut hmin = i32::MAX;
        let mut hmax = 0i32;
        for reg in &regs {
            if reg.base && reg.layer_id == cur_id {
                hmin = hmin.min(reg.ymin as i32);
                hmax = hmax.max(reg.ymax as i32);
            }
        }
        if hmin == i32::MAX {
            hmin = 0;
        }

        let mut layer = HeightfieldLayer {
            bmin: Vec3::new(
                chf.bmin.x + border_size as f32 * chf.cs,
                chf.bmin.y + hmin as f32 * chf.ch,
                chf.bmin.z + border_size as f32 * chf.cs,
            ),
            bmax: Vec3::new(
                chf.bmax.x - border_size as f32 * chf.cs,
                chf.bmin.y + hmax as f32 * chf.ch,
                chf.bmax.z - border_size as f32 * chf.cs,
            ),
            cs: chf.cs,
            ch: chf.ch,
            width: lw,
            height: lh,
            minx: lw,
            maxx: 0,
            miny: lh,
            maxy: 0,
            hmin,
            hmax,
            grids: LayerGrids::new((lw * lh) as usize),
        };

        for z in 0..lh {
            for x in 0..lw {
                let cx = border_size + x;
                let cz = border_size + z;
                let cell = chf.cell(cx, cz);
                for i in cell.index as usize..(cell.index + cell.count) as usize {
                    let ri = src_reg[i];
                    if ri == NO_REGION || regs[ri as usize].layer_id != cur_id {
                        continue;
                    }
                    let span = chf.spans[i];

                    layer.minx = layer.minx.min(x);
                    layer.maxx = layer.maxx.max(x);
                    layer.miny = layer.miny.min(z);
                    layer.maxy = layer.maxy.max(z);

                    let idx = (x + z * lw) as usize;
                    layer.grids.heights[idx] = (span.y as i32 - hmin) as u8;
                    layer.grids.areas[idx] = chf.areas[i];

                    // Low nibble: walk connections within the layer. High
                    // nibble: portals to neighboring layers.
                    let mut con: u8 = 0;
                    let mut portal: u8 = 0;
                    for dir in 0..4 {
                        if let Some(n) = chf.connected_index(cx, cz, i, dir) {
                            let rn = src_reg[n];
                            let nlid = if rn != NO_REGION {
                                regs[rn as usize].layer_id
                            } else {
                                NO_LAYER
                            };
                            if chf.areas[n] == NULL_AREA {
                                continue;
                            }
                            if nlid == cur_id {
                                let nx = cx + navtile_common::DIR_OFFSET_X[dir] - border_size;
                                let nz = cz + navtile_common::DIR_OFFSET_Z[dir] - border_size;
                                if nx >= 0 && nz >= 0 && nx < lw && nz < lh {
                                    con |= 1 << dir;
                                }
                            } else {
                                portal |= 1 << dir;
                                // Keep the height consistent on both sides
                                // of the portal.
                                let nspan = chf.spans[n];
                                if nspan.y as i32 > hmin {
                                    let ph = (nspan.y as i32 - hmin).min(255) as u8;
                                    layer.grids.heights[idx] =
                                        layer.grids.heights[idx].max(ph);
                                }
                            }
                        }
                    }
                    layer.grids.cons[idx] = (portal << 4) | con;
                }
            }
        }

        if layer.minx > layer.maxx {
            layer.minx = 0;
            layer.maxx = 0;
        }
        if layer.miny > layer.maxy {
            layer.miny = 0;
            layer.maxy = 0;
        }
        layers.push(layer);
    }

    Ok(layers)
}

/// Monotone sweep partitioning of walkable spans into at most 255 regions.
fn partition_monotone(chf: &CompactHeightfield, border_size: i32) -> Result<(Vec<u8>, u16)> {
    let w = chf.width;
    let h = chf.height;
    let mut src_reg = vec![NO_REGION; chf.spans.len()];
    let mut region_id: u16 = 0;

    struct Sweep {
        id: u8,
        nei: u8,
        ns: u16,
    }

    let mut prev_counts: Vec<u16> = vec![0; 256];

    for z in border_size..h - border_size {
        let mut sweeps: Vec<Sweep> = Vec::new();
        prev_counts.iter_mut().for_each(|c| *c = 0);

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if chf.areas[i] == NULL_AREA {
                    continue;
                }

                let mut sid = NO_REGION;
                if let Some(n) = chf.connected_index(x, z, i, 0) {
                    if src_reg[n] != NO_REGION {
                        sid = src_reg[n];
                    }
                }
                if sid == NO_REGION {
                    if sweeps.len() >= NO_REGION as usize {
                        return Err(Error::Build("too many sweeps in row".to_string()));
                    }
                    sid = sweeps.len() as u8;
                    sweeps.push(Sweep {
                        id: 0,
                        nei: NO_REGION,
                        ns: 0,
                    });
                }

                if let Some(n) = chf.connected_index(x, z, i, 3) {
                    let nr = src_reg[n];
                    if nr != NO_REGION {
                        let sweep = &mut sweeps[sid as usize];
                        if sweep.ns == 0 {
                            sweep.nei = nr;
                        }
                        if sweep.nei == nr {
                            sweep.ns += 1;
                            prev_counts[nr as usize] += 1;
                        } else {
                            sweep.nei = NO_REGION;
                        }
                    }
                }

                src_reg[i] = sid;
            }
        }

        // A sweep joins its previous-row region only as a sole successor.
        for sweep in &mut sweeps {
            if sweep.nei != NO_REGION && prev_counts[sweep.nei as usize] == sweep.ns {
                sweep.id = sweep.nei;
            } else {
                if region_id >= 255 {
                    return Err(Error::Build(
                        "too many layer regions in tile".to_string(),
                    ));
                }
                sweep.id = region_id as u8;
                region_id += 1;
            }
        }

        for x in border_size..w - border_size {
            let cell = chf.cell(x, z);
            for i in cell.index as usize..(cell.index + cell.count) as usize {
                if src_reg[i] != NO_REGION {
                    src_reg[i] = sweeps[src_reg[i] as usize].id;
                }
            }
        }
    }

    Ok((src_reg, region_id))
}

/// Merges base layers whose height ranges come within `merge_height` of each
/// other, provided none of their regions overlap vertically.
fn merge_close_layers(regs: &mut [LayerRegion], merge_height: i32) {
    for i in 0..regs.len() {
        if !regs[i].base {
            continue;
        }
        loop {
            let new_id = regs[i].layer_id;
            let mut merge_from = NO_LAYER;

            for j in 0..regs.len() {
                if i == j || !regs[j].base || regs[j].layer_id == new_id {
                    continue;
                }
                let (imin, imax) = (regs[i].ymin as i32, regs[i].ymax as i32);
                let (jmin, jmax) = (regs[j].ymin as i32, regs[j].ymax as i32);
                if !navtile_common::overlap_range(
                    imin,
                    imax + merge_height,
                    jmin,
                    jmax + merge_height,
                ) {
                    continue;
                }
                if imax.max(jmax) - imin.min(jmin) >= 255 {
                    continue;
                }
                // Reject the merge when any region of one layer is stacked
                // over a region of the other.
                let old_id = regs[j].layer_id;
                let mut overlaps = false;
                'outer: for (k, rk) in regs.iter().enumerate() {
                    if rk.layer_id != old_id {
                        continue;
                    }
                    for &l in &rk.layers {
                        if regs[l as usize].layer_id == new_id && l as usize != k {
                            overlaps = true;
                            break 'outer;
                        }
                    }
                }
                if !overlaps {
                    merge_from = old_id;
                    break;
                }
            }

            if merge_from == NO_LAYER {
                break;
            }

            let mut merged_ymin = regs[i].ymin;
            let mut merged_ymax = regs[i].ymax;
            for reg in regs.iter_mut() {
                if reg.layer_id == merge_from {
                    reg.base = false;
                    reg.layer_id = new_id;
                    merged_ymin = merged_ymin.min(reg.ymin);
                    merged_ymax = merged_ymax.max(reg.ymax);
                }
            }
            regs[i].ymin = merged_ymin;
            regs[i].ymax = merged_ymax;
        }
    }
}

fn add_unique(list: &mut Vec<u8>, value: u8) {
    if !list.contains(&value) {
        list.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightfield::Heightfield;
    use navtile_common::WALKABLE_AREA;

    /// Flat 12x12 floor with a 2-cell border.
    fn flat_compact() -> CompactHeightfield {
        let mut hf = Heightfield::new(
            12,
            12,
            Vec3::ZERO,
            Vec3::new(12.0, 20.0, 12.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..12 {
            for x in 0..12 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
            }
        }
        CompactHeightfield::build(&hf, 2, 1, 2).unwrap()
    }

    #[test]
    fn test_flat_ground_single_layer() {
        let chf = flat_compact();
        let layers = build_heightfield_layers(&chf, 2, 2).unwrap();

        assert_eq!(layers.len(), 1);
        let layer = &layers[0];
        assert_eq!(layer.width, 8);
        assert_eq!(layer.height, 8);
        assert_eq!(layer.hmin, 2);

        // Every core cell is present with height 0 relative to hmin.
        for z in 0..8 {
            for x in 0..8 {
                let idx = (x + z * 8) as usize;
                assert_eq!(layer.grids.heights[idx], 0);
                assert_eq!(layer.grids.areas[idx], WALKABLE_AREA);
            }
        }

        // Interior cells connect in all four directions.
        let idx = (4 + 4 * 8) as usize;
        assert_eq!(layer.grids.cons[idx] & 0x0f, 0x0f);
    }

    #[test]
    fn test_stacked_floors_produce_two_layers() {
        // Ground floor plus an elevated slab well above climb range.
        let mut hf = Heightfield::new(
            8,
            8,
            Vec3::ZERO,
            Vec3::new(8.0, 40.0, 8.0),
            1.0,
            1.0,
        )
        .unwrap();
        for z in 0..8 {
            for x in 0..8 {
                hf.add_span(x, z, 0, 2, WALKABLE_AREA, 1).unwrap();
                hf.add_span(x, z, 18, 20, WALKABLE_AREA, 1).unwrap();
            }
        }
        let chf = CompactHeightfield::build(&hf, 2, 1, 0).unwrap();
        let layers = build_heightfield_layers(&chf, 0, 2).unwrap();

        assert_eq!(layers.len(), 2);
        let mut mins: Vec<i32> = layers.iter().map(|l| l.hmin).collect();
        mins.sort_unstable();
        assert_eq!(mins, vec![2, 20]);
    }

    #[test]
    fn test_empty_field_yields_no_layers() {
        let hf = Heightfield::new(
            4,
            4,
            Vec3::ZERO,
            Vec3::new(4.0, 4.0, 4.0),
            1.0,
            1.0,
        )
        .unwrap();
        let chf = CompactHeightfield::build(&hf, 2, 1, 0).unwrap();
        let layers = build_heightfield_layers(&chf, 0, 2).unwrap();
        assert!(layers.is_empty());
    }
}
