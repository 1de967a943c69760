//! Triangle rasterization into the span heightfield.
//!
//! Each triangle is clipped against the grid rows and columns and the
//! clipped fragment's vertical extent becomes a solid span.

use glam::Vec3;
use navtile_common::{Result, NULL_AREA, WALKABLE_AREA};

use crate::heightfield::Heightfield;

/// Assigns `WALKABLE_AREA` to every triangle whose slope is within
/// `walkable_slope_angle` degrees, `NULL_AREA` otherwise.
pub fn mark_walkable_triangles(
    walkable_slope_angle: f32,
    vertices: &[Vec3],
    indices: &[u32],
) -> Vec<u8> {
    let walkable_limit = walkable_slope_angle.to_radians().cos();
    let mut areas = vec![NULL_AREA; indices.len() / 3];

    for (i, area) in areas.iter_mut().enumerate() {
        let a = vertices[indices[i * 3] as usize];
        let b = vertices[indices[i * 3 + 1] as usize];
        let c = vertices[indices[i * 3 + 2] as usize];
        let normal = (b - a).cross(c - a).normalize_or_zero();
        if normal.y > walkable_limit {
            *area = WALKABLE_AREA;
        }
    }
    areas
}

/// Rasterizes indexed triangles into `heightfield` with per-triangle areas.
pub fn rasterize_triangles(
    heightfield: &mut Heightfield,
    vertices: &[Vec3],
    indices: &[u32],
    areas: &[u8],
    flag_merge_threshold: i32,
) -> Result<()> {
    for (i, &area) in areas.iter().enumerate() {
        let v0 = vertices[indices[i * 3] as usize];
        let v1 = vertices[indices[i * 3 + 1] as usize];
        let v2 = vertices[indices[i * 3 + 2] as usize];
        rasterize_triangle(heightfield, v0, v1, v2, area, flag_merge_threshold)?;
    }
    Ok(())
}

/// Rasterizes one triangle into the heightfield.
pub fn rasterize_triangle(
    heightfield: &mut Heightfield,
    v0: Vec3,
    v1: Vec3,
    v2: Vec3,
    area: u8,
    flag_merge_threshold: i32,
) -> Result<()> {
    let inv_cs = 1.0 / heightfield.cs;
    let inv_ch = 1.0 / heightfield.ch;

    let tri_min = v0.min(v1).min(v2);
    let tri_max = v0.max(v1).max(v2);

    if tri_max.x < heightfield.bmin.x
        || tri_min.x > heightfield.bmax.x
        || tri_max.y < heightfield.bmin.y
        || tri_min.y > heightfield.bmax.y
        || tri_max.z < heightfield.bmin.z
        || tri_min.z > heightfield.bmax.z
    {
        return Ok(());
    }

    let x0 = (((tri_min.x - heightfield.bmin.x) * inv_cs) as i32).max(0);
    let x1 = (((tri_max.x - heightfield.bmin.x) * inv_cs) as i32).min(heightfield.width - 1);
    // Start one row early so the polygon is cut cleanly at the field edge.
    let z0 = (((tri_min.z - heightfield.bmin.z) * inv_cs) as i32).max(-1);
    let z1 = (((tri_max.z - heightfield.bmin.z) * inv_cs) as i32).min(heightfield.height - 1);

    // Clip the triangle row by row, then each row strip column by column.
    let mut remaining_rows = vec![v0, v1, v2];
    let mut row = Vec::with_capacity(7);
    let mut remaining_cols = Vec::with_capacity(7);
    let mut cell = Vec::with_capacity(7);

    for z in z0..=z1 {
        let row_max_z = heightfield.bmin.z + (z + 1) as f32 * heightfield.cs;
        let carried = divide_poly(&remaining_rows, row_max_z, Axis::Z, &mut row);
        remaining_rows = carried;

        if row.len() < 3 || z < 0 {
            continue;
        }

        remaining_cols.clear();
        remaining_cols.extend_from_slice(&row);

        for x in x0..=x1 {
            let col_max_x = heightfield.bmin.x + (x + 1) as f32 * heightfield.cs;
            let carried = divide_poly(&remaining_cols, col_max_x, Axis::X, &mut cell);
            remaining_cols = carried;

            if cell.len() < 3 {
                continue;
            }

            let mut min_y = cell[0].y;
            let mut max_y = cell[0].y;
            for v in &cell[1..] {
                min_y = min_y.min(v.y);
                max_y = max_y.max(v.y);
            }

            if max_y < heightfield.bmin.y || min_y > heightfield.bmax.y {
                continue;
            }

            let smin = (((min_y - heightfield.bmin.y) * inv_ch).floor() as i32)
                .clamp(0, u16::MAX as i32 - 1);
            let smax = (((max_y - heightfield.bmin.y) * inv_ch).ceil() as i32)
                .max(smin + 1)
                .min(u16::MAX as i32);

            heightfield.add_span(x, z, smin as u16, smax as u16, area, flag_merge_threshold)?;
        }
    }

    Ok(())
}

#[derive(Clone, Copy)]
enum Axis {
    X,
    Z,
}

/// Splits a convex polygon by an axis-aligned line. The part below the line
/// lands in `below`; the part at or above it is returned for the next slice.
fn divide_poly(poly: &[Vec3], offset: f32, axis: Axis, below: &mut Vec<Vec3>) -> Vec<Vec3> {
    below.clear();
    let mut above = Vec::with_capacity(poly.len() + 1);
    if poly.is_empty() {
        return above;
    }

    let coord = |v: &Vec3| match axis {
        Axis::X => v.x,
        Axis::Z => v.z,
    };

    let n = poly.len();
    for i in 0..n {
        let j = (i + 1) % n;
        let vi = poly[i];
        let vj = poly[j];
        let di = coord(&vi) - offset;
        let dj = coord(&vj) - offset;

        if di < 0.0 {
            below.push(vi);
        } else {
            above.push(vi);
            if di == 0.0 {
                below.push(vi);
                continue;
            }
        }

        // Edge crosses the line: emit the intersection to both sides.
        if (di < 0.0) != (dj < 0.0) && dj != 0.0 {
            let t = di / (di - dj);
            let p = vi + (vj - vi) * t;
            below.push(p);
            above.push(p);
        }
    }

    above
}
