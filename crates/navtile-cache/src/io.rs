//! Tile set serialization.
//!
//! A tile set stream is a fixed header (magic, version, bounds, grid size,
//! mesh and cache parameters) followed by one record per stored layer: the
//! 54-byte layer header, a little-endian u32 payload length and the
//! compressed payload bytes. The stream ends exactly at a record boundary;
//! anything else is treated as corruption and fails the whole load.

use std::io::{Read, Write};

use glam::Vec3;
use navtile_common::{
    BoundingBox, CompressedLayer, Error, Result, TileLayerHeader, LAYER_HEADER_SIZE,
};

use crate::cache::TileCacheParams;
use crate::mesh::NavMeshParams;

/// Magic number identifying a tile set stream.
pub const TILE_SET_MAGIC: u32 = 0x4e54_5345; // 'NTSE'
/// Tile set stream version.
pub const TILE_SET_VERSION: u32 = 1;

/// Leading header of a serialized tile set.
#[derive(Debug, Clone, PartialEq)]
pub struct TileSetHeader {
    /// World bounds the tile grid was allocated over.
    pub bounds: BoundingBox,
    /// Number of tile columns along x.
    pub tiles_x: i32,
    /// Number of tile columns along z.
    pub tiles_y: i32,
    /// Parameters of the assembled mesh.
    pub mesh_params: NavMeshParams,
    /// Parameters of the tile cache.
    pub cache_params: TileCacheParams,
}

/// Writes a tile set stream.
pub fn write_tile_set<W: Write>(
    writer: &mut W,
    header: &TileSetHeader,
    layers: &[CompressedLayer],
) -> Result<()> {
    writer.write_all(&TILE_SET_MAGIC.to_le_bytes())?;
    writer.write_all(&TILE_SET_VERSION.to_le_bytes())?;
    write_vec3(writer, header.bounds.min)?;
    write_vec3(writer, header.bounds.max)?;
    writer.write_all(&header.tiles_x.to_le_bytes())?;
    writer.write_all(&header.tiles_y.to_le_bytes())?;

    let mp = &header.mesh_params;
    write_vec3(writer, mp.origin)?;
    writer.write_all(&mp.tile_width.to_le_bytes())?;
    writer.write_all(&mp.tile_height.to_le_bytes())?;
    writer.write_all(&mp.max_tiles.to_le_bytes())?;

    let cp = &header.cache_params;
    write_vec3(writer, cp.origin)?;
    writer.write_all(&cp.cs.to_le_bytes())?;
    writer.write_all(&cp.ch.to_le_bytes())?;
    writer.write_all(&cp.width.to_le_bytes())?;
    writer.write_all(&cp.height.to_le_bytes())?;
    writer.write_all(&cp.max_tiles.to_le_bytes())?;
    writer.write_all(&cp.max_layers.to_le_bytes())?;
    writer.write_all(&cp.max_obstacles.to_le_bytes())?;

    for layer in layers {
        write_layer_record(writer, layer)?;
    }
    Ok(())
}

/// Reads a tile set stream to its end.
///
/// Any truncation, bad magic or unsupported version aborts the whole load;
/// callers decode into fresh state and swap only on success.
pub fn read_tile_set<R: Read>(reader: &mut R) -> Result<(TileSetHeader, Vec<CompressedLayer>)> {
    let magic = read_u32(reader)?;
    if magic != TILE_SET_MAGIC {
        return Err(Error::Parse("bad tile set magic".to_string()));
    }
    let version = read_u32(reader)?;
    if version != TILE_SET_VERSION {
        return Err(Error::Parse(format!(
            "unsupported tile set version {version}"
        )));
    }

    let min = read_vec3(reader)?;
    let max = read_vec3(reader)?;
    let tiles_x = read_i32(reader)?;
    let tiles_y = read_i32(reader)?;
    if tiles_x <= 0 || tiles_y <= 0 {
        return Err(Error::Parse(
            "tile set grid dimensions out of range".to_string(),
        ));
    }

    let mesh_params = NavMeshParams {
        origin: read_vec3(reader)?,
        tile_width: read_f32(reader)?,
        tile_height: read_f32(reader)?,
        max_tiles: read_i32(reader)?,
    };
    let cache_params = TileCacheParams {
        origin: read_vec3(reader)?,
        cs: read_f32(reader)?,
        ch: read_f32(reader)?,
        width: read_i32(reader)?,
        height: read_i32(reader)?,
        max_tiles: read_i32(reader)?,
        max_layers: read_i32(reader)?,
        max_obstacles: read_i32(reader)?,
    };
    let header = TileSetHeader {
        bounds: BoundingBox::new(min, max),
        tiles_x,
        tiles_y,
        mesh_params,
        cache_params,
    };

    let mut layers = Vec::new();
    while let Some(layer) = read_layer_record(reader)? {
        layers.push(layer);
    }

    Ok((header, layers))
}

/// Writes one layer record: fixed header, payload length, payload.
pub(crate) fn write_layer_record<W: Write>(writer: &mut W, layer: &CompressedLayer) -> Result<()> {
    writer.write_all(&layer.header.to_bytes())?;
    let len = u32::try_from(layer.payload.len())
        .map_err(|_| Error::Parse("tile payload exceeds u32 length".to_string()))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&layer.payload)?;
    Ok(())
}

/// Reads the next layer record, or `None` on a clean end of stream.
pub(crate) fn read_layer_record<R: Read>(reader: &mut R) -> Result<Option<CompressedLayer>> {
    let mut header_buf = [0u8; LAYER_HEADER_SIZE];
    if !read_record_start(reader, &mut header_buf)? {
        return Ok(None);
    }
    let header = TileLayerHeader::from_bytes(&header_buf)?;
    let len = read_u32(reader)? as usize;
    // Three byte planes per cell plus worst-case compression overhead; a
    // longer payload cannot have come from the builder.
    let cell_count = header.width as usize * header.height as usize;
    let limit = cell_count * 3 + cell_count / 64 + 128;
    if len > limit {
        return Err(Error::Parse(format!(
            "layer payload length {len} exceeds limit {limit}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(truncated)?;
    Ok(Some(CompressedLayer { header, payload }))
}

/// Reads the fixed layer header of the next record. Returns false on a
/// clean end of stream; a partial header is corruption.
fn read_record_start<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(Error::Parse("tile set truncated mid-record".to_string()));
        }
        filled += n;
    }
    Ok(true)
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf).map_err(truncated)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_i32<R: Read>(reader: &mut R) -> Result<i32> {
    Ok(read_u32(reader)? as i32)
}

fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    Ok(f32::from_bits(read_u32(reader)?))
}

fn write_vec3<W: Write>(writer: &mut W, v: Vec3) -> Result<()> {
    writer.write_all(&v.x.to_le_bytes())?;
    writer.write_all(&v.y.to_le_bytes())?;
    writer.write_all(&v.z.to_le_bytes())?;
    Ok(())
}

fn read_vec3<R: Read>(reader: &mut R) -> Result<Vec3> {
    Ok(Vec3::new(
        read_f32(reader)?,
        read_f32(reader)?,
        read_f32(reader)?,
    ))
}

fn truncated(err: std::io::Error) -> Error {
    if err.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Parse("tile set truncated".to_string())
    } else {
        Error::Io(err)
    }
}
