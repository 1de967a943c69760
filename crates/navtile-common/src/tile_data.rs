//! Tile layer header and grid payload formats.
//!
//! A compressed tile layer is the unit of storage in the cache: a fixed-size
//! header describing the layer, plus an opaque compressed payload holding
//! the per-cell height/area/connectivity grids.

use glam::Vec3;

use crate::{Error, Result};

/// Magic number identifying a tile layer header.
pub const LAYER_MAGIC: u32 = 0x4e54_4c52; // 'NTLR'
/// Tile layer format version.
pub const LAYER_VERSION: u32 = 1;
/// Serialized header size in bytes.
pub const LAYER_HEADER_SIZE: usize = 54;

/// Cell value meaning "no surface in this layer".
pub const LAYER_EMPTY_HEIGHT: u8 = 0xff;

/// Header for one compressed navigation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct TileLayerHeader {
    /// Magic number for validation
    pub magic: u32,
    /// Format version
    pub version: u32,
    /// Tile column x coordinate
    pub tx: i32,
    /// Tile column z coordinate
    pub ty: i32,
    /// Vertical layer index within the column
    pub tlayer: i32,
    /// Layer bounds minimum, local coordinates
    pub bmin: Vec3,
    /// Layer bounds maximum, local coordinates
    pub bmax: Vec3,
    /// Minimum height (cell units) over the layer
    pub hmin: u16,
    /// Maximum height (cell units) over the layer
    pub hmax: u16,
    /// Grid width in cells
    pub width: u8,
    /// Grid height (depth) in cells
    pub height: u8,
    /// Minimum x of used cells
    pub minx: u8,
    /// Maximum x of used cells
    pub maxx: u8,
    /// Minimum z of used cells
    pub miny: u8,
    /// Maximum z of used cells
    pub maxy: u8,
}

impl TileLayerHeader {
    /// Validates magic and version.
    pub fn validate(&self) -> Result<()> {
        if self.magic != LAYER_MAGIC {
            return Err(Error::Parse("bad tile layer magic".to_string()));
        }
        if self.version != LAYER_VERSION {
            return Err(Error::Parse(format!(
                "unsupported tile layer version {}",
                self.version
            )));
        }
        Ok(())
    }

    /// Serializes the header to its fixed-width little-endian form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(LAYER_HEADER_SIZE);
        out.extend_from_slice(&self.magic.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&self.tx.to_le_bytes());
        out.extend_from_slice(&self.ty.to_le_bytes());
        out.extend_from_slice(&self.tlayer.to_le_bytes());
        for v in [self.bmin, self.bmax] {
            out.extend_from_slice(&v.x.to_le_bytes());
            out.extend_from_slice(&v.y.to_le_bytes());
            out.extend_from_slice(&v.z.to_le_bytes());
        }
        out.extend_from_slice(&self.hmin.to_le_bytes());
        out.extend_from_slice(&self.hmax.to_le_bytes());
        out.extend_from_slice(&[
            self.width, self.height, self.minx, self.maxx, self.miny, self.maxy,
        ]);
        debug_assert_eq!(out.len(), LAYER_HEADER_SIZE);
        out
    }

    /// Deserializes and validates a header from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < LAYER_HEADER_SIZE {
            return Err(Error::Parse("truncated tile layer header".to_string()));
        }
        let mut cur = Cursor { data, pos: 0 };
        let header = Self {
            magic: cur.u32(),
            version: cur.u32(),
            tx: cur.i32(),
            ty: cur.i32(),
            tlayer: cur.i32(),
            bmin: Vec3::new(cur.f32(), cur.f32(), cur.f32()),
            bmax: Vec3::new(cur.f32(), cur.f32(), cur.f32()),
            hmin: cur.u16(),
            hmax: cur.u16(),
            width: cur.u8(),
            height: cur.u8(),
            minx: cur.u8(),
            maxx: cur.u8(),
            miny: cur.u8(),
            maxy: cur.u8(),
        };
        header.validate()?;
        Ok(header)
    }
}

/// Uncompressed per-cell grids of one layer: heights, area ids and packed
/// connectivity flags, each `width * height` bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerGrids {
    /// Cell heights relative to the layer's `hmin`; `LAYER_EMPTY_HEIGHT`
    /// marks cells with no surface in this layer.
    pub heights: Vec<u8>,
    /// Per-cell area ids (`NULL_AREA` = not walkable).
    pub areas: Vec<u8>,
    /// Packed connectivity: low nibble holds walk connections in the four
    /// cardinal directions, high nibble portals to other layers.
    pub cons: Vec<u8>,
}

impl LayerGrids {
    /// Creates empty grids for a `width * height` layer.
    pub fn new(cell_count: usize) -> Self {
        Self {
            heights: vec![LAYER_EMPTY_HEIGHT; cell_count],
            areas: vec![0; cell_count],
            cons: vec![0; cell_count],
        }
    }

    /// Concatenates the grids into the flat payload that gets compressed.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.heights.len() * 3);
        out.extend_from_slice(&self.heights);
        out.extend_from_slice(&self.areas);
        out.extend_from_slice(&self.cons);
        out
    }

    /// Splits a flat payload back into grids for a `width * height` layer.
    pub fn from_bytes(data: &[u8], cell_count: usize) -> Result<Self> {
        if data.len() != cell_count * 3 {
            return Err(Error::Parse(format!(
                "layer payload size mismatch: got {}, expected {}",
                data.len(),
                cell_count * 3
            )));
        }
        Ok(Self {
            heights: data[..cell_count].to_vec(),
            areas: data[cell_count..cell_count * 2].to_vec(),
            cons: data[cell_count * 2..].to_vec(),
        })
    }
}

/// One compressed navigation layer: header plus opaque compressed grids.
#[derive(Debug, Clone)]
pub struct CompressedLayer {
    /// Layer header (stored uncompressed).
    pub header: TileLayerHeader,
    /// Compressed `LayerGrids` payload.
    pub payload: Vec<u8>,
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn take<const N: usize>(&mut self) -> [u8; N] {
        let mut buf = [0u8; N];
        buf.copy_from_slice(&self.data[self.pos..self.pos + N]);
        self.pos += N;
        buf
    }

    fn u32(&mut self) -> u32 {
        u32::from_le_bytes(self.take())
    }

    fn i32(&mut self) -> i32 {
        i32::from_le_bytes(self.take())
    }

    fn f32(&mut self) -> f32 {
        f32::from_le_bytes(self.take())
    }

    fn u16(&mut self) -> u16 {
        u16::from_le_bytes(self.take())
    }

    fn u8(&mut self) -> u8 {
        let b = self.data[self.pos];
        self.pos += 1;
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> TileLayerHeader {
        TileLayerHeader {
            magic: LAYER_MAGIC,
            version: LAYER_VERSION,
            tx: 3,
            ty: -2,
            tlayer: 1,
            bmin: Vec3::new(-1.0, 0.0, -1.0),
            bmax: Vec3::new(8.6, 2.5, 8.6),
            hmin: 4,
            hmax: 19,
            width: 38,
            height: 38,
            minx: 2,
            maxx: 35,
            miny: 0,
            maxy: 37,
        }
    }

    #[test]
    fn test_header_round_trip() {
        let header = sample_header();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), LAYER_HEADER_SIZE);

        let restored = TileLayerHeader::from_bytes(&bytes).unwrap();
        assert_eq!(restored, header);
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let mut bytes = sample_header().to_bytes();
        bytes[0] ^= 0xff;
        assert!(TileLayerHeader::from_bytes(&bytes).is_err());
    }

    #[test]
    fn test_header_rejects_truncation() {
        let bytes = sample_header().to_bytes();
        assert!(TileLayerHeader::from_bytes(&bytes[..20]).is_err());
    }

    #[test]
    fn test_grids_round_trip() {
        let mut grids = LayerGrids::new(16);
        grids.heights[5] = 7;
        grids.areas[5] = 63;
        grids.cons[5] = 0x0f;

        let bytes = grids.to_bytes();
        let restored = LayerGrids::from_bytes(&bytes, 16).unwrap();
        assert_eq!(restored, grids);

        assert!(LayerGrids::from_bytes(&bytes, 15).is_err());
    }
}
