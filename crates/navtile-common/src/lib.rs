//! Common utilities and data structures shared by the tile builder and the
//! tile cache.

mod bbox;
mod compression;
mod math;
mod tile_data;

pub use bbox::*;
pub use compression::*;
pub use math::*;
pub use tile_data::*;

/// Represents a 3D position
pub type Vec3 = glam::Vec3;

/// Error types for the library
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Fatal configuration problem detected at init time.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An argument was out of range or referred to nothing.
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    /// A reference did not resolve to a live tile or obstacle.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request queue is full; drive `update()` and retry.
    #[error("request queue is full")]
    Busy,

    /// A fixed-capacity store is exhausted (tile slots, layer count).
    #[error("capacity exhausted: {0}")]
    Full(String),

    /// A single tile's build pipeline failed.
    #[error("tile build failed: {0}")]
    Build(String),

    /// Malformed serialized tile-set stream.
    #[error("parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for conditions the caller is expected to retry after draining
    /// the update loop or freeing space.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy)
    }
}

/// Result type for navtile operations
pub type Result<T> = std::result::Result<T, Error>;
