//! Linear scratch allocator for per-rebuild buffers.

use std::ops::Range;

use navtile_common::{Error, Result};

/// Bump allocator backing the scratch buffers of a tile rebuild.
///
/// Allocations are byte ranges into one arena. Individual frees are a
/// no-op; `reset()` reclaims everything at once at the start of the next
/// rebuild. The arena never grows implicitly: an allocation past the
/// capacity fails, and the caller decides whether to `resize()`.
#[derive(Debug)]
pub struct LinearAllocator {
    buffer: Vec<u8>,
    top: usize,
    high: usize,
}

impl LinearAllocator {
    /// Creates an allocator with `capacity` bytes of arena.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity],
            top: 0,
            high: 0,
        }
    }

    /// Arena capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Largest total allocation observed since construction.
    pub fn high_water(&self) -> usize {
        self.high
    }

    /// Reclaims all allocations.
    pub fn reset(&mut self) {
        self.high = self.high.max(self.top);
        self.top = 0;
    }

    /// Grows the arena to `capacity` bytes. Shrinking is ignored.
    pub fn resize(&mut self, capacity: usize) {
        if capacity > self.buffer.len() {
            self.buffer.resize(capacity, 0);
        }
    }

    /// Allocates `size` bytes, returning their range in the arena.
    pub fn alloc(&mut self, size: usize) -> Result<Range<usize>> {
        let start = self.top;
        let end = start.checked_add(size).ok_or_else(|| {
            Error::Full("scratch allocation overflows".to_string())
        })?;
        if end > self.buffer.len() {
            return Err(Error::Full(format!(
                "scratch arena exhausted: need {end}, capacity {}",
                self.buffer.len()
            )));
        }
        self.top = end;
        self.buffer[start..end].fill(0);
        Ok(start..end)
    }

    /// Mutable view of an allocated range.
    pub fn slice_mut(&mut self, range: Range<usize>) -> &mut [u8] {
        &mut self.buffer[range]
    }

    /// Shared view of an allocated range.
    pub fn slice(&self, range: Range<usize>) -> &[u8] {
        &self.buffer[range]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_reset() {
        let mut arena = LinearAllocator::new(64);
        let a = arena.alloc(16).unwrap();
        let b = arena.alloc(16).unwrap();
        assert_eq!(a, 0..16);
        assert_eq!(b, 16..32);

        arena.slice_mut(a.clone())[0] = 7;
        assert_eq!(arena.slice(a)[0], 7);

        arena.reset();
        assert_eq!(arena.high_water(), 32);
        let c = arena.alloc(8).unwrap();
        assert_eq!(c, 0..8);
        // Reused memory comes back zeroed.
        assert_eq!(arena.slice(c)[0], 0);
    }

    #[test]
    fn test_exhaustion_fails_without_growing() {
        let mut arena = LinearAllocator::new(8);
        assert!(arena.alloc(16).is_err());
        assert_eq!(arena.capacity(), 8);

        arena.resize(32);
        assert!(arena.alloc(16).is_ok());
    }
}
