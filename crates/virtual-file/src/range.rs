//! Half-open byte ranges and chunk arithmetic

use serde::{Deserialize, Serialize};
use std::fmt;

/// A half-open range of bytes `[start, end)`.
///
/// Also the cache key for a chunk: a chunk is identified by its own byte
/// range, clipped to the file size for the final chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Create a range; an `end` before `start` yields an empty range at `start`
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Byte count; a range built with `end` before `start` is empty
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Resolve Blob-style `slice` indices against a total `size`.
    ///
    /// Negative indices count back from `size`, out-of-range indices are
    /// clamped to `[0, size]`, and an end before the start gives an empty
    /// range. Missing indices default to the whole extent.
    pub fn resolve(size: u64, start: Option<i64>, end: Option<i64>) -> Self {
        let start = start.map_or(0, |index| relative_index(index, size));
        let end = end.map_or(size, |index| relative_index(index, size));
        Self::new(start, end)
    }

    /// Clamp both bounds to `[0, size]`
    pub fn clamp_to(&self, size: u64) -> Self {
        Self::new(self.start.min(size), self.end.min(size))
    }

    /// Chunk-aligned ranges covering this range, in ascending offset order.
    ///
    /// Covers chunk indices `floor(start / chunk_size)` through
    /// `ceil(end / chunk_size) - 1`, each clipped to `file_size`.
    pub fn covering_chunks(&self, chunk_size: u64, file_size: u64) -> impl Iterator<Item = ByteRange> {
        let chunk_size = chunk_size.max(1);
        let (first, last) = if self.is_empty() {
            (1, 0)
        } else {
            (self.start / chunk_size, (self.end - 1) / chunk_size)
        };

        (first..=last).map(move |index| {
            let start = index * chunk_size;
            ByteRange::new(start, (start + chunk_size).min(file_size))
        })
    }

    /// The chunk containing `offset`, clipped to `file_size`
    pub fn chunk_at(offset: u64, chunk_size: u64, file_size: u64) -> Self {
        let chunk_size = chunk_size.max(1);
        let start = offset / chunk_size * chunk_size;
        ByteRange::new(start, (start + chunk_size).min(file_size))
    }
}

fn relative_index(index: i64, size: u64) -> u64 {
    if index < 0 {
        size.saturating_sub(index.unsigned_abs())
    } else {
        (index as u64).min(size)
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
