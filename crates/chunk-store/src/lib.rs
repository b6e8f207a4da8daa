//! In-memory LRU cache with a dual bound
//!
//! Holds values keyed by an arbitrary identity (typically a byte range) and
//! evicts least-recently-used entries until both the entry count and the
//! aggregate size of the cached values are within their limits. Value sizes
//! come from a caller-supplied sizing function, so the store works equally
//! well for resolved buffers and for handles to data that is still in flight.

mod cache;
mod types;

pub use cache::{ChunkStore, Iter};
pub use types::CacheStats;
