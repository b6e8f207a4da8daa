//! Lazy, chunk-cached access to files that live outside the process
//!
//! A [`VirtualFile`] presents a host-managed file as a randomly addressable
//! byte source without loading it. Reads are split into fixed-size chunks,
//! fetched through a [`HostReadChannel`], and kept in an LRU bounded by both
//! chunk count and total bytes. Concurrent reads of the same chunk share a
//! single host call.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use virtual_file::{LocalFs, VirtualFile, VirtualFileConfig};
//!
//! # async fn example() -> virtual_file::Result<()> {
//! let local = Arc::new(LocalFs::new());
//! let config = VirtualFileConfig::from_env();
//! let file = VirtualFile::open("/books/long.m4b", local.as_ref(), local.clone(), &config).await?;
//!
//! // Probe the container header without reading the rest of the file
//! let header = file.slice(Some(0), Some(64 * 1024));
//! let bytes = header.array_buffer().await?;
//! println!("{} of {} bytes", bytes.len(), file.size());
//!
//! file.dispose();
//! # Ok(())
//! # }
//! ```

mod blob;
mod channel;
mod config;
mod error;
mod file;
mod local;
mod range;
mod reader;
mod types;

#[cfg(test)]
mod testing;

pub use blob::{BlobLike, DeferredBlob};
pub use channel::{HostReadChannel, MetadataResolver};
pub use config::{
    VirtualFileConfig, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_CACHE_BYTES, DEFAULT_MAX_CHUNKS,
};
pub use error::{Result, VirtualFileError};
pub use file::VirtualFile;
pub use local::{mime_type_for, LocalFs};
pub use range::ByteRange;
pub use reader::VirtualFileReader;
pub use types::{ChunkState, FailurePolicy, FileMetadata, VirtualFileStats};

pub use chunk_store::CacheStats;
