//! Capabilities a virtual file needs from the host that owns the data

use crate::types::FileMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;

/// Reads raw bytes of a host file.
///
/// Implementations must tolerate concurrent calls for disjoint ranges and
/// repeated calls for the same range. A range reaching past the end of the
/// file returns only the bytes that exist.
#[async_trait]
pub trait HostReadChannel: Send + Sync {
    /// Read bytes `[start, end)` of `path`
    async fn read(&self, path: &str, start: u64, end: u64) -> io::Result<Bytes>;
}

/// Describes a host file before any of its bytes are read
#[async_trait]
pub trait MetadataResolver: Send + Sync {
    async fn resolve(&self, path: &str) -> io::Result<FileMetadata>;
}
