//! Error types for virtual file reads

use crate::range::ByteRange;
use std::fmt;
use std::io;
use std::sync::Arc;

#[derive(Debug)]
pub enum VirtualFileError {
    /// The metadata resolver could not describe the path
    Metadata { path: String, source: io::Error },
    /// The host read channel failed for one chunk. The source is shared by
    /// every caller that was waiting on that chunk.
    ChunkRead {
        path: String,
        range: ByteRange,
        source: Arc<io::Error>,
    },
    /// The host returned fewer bytes than the chunk covers
    ShortRead {
        path: String,
        range: ByteRange,
        expected: u64,
        actual: u64,
    },
}

impl VirtualFileError {
    /// Byte range of the chunk that failed, if the error came from a read
    pub fn range(&self) -> Option<ByteRange> {
        match self {
            VirtualFileError::Metadata { .. } => None,
            VirtualFileError::ChunkRead { range, .. } | VirtualFileError::ShortRead { range, .. } => {
                Some(*range)
            }
        }
    }
}

impl fmt::Display for VirtualFileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VirtualFileError::Metadata { path, source } => {
                write!(f, "Metadata error for {}: {}", path, source)
            }
            VirtualFileError::ChunkRead {
                path,
                range,
                source,
            } => write!(f, "Read error for {} bytes {}: {}", path, range, source),
            VirtualFileError::ShortRead {
                path,
                range,
                expected,
                actual,
            } => write!(
                f,
                "Short read for {} bytes {}: expected {} bytes, got {}",
                path, range, expected, actual
            ),
        }
    }
}

impl std::error::Error for VirtualFileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VirtualFileError::Metadata { source, .. } => Some(source),
            VirtualFileError::ChunkRead { source, .. } => Some(source.as_ref()),
            VirtualFileError::ShortRead { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, VirtualFileError>;
