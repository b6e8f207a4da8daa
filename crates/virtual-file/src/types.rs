//! Core types for virtual files

use chunk_store::CacheStats;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Description of a host file, as returned by a metadata resolver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub display_name: String,
    pub total_size_bytes: u64,
    pub mime_type: String,
}

/// What happens to a cached chunk whose host read failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Drop the failed chunk so the next access fetches it again
    #[default]
    Purge,
    /// Keep the failure cached until the chunk is evicted or the file is
    /// disposed
    Retain,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "purge" => Ok(FailurePolicy::Purge),
            "retain" => Ok(FailurePolicy::Retain),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::Purge => f.write_str("purge"),
            FailurePolicy::Retain => f.write_str("retain"),
        }
    }
}

/// Cache state of one chunk of a virtual file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkState {
    /// Not in the cache; the next access issues a host read
    Unrequested,
    /// A host read is in flight and shared by every waiter
    Pending,
    /// Bytes are cached
    Resolved,
    /// The host read failed and the failure is cached
    Rejected,
}

/// Statistics for one virtual file
#[derive(Debug, Clone, Default, Serialize)]
pub struct VirtualFileStats {
    pub size: u64,
    pub chunk_size: u64,
    pub host_reads: u64,
    pub cache: CacheStats,
}
