//! Cache and chunking configuration

use crate::types::FailurePolicy;

/// Default chunk size: 1 MiB
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;
/// Default maximum number of cached chunks
pub const DEFAULT_MAX_CHUNKS: usize = 64;
/// Default maximum aggregate size of cached chunks: 64 MiB
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for a virtual file's chunking and chunk cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFileConfig {
    /// Size of each host read, in bytes
    pub chunk_size: u64,
    /// Maximum number of chunks held in the cache
    pub max_chunks: usize,
    /// Maximum aggregate bytes held in the cache
    pub max_cache_bytes: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for VirtualFileConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_chunks: DEFAULT_MAX_CHUNKS,
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl VirtualFileConfig {
    /// Load configuration from the environment, falling back to defaults for
    /// missing or unparseable values.
    ///
    /// Reads `VIRTUAL_FILE_CHUNK_SIZE`, `VIRTUAL_FILE_MAX_CHUNKS`,
    /// `VIRTUAL_FILE_MAX_CACHE_BYTES` and `VIRTUAL_FILE_FAILURE_POLICY`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let chunk_size = lookup("VIRTUAL_FILE_CHUNK_SIZE")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.chunk_size);

        let max_chunks = lookup("VIRTUAL_FILE_MAX_CHUNKS")
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_chunks);

        let max_cache_bytes = lookup("VIRTUAL_FILE_MAX_CACHE_BYTES")
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(defaults.max_cache_bytes);

        let failure_policy = lookup("VIRTUAL_FILE_FAILURE_POLICY")
            .and_then(|s| s.parse::<FailurePolicy>().ok())
            .unwrap_or(defaults.failure_policy);

        Self {
            chunk_size,
            max_chunks,
            max_cache_bytes,
            failure_policy,
        }
        .normalized()
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self.normalized()
    }

    pub fn with_cache_limits(mut self, max_chunks: usize, max_cache_bytes: u64) -> Self {
        self.max_chunks = max_chunks;
        self.max_cache_bytes = max_cache_bytes;
        self
    }

    pub fn with_failure_policy(mut self, failure_policy: FailurePolicy) -> Self {
        self.failure_policy = failure_policy;
        self
    }

    // Zero-sized chunks would never cover any bytes
    fn normalized(mut self) -> Self {
        self.chunk_size = self.chunk_size.max(1);
        self
    }
}
