//! In-memory host used by the unit tests

use crate::channel::{HostReadChannel, MetadataResolver};
use crate::range::ByteRange;
use crate::types::FileMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Route log output through the test harness; filter with `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Deterministic file content: byte `i` is `i % 251`
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Serves a single in-memory file and records every read
pub struct FakeHost {
    data: Bytes,
    mime_type: String,
    calls: Mutex<Vec<ByteRange>>,
    failures: AtomicUsize,
}

impl FakeHost {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            mime_type: "audio/mpeg".to_string(),
            calls: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn with_pattern(len: usize) -> Self {
        Self::new(pattern(len))
    }

    /// Fail the next `count` reads
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<ByteRange> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn metadata(&self) -> FileMetadata {
        FileMetadata {
            display_name: "fake.mp3".to_string(),
            total_size_bytes: self.data.len() as u64,
            mime_type: self.mime_type.clone(),
        }
    }
}

#[async_trait]
impl HostReadChannel for FakeHost {
    async fn read(&self, _path: &str, start: u64, end: u64) -> io::Result<Bytes> {
        self.calls.lock().unwrap().push(ByteRange::new(start, end));

        // Give concurrent readers a chance to observe the in-flight read
        tokio::task::yield_now().await;

        let should_fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if should_fail {
            return Err(io::Error::other("host read failed"));
        }

        let len = self.data.len() as u64;
        Ok(self.data.slice(start.min(len) as usize..end.min(len) as usize))
    }
}

#[async_trait]
impl MetadataResolver for FakeHost {
    async fn resolve(&self, path: &str) -> io::Result<FileMetadata> {
        if path == "missing" {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such file"));
        }
        Ok(self.metadata())
    }
}
