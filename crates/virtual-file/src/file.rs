//! Lazily fetched, chunk-cached view of a host file

use crate::blob::DeferredBlob;
use crate::channel::{HostReadChannel, MetadataResolver};
use crate::config::VirtualFileConfig;
use crate::error::{Result, VirtualFileError};
use crate::range::ByteRange;
use crate::reader::VirtualFileReader;
use crate::types::{ChunkState, FailurePolicy, FileMetadata, VirtualFileStats};
use bytes::{Bytes, BytesMut};
use chunk_store::ChunkStore;
use futures::future::{try_join_all, BoxFuture, Shared, WeakShared};
use futures::FutureExt;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace, warn};

/// Why a chunk fetch failed. Cloneable so every waiter on a shared fetch
/// receives the same failure.
#[derive(Debug, Clone)]
enum FetchFailure {
    Host(Arc<io::Error>),
    Short { expected: u64, actual: u64 },
}

type FetchFuture = BoxFuture<'static, std::result::Result<Bytes, FetchFailure>>;
type ChunkFetch = Shared<FetchFuture>;

/// One cached chunk: the shared host read for `range`.
///
/// The future is stored before it is first polled, so every request for the
/// same chunk awaits the same host call.
#[derive(Clone)]
struct ChunkSlot {
    /// Distinguishes successive fetches of the same range
    id: u64,
    range: ByteRange,
    fetch: ChunkFetch,
}

/// A fetch that has not settled yet, tracked independently of the LRU
struct InFlight {
    id: u64,
    fetch: WeakShared<FetchFuture>,
}

impl InFlight {
    /// The slot for this fetch, if some caller still holds it
    fn upgrade(&self, range: ByteRange) -> Option<ChunkSlot> {
        self.fetch.upgrade().map(|fetch| ChunkSlot {
            id: self.id,
            range,
            fetch,
        })
    }
}

/// Everything guarded by the file's lock
struct Chunks {
    store: ChunkStore<ByteRange, ChunkSlot>,
    /// Unsettled fetches, including ones the store has already evicted
    in_flight: HashMap<ByteRange, InFlight>,
}

struct Inner {
    path: String,
    name: String,
    mime_type: String,
    size: u64,
    chunk_size: u64,
    failure_policy: FailurePolicy,
    channel: Arc<dyn HostReadChannel>,
    chunks: Mutex<Chunks>,
    next_fetch_id: AtomicU64,
    host_reads: Arc<AtomicU64>,
}

/// A read-only, randomly addressable view of a file that lives with the host.
///
/// Only the chunks a read touches are fetched, through the file's
/// [`HostReadChannel`]. Fetched chunks are kept in an LRU bounded by both
/// chunk count and total bytes. Concurrent reads of the same chunk share a
/// single host call.
///
/// Clones are handles to the same file and share its cache. Call
/// [`VirtualFile::dispose`] when the file is no longer needed.
#[derive(Clone)]
pub struct VirtualFile {
    inner: Arc<Inner>,
}

impl VirtualFile {
    /// Resolve `path` through `resolver` and build a virtual file over it
    pub async fn open<R>(
        path: impl Into<String>,
        resolver: &R,
        channel: Arc<dyn HostReadChannel>,
        config: &VirtualFileConfig,
    ) -> Result<Self>
    where
        R: MetadataResolver + ?Sized,
    {
        let path = path.into();

        let metadata = match resolver.resolve(&path).await {
            Ok(metadata) => metadata,
            Err(source) => {
                warn!(path = %path, error = %source, "Failed to resolve file metadata");
                return Err(VirtualFileError::Metadata { path, source });
            }
        };

        Ok(Self::with_metadata(path, metadata, channel, config))
    }

    /// Build a virtual file from metadata that is already known
    pub fn with_metadata(
        path: impl Into<String>,
        metadata: FileMetadata,
        channel: Arc<dyn HostReadChannel>,
        config: &VirtualFileConfig,
    ) -> Self {
        let path = path.into();
        let store = ChunkStore::new(
            config.max_chunks,
            config.max_cache_bytes,
            |slot: &ChunkSlot| slot.range.len(),
        );

        debug!(
            path = %path,
            size = metadata.total_size_bytes,
            mime_type = %metadata.mime_type,
            chunk_size = config.chunk_size,
            "Opened virtual file"
        );

        Self {
            inner: Arc::new(Inner {
                path,
                name: metadata.display_name,
                mime_type: metadata.mime_type,
                size: metadata.total_size_bytes,
                chunk_size: config.chunk_size.max(1),
                failure_policy: config.failure_policy,
                channel,
                chunks: Mutex::new(Chunks {
                    store,
                    in_flight: HashMap::new(),
                }),
                next_fetch_id: AtomicU64::new(0),
                host_reads: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    /// Declared length in bytes. Never triggers I/O.
    pub fn size(&self) -> u64 {
        self.inner.size
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn mime_type(&self) -> &str {
        &self.inner.mime_type
    }

    pub fn chunk_size(&self) -> u64 {
        self.inner.chunk_size
    }

    /// A lazy handle over `[start, end)`, with Blob-style index resolution.
    ///
    /// Negative indices count back from the end of the file and all indices
    /// are clamped to `[0, size]`. Nothing is read until the handle is.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>) -> DeferredBlob {
        let range = ByteRange::resolve(self.size(), start, end);
        DeferredBlob::new(self.clone(), range, self.mime_type().to_string())
    }

    /// Read the whole file
    pub async fn array_buffer(&self) -> Result<Bytes> {
        self.read_range(ByteRange::new(0, self.size())).await
    }

    /// Read the whole file as UTF-8, replacing invalid sequences
    pub async fn text(&self) -> Result<String> {
        let data = self.array_buffer().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }

    /// Read `range`, clamped to the file size
    pub async fn read_range(&self, range: ByteRange) -> Result<Bytes> {
        let range = range.clamp_to(self.size());
        if range.is_empty() {
            return Ok(Bytes::new());
        }

        let slots = self.acquire_chunks(range);
        let parts = try_join_all(slots.iter().map(|slot| self.await_chunk(slot))).await?;

        Ok(assemble(range, &slots, parts))
    }

    /// A tokio reader positioned at the start of the file
    pub fn reader(&self) -> VirtualFileReader {
        VirtualFileReader::new(self.clone())
    }

    /// Cache state of the chunk containing `offset`
    pub fn chunk_state(&self, offset: u64) -> ChunkState {
        let key = ByteRange::chunk_at(offset, self.chunk_size(), self.size());
        let chunks = self.lock_chunks();

        if let Some(slot) = chunks.store.peek(&key) {
            return match slot.fetch.peek() {
                None => ChunkState::Pending,
                Some(Ok(_)) => ChunkState::Resolved,
                Some(Err(_)) => ChunkState::Rejected,
            };
        }

        let pending = chunks
            .in_flight
            .get(&key)
            .and_then(|in_flight| in_flight.fetch.upgrade())
            .is_some_and(|fetch| fetch.peek().is_none());
        if pending {
            ChunkState::Pending
        } else {
            ChunkState::Unrequested
        }
    }

    pub fn stats(&self) -> VirtualFileStats {
        VirtualFileStats {
            size: self.size(),
            chunk_size: self.chunk_size(),
            host_reads: self.inner.host_reads.load(Ordering::Relaxed),
            cache: self.lock_chunks().store.stats(),
        }
    }

    /// Drop every cached chunk.
    ///
    /// Host reads already in flight are not cancelled; callers awaiting them
    /// still get their bytes, but later reads fetch again.
    pub fn dispose(&self) {
        let mut chunks = self.lock_chunks();
        let dropped = chunks.store.len();
        chunks.store.clear();
        chunks.in_flight.clear();
        debug!(path = %self.inner.path, dropped, "Disposed virtual file cache");
    }

    /// Look up or start the fetch for every chunk covering `range`.
    ///
    /// Runs under a single lock acquisition and never awaits, so a concurrent
    /// request for any of these chunks sees the stored fetch. A fetch the
    /// store evicted before it settled is found through `in_flight` and
    /// cached again rather than issued twice.
    fn acquire_chunks(&self, range: ByteRange) -> Vec<ChunkSlot> {
        let mut chunks = self.lock_chunks();
        let Chunks { store, in_flight } = &mut *chunks;
        let mut slots = Vec::new();

        for key in range.covering_chunks(self.chunk_size(), self.size()) {
            if let Some(slot) = store.get(&key).cloned() {
                trace!(path = %self.inner.path, chunk = %key, "Chunk cache hit");
                slots.push(slot);
                continue;
            }

            if let Some(slot) = in_flight.get(&key).and_then(|pending| pending.upgrade(key)) {
                trace!(path = %self.inner.path, chunk = %key, "Joined evicted in-flight chunk");
                store.set(key, slot.clone());
                slots.push(slot);
                continue;
            }

            let slot = self.start_fetch(key);
            if let Some(fetch) = slot.fetch.downgrade() {
                in_flight.insert(key, InFlight { id: slot.id, fetch });
            }
            store.set(key, slot.clone());
            slots.push(slot);
        }

        slots
    }

    fn start_fetch(&self, range: ByteRange) -> ChunkSlot {
        let id = self.inner.next_fetch_id.fetch_add(1, Ordering::Relaxed);
        let channel = Arc::clone(&self.inner.channel);
        let host_reads = Arc::clone(&self.inner.host_reads);
        let path = self.inner.path.clone();

        let fetch = async move {
            host_reads.fetch_add(1, Ordering::Relaxed);
            debug!(path = %path, start = range.start, end = range.end, "Reading chunk from host");

            let mut data = channel
                .read(&path, range.start, range.end)
                .await
                .map_err(|e| FetchFailure::Host(Arc::new(e)))?;

            let expected = range.len();
            let actual = data.len() as u64;
            if actual < expected {
                return Err(FetchFailure::Short { expected, actual });
            }
            data.truncate(expected as usize);
            Ok(data)
        }
        .boxed()
        .shared();

        ChunkSlot { id, range, fetch }
    }

    async fn await_chunk(&self, slot: &ChunkSlot) -> Result<Bytes> {
        let outcome = slot.fetch.clone().await;
        self.settle(slot);

        match outcome {
            Ok(data) => Ok(data),
            Err(failure) => {
                let err = self.chunk_error(slot.range, failure);
                warn!(path = %self.inner.path, chunk = %slot.range, error = %err, "Chunk read failed");

                if self.inner.failure_policy == FailurePolicy::Purge {
                    self.purge(slot);
                }
                Err(err)
            }
        }
    }

    /// Stop tracking a settled fetch; from here on only the store keeps it
    fn settle(&self, slot: &ChunkSlot) {
        let mut chunks = self.lock_chunks();
        if chunks.in_flight.get(&slot.range).map(|pending| pending.id) == Some(slot.id) {
            chunks.in_flight.remove(&slot.range);
        }
    }

    /// Remove a failed fetch, unless the slot already holds a newer one
    fn purge(&self, slot: &ChunkSlot) {
        let mut chunks = self.lock_chunks();
        if chunks.store.peek(&slot.range).map(|current| current.id) == Some(slot.id) {
            chunks.store.remove(&slot.range);
            debug!(path = %self.inner.path, chunk = %slot.range, "Purged failed chunk");
        }
    }

    fn chunk_error(&self, range: ByteRange, failure: FetchFailure) -> VirtualFileError {
        let path = self.inner.path.clone();
        match failure {
            FetchFailure::Host(source) => VirtualFileError::ChunkRead {
                path,
                range,
                source,
            },
            FetchFailure::Short { expected, actual } => VirtualFileError::ShortRead {
                path,
                range,
                expected,
                actual,
            },
        }
    }

    fn lock_chunks(&self) -> MutexGuard<'_, Chunks> {
        // Store operations never leave it half-updated, so a poisoned lock is
        // still usable
        self.inner
            .chunks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cut the requested range out of its covering chunks, in offset order
fn assemble(range: ByteRange, slots: &[ChunkSlot], parts: Vec<Bytes>) -> Bytes {
    let window = |slot: &ChunkSlot| {
        let from = range.start.max(slot.range.start) - slot.range.start;
        let to = range.end.min(slot.range.end) - slot.range.start;
        from as usize..to as usize
    };

    if let ([slot], [part]) = (slots, parts.as_slice()) {
        return part.slice(window(slot));
    }

    let mut out = BytesMut::with_capacity(range.len() as usize);
    for (slot, part) in slots.iter().zip(&parts) {
        out.extend_from_slice(&part[window(slot)]);
    }
    out.freeze()
}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("path", &self.inner.path)
            .field("size", &self.inner.size)
            .field("mime_type", &self.inner.mime_type)
            .field("chunk_size", &self.inner.chunk_size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{init_tracing, pattern, FakeHost};

    const MIB: u64 = 1_048_576;

    fn open_fake(len: usize, config: VirtualFileConfig) -> (Arc<FakeHost>, VirtualFile) {
        let host = Arc::new(FakeHost::with_pattern(len));
        let file = VirtualFile::with_metadata("fake.mp3", host.metadata(), host.clone(), &config);
        (host, file)
    }

    fn chunked(chunk_size: u64) -> VirtualFileConfig {
        VirtualFileConfig::default().with_chunk_size(chunk_size)
    }

    #[tokio::test]
    async fn test_open_resolves_metadata() {
        let host = Arc::new(FakeHost::with_pattern(1000));
        let file = VirtualFile::open("book", host.as_ref(), host.clone(), &chunked(100))
            .await
            .unwrap();

        assert_eq!(file.size(), 1000);
        assert_eq!(file.name(), "fake.mp3");
        assert_eq!(file.mime_type(), "audio/mpeg");
        assert_eq!(file.path(), "book");
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn test_open_surfaces_metadata_errors() {
        let host = Arc::new(FakeHost::with_pattern(10));
        let err = VirtualFile::open("missing", host.as_ref(), host.clone(), &chunked(4))
            .await
            .unwrap_err();

        assert!(matches!(err, VirtualFileError::Metadata { ref path, .. } if path == "missing"));
    }

    #[tokio::test]
    async fn test_array_buffer_sizes_around_chunk_boundaries() {
        let chunk = 64u64;
        for size in [0, chunk - 1, chunk, chunk + 1, 3 * chunk] {
            let (host, file) = open_fake(size as usize, chunked(chunk));

            let data = file.array_buffer().await.unwrap();
            assert_eq!(data.len() as u64, size);
            assert_eq!(&data[..], &pattern(size as usize)[..]);
            assert_eq!(host.call_count() as u64, size.div_ceil(chunk));
        }
    }

    #[tokio::test]
    async fn test_slice_spanning_two_chunks() {
        init_tracing();
        let (host, file) = open_fake(2_500_000, VirtualFileConfig::default());

        let data = file
            .slice(Some(1_000_000), Some(1_500_000))
            .array_buffer()
            .await
            .unwrap();

        assert_eq!(data.len(), 500_000);
        assert_eq!(&data[..], &pattern(2_500_000)[1_000_000..1_500_000]);
        assert_eq!(
            host.calls(),
            vec![ByteRange::new(0, MIB), ByteRange::new(MIB, 2 * MIB)]
        );
    }

    #[tokio::test]
    async fn test_final_chunk_key_is_clipped() {
        let (host, file) = open_fake(2_500_000, VirtualFileConfig::default());

        file.slice(Some(-10), None).array_buffer().await.unwrap();
        assert_eq!(host.calls(), vec![ByteRange::new(2 * MIB, 2_500_000)]);
        assert_eq!(file.stats().cache.total_size, 2_500_000 - 2 * MIB);
    }

    #[tokio::test]
    async fn test_concurrent_slices_share_one_host_read() {
        let (host, file) = open_fake(1000, chunked(100));

        let a = file.slice(Some(110), Some(150));
        let b = file.slice(Some(120), Some(190));
        let (a, b) = tokio::join!(a.array_buffer(), b.array_buffer());

        assert_eq!(&a.unwrap()[..], &pattern(1000)[110..150]);
        assert_eq!(&b.unwrap()[..], &pattern(1000)[120..190]);
        assert_eq!(host.call_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_array_buffers_read_each_chunk_once() {
        let (host, file) = open_fake(1050, chunked(100));

        let (a, b) = tokio::join!(file.array_buffer(), file.array_buffer());
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(host.call_count(), 11);
    }

    #[tokio::test]
    async fn test_concurrent_reads_of_file_larger_than_cache() {
        let config = chunked(100).with_cache_limits(4, 400);
        let (host, file) = open_fake(1000, config);

        let (a, b) = tokio::join!(file.array_buffer(), file.array_buffer());
        assert_eq!(&a.unwrap()[..], &pattern(1000)[..]);
        assert_eq!(&b.unwrap()[..], &pattern(1000)[..]);
        assert_eq!(host.call_count(), 10);
        assert!(file.stats().cache.entries <= 4);
    }

    #[tokio::test]
    async fn test_chunk_larger_than_cache_is_still_shared() {
        let config = chunked(100).with_cache_limits(4, 50);
        let (host, file) = open_fake(300, config);

        let first = file.slice(Some(0), Some(10));
        let second = file.slice(Some(20), Some(30));
        let (a, b) = tokio::join!(first.array_buffer(), second.array_buffer());

        assert_eq!(&a.unwrap()[..], &pattern(10)[..]);
        assert_eq!(&b.unwrap()[..], &pattern(30)[20..]);
        assert_eq!(host.calls(), vec![ByteRange::new(0, 100)]);

        // Settled fetches are not kept once the store has let them go
        assert_eq!(file.chunk_state(0), ChunkState::Unrequested);
        file.slice(Some(0), Some(10)).array_buffer().await.unwrap();
        assert_eq!(host.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cached_chunks_are_reused() {
        let (host, file) = open_fake(500, chunked(100));

        file.read_range(ByteRange::new(0, 250)).await.unwrap();
        file.read_range(ByteRange::new(50, 300)).await.unwrap();

        assert_eq!(host.call_count(), 3);
        let stats = file.stats();
        assert_eq!(stats.host_reads, 3);
        assert_eq!(stats.cache.entries, 3);
        assert_eq!(stats.cache.hits, 3);
        assert_eq!(stats.cache.misses, 3);
    }

    #[tokio::test]
    async fn test_dispose_forces_fresh_read() {
        let (host, file) = open_fake(500, chunked(100));

        file.slice(Some(10), Some(20)).array_buffer().await.unwrap();
        assert_eq!(file.chunk_state(10), ChunkState::Resolved);

        file.dispose();
        assert_eq!(file.chunk_state(10), ChunkState::Unrequested);
        assert_eq!(file.stats().cache.entries, 0);

        file.slice(Some(10), Some(20)).array_buffer().await.unwrap();
        assert_eq!(host.call_count(), 2);
    }

    #[tokio::test]
    async fn test_cache_bounds_evict_old_chunks() {
        let config = chunked(100).with_cache_limits(2, 1_000);
        let (host, file) = open_fake(500, config);

        file.array_buffer().await.unwrap();
        let stats = file.stats();
        assert_eq!(stats.cache.entries, 2);
        assert_eq!(stats.cache.evictions, 3);

        // Last two chunks survive, the first was evicted
        assert_eq!(file.chunk_state(499), ChunkState::Resolved);
        assert_eq!(file.chunk_state(0), ChunkState::Unrequested);

        file.read_range(ByteRange::new(0, 10)).await.unwrap();
        assert_eq!(host.call_count(), 6);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_purged_by_default() {
        let (host, file) = open_fake(300, chunked(100));
        host.fail_next(1);

        let err = file.read_range(ByteRange::new(0, 50)).await.unwrap_err();
        assert!(matches!(err, VirtualFileError::ChunkRead { .. }));
        assert_eq!(err.range(), Some(ByteRange::new(0, 100)));
        assert_eq!(file.chunk_state(0), ChunkState::Unrequested);

        let data = file.read_range(ByteRange::new(0, 50)).await.unwrap();
        assert_eq!(&data[..], &pattern(300)[..50]);
        assert_eq!(host.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_chunk_is_retained_when_configured() {
        let config = chunked(100).with_failure_policy(FailurePolicy::Retain);
        let (host, file) = open_fake(300, config);
        host.fail_next(1);

        assert!(file.read_range(ByteRange::new(0, 50)).await.is_err());
        assert_eq!(file.chunk_state(0), ChunkState::Rejected);

        // The cached failure is replayed without another host call
        assert!(file.read_range(ByteRange::new(10, 20)).await.is_err());
        assert_eq!(host.call_count(), 1);

        // Other chunks are unaffected
        assert!(file.read_range(ByteRange::new(100, 200)).await.is_ok());

        file.dispose();
        assert!(file.read_range(ByteRange::new(0, 50)).await.is_ok());
        assert_eq!(host.call_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_waiters_share_a_failure() {
        let (host, file) = open_fake(300, chunked(100));
        host.fail_next(1);

        let (a, b) = tokio::join!(
            file.read_range(ByteRange::new(0, 10)),
            file.read_range(ByteRange::new(20, 30))
        );
        assert!(a.is_err());
        assert!(b.is_err());
        assert_eq!(host.call_count(), 1);
    }

    #[tokio::test]
    async fn test_short_host_read_is_an_error() {
        // Host file is shorter than the declared size
        let host = Arc::new(FakeHost::with_pattern(150));
        let metadata = FileMetadata {
            total_size_bytes: 300,
            ..host.metadata()
        };
        let file = VirtualFile::with_metadata("fake.mp3", metadata, host.clone(), &chunked(100));

        let err = file.read_range(ByteRange::new(120, 180)).await.unwrap_err();
        assert!(matches!(
            err,
            VirtualFileError::ShortRead {
                expected: 100,
                actual: 50,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_text_reassembles_multibyte_characters() {
        let content = "héllo wörld, ünïcode ✓";
        let host = Arc::new(FakeHost::new(content.as_bytes().to_vec()));
        let file = VirtualFile::with_metadata("notes.txt", host.metadata(), host.clone(), &chunked(3));

        assert_eq!(file.text().await.unwrap(), content);
    }

    #[tokio::test]
    async fn test_read_range_is_clamped() {
        let (host, file) = open_fake(100, chunked(40));

        let data = file.read_range(ByteRange::new(90, 500)).await.unwrap();
        assert_eq!(data.len(), 10);

        let empty = file.read_range(ByteRange::new(200, 300)).await.unwrap();
        assert!(empty.is_empty());
        assert_eq!(host.call_count(), 1);
    }

    #[tokio::test]
    async fn test_inverted_range_reads_nothing() {
        let (host, file) = open_fake(100, chunked(10));
        let data = file.read_range(ByteRange { start: 50, end: 20 }).await.unwrap();
        assert!(data.is_empty());
        assert_eq!(host.call_count(), 0);
    }

    #[tokio::test]
    async fn test_debug_output() {
        let (_host, file) = open_fake(10, chunked(4));
        let debug_str = format!("{:?}", file);
        assert!(debug_str.contains("fake.mp3"));
        assert!(debug_str.contains("chunk_size: 4"));
    }
}
