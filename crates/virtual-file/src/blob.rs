//! Blob-shaped read surface and its lazily materialized implementation

use crate::error::Result;
use crate::file::VirtualFile;
use crate::range::ByteRange;
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// The read operations shared by whole files and byte-range handles, so
/// either can be passed where a file-like value is expected.
#[async_trait]
pub trait BlobLike: Send + Sync {
    /// Length in bytes, known without I/O
    fn size(&self) -> u64;

    fn mime_type(&self) -> &str;

    /// A lazy handle over a sub-range, resolved with Blob `slice` rules
    fn slice(&self, start: Option<i64>, end: Option<i64>) -> DeferredBlob;

    async fn array_buffer(&self) -> Result<Bytes>;

    async fn text(&self) -> Result<String> {
        let data = self.array_buffer().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

/// A byte range of a [`VirtualFile`] whose bytes are fetched on first read.
///
/// Creating or slicing a handle performs no I/O, so a range that is probed
/// but never consumed costs nothing. Once read, the bytes are memoized on the
/// handle (and shared by its clones) in addition to the file's chunk cache,
/// so later reads of the same handle return immediately even if the chunks
/// have since been evicted or the file disposed.
#[derive(Clone)]
pub struct DeferredBlob {
    file: VirtualFile,
    /// Absolute range within `file`
    range: ByteRange,
    mime_type: String,
    resolved: Arc<OnceCell<Bytes>>,
}

impl DeferredBlob {
    pub(crate) fn new(file: VirtualFile, range: ByteRange, mime_type: String) -> Self {
        Self {
            file,
            range,
            mime_type,
            resolved: Arc::new(OnceCell::new()),
        }
    }

    /// Length of the range, from the originating file's range arithmetic
    pub fn size(&self) -> u64 {
        self.range.len()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    /// Absolute byte range within the originating file
    pub fn range(&self) -> ByteRange {
        self.range
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved.initialized()
    }

    /// A handle over a sub-range of this one.
    ///
    /// Indices are relative to this blob. If this blob has already been read
    /// the child shares its bytes, otherwise the child stays lazy.
    pub fn slice(&self, start: Option<i64>, end: Option<i64>) -> DeferredBlob {
        let relative = ByteRange::resolve(self.size(), start, end);
        let absolute = ByteRange::new(
            self.range.start + relative.start,
            self.range.start + relative.end,
        );
        let child = DeferredBlob::new(self.file.clone(), absolute, self.mime_type.clone());

        if let Some(data) = self.resolved.get() {
            let _ = child
                .resolved
                .set(data.slice(relative.start as usize..relative.end as usize));
        }
        child
    }

    /// Fetch the bytes of this range. A failed read is not memoized.
    pub async fn array_buffer(&self) -> Result<Bytes> {
        let data = self
            .resolved
            .get_or_try_init(|| self.file.read_range(self.range))
            .await?;
        Ok(data.clone())
    }

    /// Fetch the range as UTF-8, replacing invalid sequences
    pub async fn text(&self) -> Result<String> {
        let data = self.array_buffer().await?;
        Ok(String::from_utf8_lossy(&data).into_owned())
    }
}

#[async_trait]
impl BlobLike for DeferredBlob {
    fn size(&self) -> u64 {
        DeferredBlob::size(self)
    }

    fn mime_type(&self) -> &str {
        DeferredBlob::mime_type(self)
    }

    fn slice(&self, start: Option<i64>, end: Option<i64>) -> DeferredBlob {
        DeferredBlob::slice(self, start, end)
    }

    async fn array_buffer(&self) -> Result<Bytes> {
        DeferredBlob::array_buffer(self).await
    }
}

#[async_trait]
impl BlobLike for VirtualFile {
    fn size(&self) -> u64 {
        VirtualFile::size(self)
    }

    fn mime_type(&self) -> &str {
        VirtualFile::mime_type(self)
    }

    fn slice(&self, start: Option<i64>, end: Option<i64>) -> DeferredBlob {
        VirtualFile::slice(self, start, end)
    }

    async fn array_buffer(&self) -> Result<Bytes> {
        VirtualFile::array_buffer(self).await
    }
}

impl fmt::Debug for DeferredBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredBlob")
            .field("path", &self.file.path())
            .field("range", &self.range)
            .field("mime_type", &self.mime_type)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}
