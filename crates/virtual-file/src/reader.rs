//! Tokio I/O adapter for consumers that expect a seekable reader

use crate::error::Result;
use crate::file::VirtualFile;
use crate::range::ByteRange;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

/// Reads a [`VirtualFile`] through [`AsyncRead`] and [`AsyncSeek`].
///
/// Each read is served from the chunk containing the current position,
/// fetched through the file's shared cache, so decoders that seek around a
/// large file only pull in the chunks they touch.
pub struct VirtualFileReader {
    file: VirtualFile,
    position: u64,
    /// Last chunk read, with its absolute range
    current: Option<(ByteRange, Bytes)>,
    /// Chunk read in progress
    pending: Option<(ByteRange, BoxFuture<'static, Result<Bytes>>)>,
}

impl VirtualFileReader {
    pub fn new(file: VirtualFile) -> Self {
        Self {
            file,
            position: 0,
            current: None,
            pending: None,
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn file(&self) -> &VirtualFile {
        &self.file
    }

    /// Copy from the buffered chunk if it covers the current position
    fn copy_buffered(&mut self, buf: &mut ReadBuf<'_>) -> bool {
        let Some((range, data)) = &self.current else {
            return false;
        };
        if self.position < range.start || self.position >= range.end {
            return false;
        }

        let offset = (self.position - range.start) as usize;
        let n = buf.remaining().min(data.len() - offset);
        buf.put_slice(&data[offset..offset + n]);
        self.position += n as u64;
        true
    }
}

impl AsyncRead for VirtualFileReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();

        if this.position >= this.file.size() || buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }
        if this.copy_buffered(buf) {
            return Poll::Ready(Ok(()));
        }

        let chunk = ByteRange::chunk_at(this.position, this.file.chunk_size(), this.file.size());

        // A seek may have moved the position off the chunk being fetched
        let stale = !matches!(&this.pending, Some((range, _)) if *range == chunk);
        if stale {
            let file = this.file.clone();
            this.pending = Some((chunk, Box::pin(async move { file.read_range(chunk).await })));
        }

        if let Some((_, fetch)) = this.pending.as_mut() {
            let result = ready!(fetch.as_mut().poll(cx));
            this.pending = None;
            let data = result.map_err(io::Error::other)?;
            this.current = Some((chunk, data));
        }

        this.copy_buffered(buf);
        Poll::Ready(Ok(()))
    }
}

impl AsyncSeek for VirtualFileReader {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();

        let target = match position {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => this.file.size().checked_add_signed(delta),
            SeekFrom::Current(delta) => this.position.checked_add_signed(delta),
        };

        this.position = target.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                "invalid seek to a negative or overflowing position",
            )
        })?;
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.position))
    }
}
