//! Host channel and metadata resolver backed by the local filesystem

use crate::channel::{HostReadChannel, MetadataResolver};
use crate::types::FileMetadata;
use async_trait::async_trait;
use bytes::Bytes;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Reads files from local disk, optionally relative to a root directory
#[derive(Debug, Clone, Default)]
pub struct LocalFs {
    root: Option<PathBuf>,
}

impl LocalFs {
    /// Resolve paths as given
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve relative paths against `root`
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: Some(root.as_ref().to_path_buf()),
        }
    }

    fn path_for(&self, path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(path),
            None => PathBuf::from(path),
        }
    }
}

#[async_trait]
impl HostReadChannel for LocalFs {
    async fn read(&self, path: &str, start: u64, end: u64) -> io::Result<Bytes> {
        let full_path = self.path_for(path);
        let len = end.saturating_sub(start);

        let mut file = fs::File::open(&full_path).await?;
        file.seek(SeekFrom::Start(start)).await?;

        let mut data = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut data).await?;

        debug!(path = ?full_path, start, end, size = data.len(), "Read range from disk");
        Ok(Bytes::from(data))
    }
}

#[async_trait]
impl MetadataResolver for LocalFs {
    async fn resolve(&self, path: &str) -> io::Result<FileMetadata> {
        let full_path = self.path_for(path);
        let metadata = fs::metadata(&full_path).await?;

        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", full_path.display()),
            ));
        }

        let display_name = full_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string());

        Ok(FileMetadata {
            display_name,
            total_size_bytes: metadata.len(),
            mime_type: mime_type_for(&full_path).to_string(),
        })
    }
}

/// Guess a MIME type from the file extension
pub fn mime_type_for(path: &Path) -> &'static str {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return DEFAULT_MIME_TYPE;
    };

    match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "m4a" | "m4b" => "audio/mp4",
        "aac" => "audio/aac",
        "flac" => "audio/flac",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "opus" => "audio/opus",
        "wma" => "audio/x-ms-wma",
        "pdf" => "application/pdf",
        "epub" => "application/epub+zip",
        "txt" => "text/plain",
        _ => DEFAULT_MIME_TYPE,
    }
}
