//! Upload ingestion: format detection and chunked streaming to disk.
//!
//! Extension resolution follows a fixed fallback order: declared
//! content-type first, then the filename extension, then a generic `bin`
//! fallback that is rejected by validation. Unknown types never crash the
//! pipeline, they only fail cleanly.

use axum::body::Bytes;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::OcrError;

/// Extensions the engine accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] =
    &["pdf", "jpg", "jpeg", "png", "bmp", "tiff", "tif", "webp"];

/// Declared content-type to extension, checked before the filename.
const CONTENT_TYPE_MAP: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/png", "png"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/tif", "tif"),
    ("image/webp", "webp"),
];

/// Assigned when neither the content-type nor the filename resolves; always
/// fails validation.
const FALLBACK_EXTENSION: &str = "bin";

/// What the client declared about an upload. Ephemeral; the byte stream is
/// consumed separately, chunk by chunk.
#[derive(Debug, Clone)]
pub struct UploadDescriptor {
    pub content_type: Option<String>,
    pub filename: Option<String>,
}

/// Resolve the file extension for an upload.
pub fn detect_extension(upload: &UploadDescriptor) -> String {
    if let Some(ct) = &upload.content_type {
        let ct = ct.to_ascii_lowercase();
        for (mime, ext) in CONTENT_TYPE_MAP {
            if *mime == ct {
                return (*ext).to_string();
            }
        }
    }

    if let Some(name) = &upload.filename {
        if let Some((_, ext)) = name.rsplit_once('.') {
            let ext = ext.to_ascii_lowercase();
            if is_supported(&ext) {
                return ext;
            }
        }
    }

    warn!(
        "unknown file type: content_type={:?}, filename={:?}",
        upload.content_type, upload.filename
    );
    FALLBACK_EXTENSION.to_string()
}

pub fn is_supported(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext)
}

/// Async source of upload chunks, so the pipeline can ingest an axum
/// multipart field in production and an in-memory chunk list in tests.
#[async_trait::async_trait]
pub trait ChunkSource: Send {
    /// Next chunk of the body, or `None` once the stream is exhausted.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, OcrError>;
}

/// Writes upload chunks to a workspace file, tracking the cumulative byte
/// count. Never buffers the whole body.
pub struct UploadSink {
    file: tokio::fs::File,
    bytes_written: u64,
}

impl UploadSink {
    pub async fn create(path: &Path) -> io::Result<Self> {
        Ok(Self {
            file: tokio::fs::File::create(path).await?,
            bytes_written: 0,
        })
    }

    pub async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.bytes_written += chunk.len() as u64;
        Ok(())
    }

    /// Flush and return the total number of bytes written.
    pub async fn finish(mut self) -> io::Result<u64> {
        self.file.flush().await?;
        Ok(self.bytes_written)
    }
}
