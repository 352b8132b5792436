//! Error types for the OCR pipeline.
//!
//! Every failure a request can hit is a variant of [`OcrError`], which maps
//! directly onto an HTTP response: validation failures (format, size, bad
//! multipart) are 400s returned before the engine is ever invoked, engine and
//! extraction failures are 500s. The error body is `{"detail": "..."}`.
//!
//! I/O errors render as a generic message to the client; the full detail only
//! reaches the server log.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::ocr::ingest::SUPPORTED_EXTENSIONS;

/// All errors a single OCR request can fail with.
#[derive(Debug, Error)]
pub enum OcrError {
    /// Resolved file extension is not in the supported set.
    #[error("unsupported file format: '{0}'; supported: {}", SUPPORTED_EXTENSIONS.join(", "))]
    UnsupportedFormat(String),

    /// The upload contained zero bytes.
    #[error("uploaded file is empty")]
    EmptyFile,

    /// The upload exceeded the configured size limit.
    #[error("file too large: {size} bytes (limit: {limit} bytes)")]
    FileTooLarge { size: u64, limit: u64 },

    /// Malformed multipart body, missing file part, or an invalid form value.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The engine subprocess exceeded the wall-clock limit and was killed.
    #[error("OCR timed out after {0}s")]
    EngineTimeout(u64),

    /// The engine subprocess exited non-zero.
    #[error("OCR failed with exit code {code}: {stderr_tail}")]
    EngineFailure { code: i32, stderr_tail: String },

    /// The engine exited cleanly but produced neither a text nor an HTML file.
    #[error("OCR produced no output files")]
    NoOutputProduced,

    /// Any other I/O failure (workspace creation, subprocess spawn, artifact reads).
    #[error("i/o failure: {0}")]
    Io(#[from] std::io::Error),
}

impl OcrError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::UnsupportedFormat(_)
            | Self::EmptyFile
            | Self::FileTooLarge { .. }
            | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::EngineTimeout(_)
            | Self::EngineFailure { .. }
            | Self::NoOutputProduced
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for OcrError {
    fn into_response(self) -> Response {
        let detail = match &self {
            // Full I/O detail stays in the server log
            Self::Io(e) => {
                error!("internal error: {e}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        (self.status_code(), Json(json!({ "detail": detail }))).into_response()
    }
}
