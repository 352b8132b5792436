//! Request-scoped OCR job execution pipeline.
//!
//! Defines the [`OcrEngine`] trait and the job types shared by the pipeline
//! stages, so the real subprocess engine can be swapped for a scripted one in
//! tests. One request maps to one [`OcrJobSpec`], at most one
//! [`OcrJobResult`], and exactly one workspace that is destroyed when the
//! request ends.

pub mod artifacts;
pub mod engine;
pub mod ingest;
pub mod pipeline;
pub mod workspace;

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::OcrError;

/// Inference method passed through to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMethod {
    Hf,
    Vllm,
}

impl OcrMethod {
    /// Parse a form-field string into a method.
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "hf" => Some(Self::Hf),
            "vllm" => Some(Self::Vllm),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hf => "hf",
            Self::Vllm => "vllm",
        }
    }
}

/// Identifier attached to every log line of one request.
///
/// Derived from the submission time with a microsecond discriminator
/// (`YYYYmmdd_HHMMSS_ffffff`); never part of the response payload.
#[derive(Debug, Clone)]
pub struct RequestId(String);

impl RequestId {
    pub fn new() -> Self {
        Self(chrono::Utc::now().format("%Y%m%d_%H%M%S_%6f").to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fully determines one engine invocation. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct OcrJobSpec {
    pub input_path: PathBuf,
    pub output_dir: PathBuf,
    pub method: OcrMethod,
    pub include_images: bool,
    pub include_headers: bool,
}

/// Raw outcome of a successful engine subprocess run.
#[derive(Debug)]
pub struct EngineRun {
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Assembled result of one OCR job.
///
/// Any field may be empty/zero when the engine did not emit that artifact
/// type, except that `text` and `html` are never both empty (the extractor
/// fails with [`OcrError::NoOutputProduced`] instead).
#[derive(Debug, Clone, Serialize)]
pub struct OcrJobResult {
    pub text: String,
    pub html: Option<String>,
    pub metadata: serde_json::Value,
    pub images_count: usize,
    /// Engine wall-clock time in seconds.
    pub processing_time: f64,
}

/// Async seam over the external OCR engine.
#[async_trait::async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Run one OCR job to completion. A single attempt, no retries.
    async fn run(&self, spec: &OcrJobSpec) -> Result<EngineRun, OcrError>;

    /// Lightweight availability probe; never touches a workspace.
    async fn probe(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_round_trips_wire_values() {
        assert_eq!(OcrMethod::from_str("hf"), Some(OcrMethod::Hf));
        assert_eq!(OcrMethod::from_str("vllm"), Some(OcrMethod::Vllm));
        assert_eq!(OcrMethod::Hf.as_str(), "hf");
        assert_eq!(OcrMethod::Vllm.as_str(), "vllm");
    }

    #[test]
    fn method_rejects_unknown_values() {
        assert_eq!(OcrMethod::from_str("HF"), None);
        assert_eq!(OcrMethod::from_str("tesseract"), None);
        assert_eq!(OcrMethod::from_str(""), None);
    }

    #[test]
    fn request_id_has_timestamp_shape() {
        let id = RequestId::new();
        let s = id.as_str();
        // YYYYmmdd_HHMMSS_ffffff
        assert_eq!(s.len(), 22, "got: {s}");
        assert_eq!(s.matches('_').count(), 2, "got: {s}");
        assert!(s.chars().all(|c| c.is_ascii_digit() || c == '_'));
    }

    #[test]
    fn request_ids_distinguish_sequential_calls() {
        let a = RequestId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = RequestId::new();
        assert_ne!(a.as_str(), b.as_str());
    }
}
