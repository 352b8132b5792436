//! Per-request pipeline orchestration.
//!
//! A request moves through fixed stages: acquire workspace → ingest →
//! invoke engine → extract artifacts. Ingestion, including size validation,
//! always completes before invocation begins, and the caller-owned
//! [`Workspace`](super::workspace::Workspace) guarantees cleanup on every
//! exit path. The HTTP layer drives these stages; tests drive them with a
//! scripted engine and in-memory chunk sources.

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::artifacts;
use super::ingest::{self, ChunkSource, UploadDescriptor, UploadSink};
use super::workspace::{Workspace, WorkspaceManager};
use super::{OcrEngine, OcrJobSpec, OcrJobResult, OcrMethod, RequestId};
use crate::config::Settings;
use crate::error::OcrError;

/// Per-job options parsed from the request form fields.
#[derive(Debug, Clone, Copy)]
pub struct JobParams {
    pub method: OcrMethod,
    pub include_images: bool,
    pub include_headers: bool,
}

/// The ingested input file inside a workspace.
#[derive(Debug)]
pub struct IngestedFile {
    pub path: PathBuf,
    pub extension: String,
    pub size: u64,
}

/// Stateless (per request) pipeline facade shared by the HTTP handlers.
pub struct Pipeline {
    settings: Arc<Settings>,
    workspaces: WorkspaceManager,
    engine: Arc<dyn OcrEngine>,
}

impl Pipeline {
    pub fn new(
        settings: Arc<Settings>,
        workspaces: WorkspaceManager,
        engine: Arc<dyn OcrEngine>,
    ) -> Self {
        Self {
            settings,
            workspaces,
            engine,
        }
    }

    /// Create the isolated directory owning this request's files.
    pub fn acquire(&self, request_id: &RequestId) -> Result<Workspace, OcrError> {
        Ok(self.workspaces.acquire(request_id)?)
    }

    /// Stream the upload into the workspace, validating format and size.
    ///
    /// The format check happens before any byte is streamed; the emptiness
    /// and size checks after the stream completes. On success exactly one
    /// file exists in the workspace, named `input.<ext>`.
    pub async fn ingest<S: ChunkSource>(
        &self,
        request_id: &RequestId,
        workspace: &Workspace,
        upload: &UploadDescriptor,
        mut body: S,
    ) -> Result<IngestedFile, OcrError> {
        let extension = ingest::detect_extension(upload);
        if !ingest::is_supported(&extension) {
            return Err(OcrError::UnsupportedFormat(extension));
        }
        debug!("[{request_id}] upload validated as .{extension}");

        let path = workspace.input_path(&extension);
        let mut sink = UploadSink::create(&path).await?;
        while let Some(chunk) = body.next_chunk().await? {
            sink.write_chunk(&chunk).await?;
        }
        let size = sink.finish().await?;
        info!("[{request_id}] saved {}: {size} bytes", path.display());

        if size == 0 {
            return Err(OcrError::EmptyFile);
        }
        if size > self.settings.max_file_size {
            return Err(OcrError::FileTooLarge {
                size,
                limit: self.settings.max_file_size,
            });
        }

        Ok(IngestedFile {
            path,
            extension,
            size,
        })
    }

    /// Invoke the engine on an ingested file and extract its artifacts.
    pub async fn process(
        &self,
        request_id: &RequestId,
        workspace: &Workspace,
        input: &IngestedFile,
        params: &JobParams,
    ) -> Result<OcrJobResult, OcrError> {
        let spec = OcrJobSpec {
            input_path: input.path.clone(),
            output_dir: workspace.output_dir(),
            method: params.method,
            include_images: params.include_images,
            include_headers: params.include_headers,
        };

        info!(
            "[{request_id}] processing input.{} with {} (method={})",
            input.extension,
            self.engine.name(),
            spec.method.as_str()
        );
        let run = self.engine.run(&spec).await?;
        debug!(
            "[{request_id}] engine output: {} stdout bytes, {} stderr bytes",
            run.stdout.len(),
            run.stderr.len()
        );

        // The artifact walk is blocking filesystem I/O; keep it off the runtime
        let output_dir = spec.output_dir.clone();
        let result = tokio::task::spawn_blocking(move || {
            artifacts::extract(&output_dir, run.duration)
        })
        .await
        .map_err(|e| OcrError::Io(std::io::Error::other(e)))??;
        info!(
            "[{request_id}] OCR complete: {} chars, {} images, {:.2}s",
            result.text.chars().count(),
            result.images_count,
            result.processing_time
        );
        Ok(result)
    }
}
