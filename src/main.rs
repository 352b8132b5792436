//! Chandra OCR API - synchronous document recognition over HTTP.
//!
//! A caller uploads a PDF or raster image, the service runs the external
//! Chandra OCR engine inside a per-request workspace, and responds with the
//! recognized text (plain) or a JSON envelope with metadata.

mod config;
mod error;
mod ocr;

use axum::{
    extract::{multipart::Field, DefaultBodyLimit, Multipart, State},
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Settings;
use error::OcrError;
use ocr::engine::ChandraEngine;
use ocr::ingest::{ChunkSource, UploadDescriptor, SUPPORTED_EXTENSIONS};
use ocr::pipeline::{IngestedFile, JobParams, Pipeline};
use ocr::workspace::WorkspaceManager;
use ocr::{OcrEngine, OcrJobResult, OcrMethod, RequestId};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    engine: Arc<dyn OcrEngine>,
    pipeline: Arc<Pipeline>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let settings = Arc::new(Settings::from_env()?);
    init_tracing(settings.log_dir.as_deref());

    tokio::fs::create_dir_all(&settings.workspace_root).await?;
    info!("workspace root: {}", settings.workspace_root.display());

    let engine: Arc<dyn OcrEngine> = Arc::new(ChandraEngine::new(&settings));
    let pipeline = Arc::new(Pipeline::new(
        settings.clone(),
        WorkspaceManager::new(settings.workspace_root.clone()),
        engine.clone(),
    ));
    let state = AppState {
        settings: settings.clone(),
        engine,
        pipeline,
    };

    // Build router
    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/ocr", post(ocr_text))
        .route("/ocr/json", post(ocr_json))
        .layer(DefaultBodyLimit::max(
            settings.max_file_size as usize + 1024 * 1024,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Run server
    let addr = format!("{}:{}", settings.host, settings.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Chandra OCR API listening on http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Console logging always; a daily-rolling JSON log file when LOG_DIR is set.
fn init_tracing(log_dir: Option<&Path>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "chandra_ocr_api=debug,tower_http=debug".into());

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer());

    match log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, "chandra_ocr.log");
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(appender)
                        .with_ansi(false),
                )
                .init();
        }
        None => registry.init(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// JSON envelope returned by `/ocr/json`.
#[derive(Serialize)]
struct OcrJsonResponse {
    success: bool,
    text: String,
    html: Option<String>,
    metadata: serde_json::Value,
    images_count: usize,
    processing_time: f64,
    file_size: u64,
    /// Declared client filename, passed through as-is; null when absent.
    filename: Option<String>,
}

/// Everything a response needs from one completed pipeline run.
struct JobOutcome {
    result: OcrJobResult,
    file_size: u64,
    filename: Option<String>,
}

/// Recognize a document, respond with the plain recognized text.
async fn ocr_text(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<String, OcrError> {
    let request_id = RequestId::new();
    info!("[{request_id}] new OCR request");
    let outcome = run_ocr(&state, multipart, &request_id).await.map_err(|e| {
        error!("[{request_id}] OCR request failed: {e}");
        e
    })?;
    Ok(outcome.result.text)
}

/// Recognize a document, respond with the full JSON envelope.
async fn ocr_json(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<OcrJsonResponse>, OcrError> {
    let request_id = RequestId::new();
    info!("[{request_id}] new JSON OCR request");
    let outcome = run_ocr(&state, multipart, &request_id).await.map_err(|e| {
        error!("[{request_id}] JSON OCR request failed: {e}");
        e
    })?;

    Ok(Json(OcrJsonResponse {
        success: true,
        text: outcome.result.text,
        html: outcome.result.html,
        metadata: outcome.result.metadata,
        images_count: outcome.result.images_count,
        processing_time: outcome.result.processing_time,
        file_size: outcome.file_size,
        filename: outcome.filename,
    }))
}

/// Drive one request through the pipeline: acquire workspace, parse the
/// multipart form (streaming the file part as it arrives), then invoke the
/// engine and extract its artifacts. The workspace is owned here, so it is
/// removed on every exit path.
async fn run_ocr(
    state: &AppState,
    mut multipart: Multipart,
    request_id: &RequestId,
) -> Result<JobOutcome, OcrError> {
    let workspace = state.pipeline.acquire(request_id)?;

    let mut params = JobParams {
        method: state.settings.default_method,
        include_images: false,
        include_headers: false,
    };
    let mut ingested: Option<IngestedFile> = None;
    let mut filename: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| OcrError::InvalidRequest(format!("malformed multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let upload = UploadDescriptor {
                    content_type: field.content_type().map(str::to_string),
                    filename: field.file_name().map(str::to_string),
                };
                filename = upload.filename.clone();
                info!(
                    "[{request_id}] receiving file: {}",
                    filename.as_deref().unwrap_or("<unnamed>")
                );
                ingested = Some(
                    state
                        .pipeline
                        .ingest(request_id, &workspace, &upload, FieldSource(field))
                        .await?,
                );
            }
            "method" => {
                let raw = read_text_field(field).await?;
                params.method = OcrMethod::from_str(&raw).ok_or_else(|| {
                    OcrError::InvalidRequest(format!(
                        "unknown method '{raw}': expected 'hf' or 'vllm'"
                    ))
                })?;
            }
            "include_images" => params.include_images = read_bool_field(field).await?,
            "include_headers" => params.include_headers = read_bool_field(field).await?,
            other => debug!("[{request_id}] ignoring multipart field '{other}'"),
        }
    }

    let input = ingested
        .ok_or_else(|| OcrError::InvalidRequest("missing 'file' part".to_string()))?;

    let result = state
        .pipeline
        .process(request_id, &workspace, &input, &params)
        .await;
    // Non-blocking cleanup; earlier exits fall back to the workspace's Drop
    workspace.release().await;
    let result = result?;

    Ok(JobOutcome {
        result,
        file_size: input.size,
        filename,
    })
}

/// Probe engine availability without touching a workspace.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available = state.engine.probe().await;
    if !available {
        warn!("engine '{}' unavailable", state.settings.engine_bin);
    }
    Json(json!({
        "status": if available { "healthy" } else { "unhealthy" },
        "engine_available": available,
        "version": env!("CARGO_PKG_VERSION"),
        "workspace_root": state.settings.workspace_root.display().to_string(),
        "workspace_root_exists": state.settings.workspace_root.exists(),
    }))
}

/// Plain-text usage banner.
async fn root(State(state): State<AppState>) -> String {
    let s = &state.settings;
    format!(
        r#"
==============================================================
            CHANDRA OCR API SERVICE v{version}
==============================================================

Local document recognition service backed by the Chandra OCR engine.

Endpoints:
  POST /ocr       recognize a document -> plain text (Markdown)
  POST /ocr/json  recognize a document -> JSON with metadata
  GET  /health    service health check

Example:
  curl -X POST "http://localhost:{port}/ocr" \
       -F "file=@document.pdf" \
       -F "method={method}" \
       --output result.txt

Configuration:
  port:            {port}
  max file size:   {max_mb} MB
  OCR timeout:     {timeout}s
  default method:  {method}

Supported formats:
  {formats}
"#,
        version = env!("CARGO_PKG_VERSION"),
        port = s.port,
        max_mb = s.max_file_size / 1024 / 1024,
        timeout = s.ocr_timeout_secs,
        method = s.default_method.as_str(),
        formats = SUPPORTED_EXTENSIONS.join(", "),
    )
}

// ============================================================================
// Multipart helpers
// ============================================================================

/// Streams one multipart field through the pipeline's chunk interface.
struct FieldSource<'a>(Field<'a>);

#[async_trait::async_trait]
impl ChunkSource for FieldSource<'_> {
    async fn next_chunk(&mut self) -> Result<Option<axum::body::Bytes>, OcrError> {
        self.0
            .chunk()
            .await
            .map_err(|e| OcrError::InvalidRequest(format!("failed to read upload: {e}")))
    }
}

async fn read_text_field(field: Field<'_>) -> Result<String, OcrError> {
    field
        .text()
        .await
        .map_err(|e| OcrError::InvalidRequest(format!("failed to read form field: {e}")))
}

async fn read_bool_field(field: Field<'_>) -> Result<bool, OcrError> {
    let name = field.name().unwrap_or("field").to_string();
    let raw = read_text_field(field).await?;
    parse_bool(&raw)
        .ok_or_else(|| OcrError::InvalidRequest(format!("invalid boolean '{raw}' for '{name}'")))
}

/// Form-value boolean coercion: true/1/yes/on and false/0/no/off.
fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_form_truthy_values() {
        for raw in ["true", "True", "1", "yes", "ON"] {
            assert_eq!(parse_bool(raw), Some(true), "raw: {raw}");
        }
    }

    #[test]
    fn parse_bool_accepts_form_falsy_values() {
        for raw in ["false", "FALSE", "0", "no", "off"] {
            assert_eq!(parse_bool(raw), Some(false), "raw: {raw}");
        }
    }

    #[test]
    fn parse_bool_rejects_everything_else() {
        for raw in ["", "2", "truthy", "да"] {
            assert_eq!(parse_bool(raw), None, "raw: {raw}");
        }
    }

    #[test]
    fn json_envelope_passes_missing_filename_through_as_null() {
        let response = OcrJsonResponse {
            success: true,
            text: "text".to_string(),
            html: None,
            metadata: json!({}),
            images_count: 0,
            processing_time: 0.5,
            file_size: 4,
            filename: None,
        };
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["filename"], serde_json::Value::Null);

        let named = OcrJsonResponse {
            filename: Some("scan.pdf".to_string()),
            ..response
        };
        let value = serde_json::to_value(&named).unwrap();
        assert_eq!(value["filename"], "scan.pdf");
    }
}
