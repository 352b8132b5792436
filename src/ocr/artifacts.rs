//! Artifact extraction from the engine output directory.
//!
//! The engine's only return channel is the filesystem, so the expected
//! artifacts are expressed as a declarative table of patterns with one
//! handler per kind, applied over a deterministic (name-sorted) recursive
//! walk. Text and HTML take the first match; metadata parse failures are
//! absorbed; images are counted. Extraction is testable without any real
//! engine binary.

use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::OcrJobResult;
use crate::error::OcrError;

/// Artifact categories the engine is known to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// Recognized text, markdown or plain (`.md`/`.txt`).
    Text,
    /// HTML rendering (`.html`/`.htm`).
    Html,
    /// Structured metadata (`*_metadata.json`).
    Metadata,
    /// Extracted page image, directly under an `images/` directory.
    Image,
}

struct ArtifactRule {
    kind: ArtifactKind,
    matches: fn(&Path) -> bool,
}

/// Ordered contract with the engine; first matching rule wins per file.
const ARTIFACT_RULES: &[ArtifactRule] = &[
    ArtifactRule {
        kind: ArtifactKind::Metadata,
        matches: is_metadata_file,
    },
    ArtifactRule {
        kind: ArtifactKind::Text,
        matches: is_text_file,
    },
    ArtifactRule {
        kind: ArtifactKind::Html,
        matches: is_html_file,
    },
    ArtifactRule {
        kind: ArtifactKind::Image,
        matches: is_image_file,
    },
];

fn extension_of(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn is_text_file(path: &Path) -> bool {
    matches!(extension_of(path).as_deref(), Some("md" | "txt"))
}

fn is_html_file(path: &Path) -> bool {
    matches!(extension_of(path).as_deref(), Some("html" | "htm"))
}

fn is_metadata_file(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().ends_with("_metadata.json"))
        .unwrap_or(false)
}

fn is_image_file(path: &Path) -> bool {
    path.parent()
        .and_then(|p| p.file_name())
        .map(|n| n == "images")
        .unwrap_or(false)
}

/// Classify one output file against the artifact table.
pub fn classify(path: &Path) -> Option<ArtifactKind> {
    ARTIFACT_RULES
        .iter()
        .find(|rule| (rule.matches)(path))
        .map(|rule| rule.kind)
}

/// Read a text artifact permissively: decoding errors are replaced, never
/// raised.
fn read_lossy(path: &Path) -> Result<String, OcrError> {
    let bytes = std::fs::read(path)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Assemble an [`OcrJobResult`] from the engine output directory.
///
/// Fails with [`OcrError::NoOutputProduced`] when neither a non-empty text
/// artifact nor a non-empty HTML artifact is found.
pub fn extract(output_dir: &Path, duration: Duration) -> Result<OcrJobResult, OcrError> {
    let mut text = String::new();
    let mut html: Option<String> = None;
    let mut metadata: Option<Value> = None;
    let mut images_count = 0usize;

    for entry in WalkDir::new(output_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|res| res.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match classify(path) {
            Some(ArtifactKind::Text) if text.is_empty() => {
                text = read_lossy(path)?;
                info!(
                    "found text artifact: {}, {} chars",
                    path.display(),
                    text.chars().count()
                );
            }
            Some(ArtifactKind::Html) if html.is_none() => {
                html = Some(read_lossy(path)?);
            }
            Some(ArtifactKind::Metadata) if metadata.is_none() => {
                match serde_json::from_str(&read_lossy(path)?) {
                    Ok(value) => metadata = Some(value),
                    // Text/html are the primary payload; bad metadata is not fatal
                    Err(e) => warn!("failed to parse metadata {}: {e}", path.display()),
                }
            }
            Some(ArtifactKind::Image) => images_count += 1,
            _ => {}
        }
    }

    let html = html.filter(|h| !h.is_empty());
    if text.is_empty() && html.is_none() {
        return Err(OcrError::NoOutputProduced);
    }

    Ok(OcrJobResult {
        text,
        html,
        metadata: metadata.unwrap_or_else(|| Value::Object(Default::default())),
        images_count,
        processing_time: duration.as_secs_f64(),
    })
}
