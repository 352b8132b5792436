//! Service configuration.
//!
//! Settings are read once at startup from environment variables (a `.env`
//! file is loaded first if present) and passed explicitly into the components
//! that need them. There is no ambient global state.

use anyhow::{bail, Result};
use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use crate::ocr::OcrMethod;

/// All recognized settings with their defaults.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Bind address (`HOST`, default `0.0.0.0`).
    pub host: String,
    /// Bind port (`PORT`, default `8000`).
    pub port: u16,
    /// Root directory under which per-request workspaces are created
    /// (`WORKSPACE_ROOT`, default `/data/chandraocr/temp`).
    pub workspace_root: PathBuf,
    /// Maximum accepted upload size in bytes (`MAX_FILE_SIZE`, default 100 MiB).
    pub max_file_size: u64,
    /// Wall-clock limit for one engine invocation in seconds
    /// (`OCR_TIMEOUT`, default 600).
    pub ocr_timeout_secs: u64,
    /// Inference method used when the request does not name one
    /// (`DEFAULT_METHOD`, default `hf`).
    pub default_method: OcrMethod,
    /// Engine executable invoked per request (`ENGINE_BIN`, default `chandra`).
    pub engine_bin: String,
    /// Model checkpoint exported to the engine environment
    /// (`MODEL_CHECKPOINT`, default `datalab-to/chandra`).
    pub model_checkpoint: String,
    /// Token budget exported to the engine environment
    /// (`MAX_OUTPUT_TOKENS`, default 8192).
    pub max_output_tokens: u32,
    /// vLLM endpoint exported to the engine environment
    /// (`VLLM_API_BASE`, default `http://localhost:8000/v1`).
    pub vllm_api_base: String,
    /// vLLM model name exported to the engine environment
    /// (`VLLM_MODEL_NAME`, default `chandra`).
    pub vllm_model_name: String,
    /// GPU selection exported to the engine environment
    /// (`VLLM_GPUS`, default `0`).
    pub vllm_gpus: String,
    /// Optional directory for the daily-rolling JSON log file (`LOG_DIR`).
    pub log_dir: Option<PathBuf>,
}

impl Settings {
    /// Load settings from the environment, falling back to coded defaults.
    pub fn from_env() -> Result<Self> {
        let default_method = match std::env::var("DEFAULT_METHOD") {
            Ok(v) => match OcrMethod::from_str(&v) {
                Some(m) => m,
                None => bail!("invalid DEFAULT_METHOD '{v}': expected 'hf' or 'vllm'"),
            },
            Err(_) => OcrMethod::Hf,
        };

        Ok(Self {
            host: env_or("HOST", "0.0.0.0".to_string())?,
            port: env_or("PORT", 8000)?,
            workspace_root: PathBuf::from(env_or(
                "WORKSPACE_ROOT",
                "/data/chandraocr/temp".to_string(),
            )?),
            max_file_size: env_or("MAX_FILE_SIZE", 100 * 1024 * 1024)?,
            ocr_timeout_secs: env_or("OCR_TIMEOUT", 600)?,
            default_method,
            engine_bin: env_or("ENGINE_BIN", "chandra".to_string())?,
            model_checkpoint: env_or("MODEL_CHECKPOINT", "datalab-to/chandra".to_string())?,
            max_output_tokens: env_or("MAX_OUTPUT_TOKENS", 8192)?,
            vllm_api_base: env_or("VLLM_API_BASE", "http://localhost:8000/v1".to_string())?,
            vllm_model_name: env_or("VLLM_MODEL_NAME", "chandra".to_string())?,
            vllm_gpus: env_or("VLLM_GPUS", "0".to_string())?,
            log_dir: std::env::var("LOG_DIR").ok().map(PathBuf::from),
        })
    }
}

/// Read an environment variable, parsing it into `T`, or use the default when
/// the variable is unset. A set-but-unparseable value is an error, not a
/// silent fallback.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid {key}='{raw}': {e}")),
        Err(_) => Ok(default),
    }
}
