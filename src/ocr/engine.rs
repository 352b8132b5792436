//! Subprocess invocation of the Chandra OCR engine.
//!
//! The engine communicates only through the filesystem: it reads the input
//! file and drops artifacts into the output directory. This module owns the
//! command-line contract (`<bin> <input> <output> --method M [--no-images]
//! [--no-headers-footers]`), the wall-clock timeout, and the capture of
//! diagnostic output. One attempt per job, no retries.

use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{error, info, warn};

use super::{EngineRun, OcrEngine, OcrJobSpec};
use crate::config::Settings;
use crate::error::OcrError;

/// Bound on the stderr excerpt carried inside an `EngineFailure`.
const STDERR_TAIL_CHARS: usize = 2000;

/// Health-probe limit; `--help` should return near-instantly.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Production engine: runs the `chandra` CLI as a child process.
pub struct ChandraEngine {
    bin: String,
    timeout: Duration,
    model_checkpoint: String,
    max_output_tokens: u32,
    vllm_api_base: String,
    vllm_model_name: String,
    vllm_gpus: String,
}

impl ChandraEngine {
    pub fn new(settings: &Settings) -> Self {
        Self {
            bin: settings.engine_bin.clone(),
            timeout: Duration::from_secs(settings.ocr_timeout_secs),
            model_checkpoint: settings.model_checkpoint.clone(),
            max_output_tokens: settings.max_output_tokens,
            vllm_api_base: settings.vllm_api_base.clone(),
            vllm_model_name: settings.vllm_model_name.clone(),
            vllm_gpus: settings.vllm_gpus.clone(),
        }
    }
}

/// Argument list for one job. The engine defaults to inclusive behavior, so
/// the job's positive flags invert into `--no-*` switches.
fn build_args(spec: &OcrJobSpec) -> Vec<String> {
    let mut args = vec![
        spec.input_path.to_string_lossy().into_owned(),
        spec.output_dir.to_string_lossy().into_owned(),
        "--method".to_string(),
        spec.method.as_str().to_string(),
    ];
    if !spec.include_images {
        args.push("--no-images".to_string());
    }
    if !spec.include_headers {
        args.push("--no-headers-footers".to_string());
    }
    args
}

/// Last `max_chars` characters of captured stderr, char-boundary safe.
fn stderr_tail(stderr: &str, max_chars: usize) -> String {
    if stderr.is_empty() {
        return "unknown error".to_string();
    }
    let count = stderr.chars().count();
    if count <= max_chars {
        stderr.to_string()
    } else {
        stderr.chars().skip(count - max_chars).collect()
    }
}

#[async_trait::async_trait]
impl OcrEngine for ChandraEngine {
    fn name(&self) -> &str {
        "chandra"
    }

    async fn run(&self, spec: &OcrJobSpec) -> Result<EngineRun, OcrError> {
        tokio::fs::create_dir_all(&spec.output_dir).await?;

        let args = build_args(spec);
        info!("running: {} {}", self.bin, args.join(" "));

        let start = Instant::now();
        let child = Command::new(&self.bin)
            .args(&args)
            .env("MODEL_CHECKPOINT", &self.model_checkpoint)
            .env("MAX_OUTPUT_TOKENS", self.max_output_tokens.to_string())
            .env("VLLM_API_BASE", &self.vllm_api_base)
            .env("VLLM_MODEL_NAME", &self.vllm_model_name)
            .env("VLLM_GPUS", &self.vllm_gpus)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the wait future on timeout kills the child (kill_on_drop)
        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                error!(
                    "engine timed out after {}s, killing subprocess",
                    self.timeout.as_secs()
                );
                return Err(OcrError::EngineTimeout(self.timeout.as_secs()));
            }
        };
        let duration = start.elapsed();

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let code = output.status.code().unwrap_or(-1);
            let tail = stderr_tail(&stderr, STDERR_TAIL_CHARS);
            error!("engine exited with code {code}: {tail}");
            return Err(OcrError::EngineFailure {
                code,
                stderr_tail: tail,
            });
        }

        info!("engine finished in {:.2}s", duration.as_secs_f64());
        Ok(EngineRun {
            stdout,
            stderr,
            duration,
        })
    }

    async fn probe(&self) -> bool {
        let spawned = Command::new(&self.bin)
            .arg("--help")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("engine '{}' unavailable: {e}", self.bin);
                return false;
            }
        };

        matches!(
            timeout(PROBE_TIMEOUT, child.wait()).await,
            Ok(Ok(status)) if status.success()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::OcrMethod;
    use std::path::{Path, PathBuf};

    fn spec(include_images: bool, include_headers: bool) -> OcrJobSpec {
        OcrJobSpec {
            input_path: PathBuf::from("/tmp/ws/input.pdf"),
            output_dir: PathBuf::from("/tmp/ws/output"),
            method: OcrMethod::Hf,
            include_images,
            include_headers,
        }
    }

    #[test]
    fn args_start_with_paths_and_method() {
        let args = build_args(&spec(true, true));
        assert_eq!(
            args,
            vec!["/tmp/ws/input.pdf", "/tmp/ws/output", "--method", "hf"]
        );
    }

    #[test]
    fn cleared_flags_invert_to_exclusion_switches() {
        let args = build_args(&spec(false, false));
        assert!(args.contains(&"--no-images".to_string()));
        assert!(args.contains(&"--no-headers-footers".to_string()));
    }

    #[test]
    fn vllm_method_is_passed_through() {
        let mut s = spec(true, true);
        s.method = OcrMethod::Vllm;
        let args = build_args(&s);
        assert_eq!(args[3], "vllm");
    }

    #[test]
    fn stderr_tail_bounds_long_output() {
        let long = "x".repeat(5000);
        let tail = stderr_tail(&long, STDERR_TAIL_CHARS);
        assert_eq!(tail.chars().count(), STDERR_TAIL_CHARS);
    }

    #[test]
    fn stderr_tail_is_char_boundary_safe() {
        let s = "Ошибка распознавания документа";
        let tail = stderr_tail(s, 9);
        assert_eq!(tail, "документа");
    }

    #[test]
    fn empty_stderr_tail_is_placeholder() {
        assert_eq!(stderr_tail("", STDERR_TAIL_CHARS), "unknown error");
    }

    #[cfg(unix)]
    mod subprocess {
        use super::*;

        fn engine_with_bin(bin: &Path, timeout_secs: u64) -> ChandraEngine {
            ChandraEngine {
                bin: bin.to_string_lossy().into_owned(),
                timeout: Duration::from_secs(timeout_secs),
                model_checkpoint: "datalab-to/chandra".to_string(),
                max_output_tokens: 8192,
                vllm_api_base: "http://localhost:8000/v1".to_string(),
                vllm_model_name: "chandra".to_string(),
                vllm_gpus: "0".to_string(),
            }
        }

        fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
            use std::os::unix::fs::PermissionsExt;
            let path = dir.join(name);
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            let mut perms = std::fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&path, perms).unwrap();
            path
        }

        fn job_spec(dir: &Path) -> OcrJobSpec {
            OcrJobSpec {
                input_path: dir.join("input.pdf"),
                output_dir: dir.join("output"),
                method: OcrMethod::Hf,
                include_images: false,
                include_headers: false,
            }
        }

        #[tokio::test]
        async fn successful_run_captures_output_and_duration() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(dir.path(), "ok.sh", "echo processed; echo diag >&2; exit 0");
            let engine = engine_with_bin(&bin, 30);

            let run = engine.run(&job_spec(dir.path())).await.unwrap();
            assert_eq!(run.stdout.trim(), "processed");
            assert_eq!(run.stderr.trim(), "diag");
            assert!(run.duration > Duration::ZERO);
            assert!(dir.path().join("output").is_dir());
        }

        #[tokio::test]
        async fn engine_environment_carries_model_and_vllm_settings() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(
                dir.path(),
                "env.sh",
                "echo \"$MODEL_CHECKPOINT|$MAX_OUTPUT_TOKENS|$VLLM_API_BASE|$VLLM_MODEL_NAME|$VLLM_GPUS\"",
            );
            let engine = engine_with_bin(&bin, 30);

            let run = engine.run(&job_spec(dir.path())).await.unwrap();
            assert_eq!(
                run.stdout.trim(),
                "datalab-to/chandra|8192|http://localhost:8000/v1|chandra|0"
            );
        }

        #[tokio::test]
        async fn nonzero_exit_surfaces_code_and_stderr() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(dir.path(), "fail.sh", "echo model not found >&2; exit 3");
            let engine = engine_with_bin(&bin, 30);

            let err = engine.run(&job_spec(dir.path())).await.unwrap_err();
            match err {
                OcrError::EngineFailure { code, stderr_tail } => {
                    assert_eq!(code, 3);
                    assert!(stderr_tail.contains("model not found"), "got: {stderr_tail}");
                }
                other => panic!("expected EngineFailure, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn slow_engine_hits_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(dir.path(), "slow.sh", "sleep 30");
            let engine = engine_with_bin(&bin, 1);

            let err = engine.run(&job_spec(dir.path())).await.unwrap_err();
            assert!(matches!(err, OcrError::EngineTimeout(1)), "got {err:?}");
        }

        #[tokio::test]
        async fn probe_reports_healthy_binary() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(dir.path(), "chandra.sh", "exit 0");
            let engine = engine_with_bin(&bin, 30);
            assert!(engine.probe().await);
        }

        #[tokio::test]
        async fn probe_reports_missing_binary() {
            let dir = tempfile::tempdir().unwrap();
            let engine = engine_with_bin(&dir.path().join("does-not-exist"), 30);
            assert!(!engine.probe().await);
        }

        #[tokio::test]
        async fn probe_reports_failing_binary() {
            let dir = tempfile::tempdir().unwrap();
            let bin = write_script(dir.path(), "broken.sh", "exit 1");
            let engine = engine_with_bin(&bin, 30);
            assert!(!engine.probe().await);
        }
    }
}
