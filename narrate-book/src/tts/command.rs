//! External-command backend: one `piper` process per chunk.

use super::{SynthesisBackend, SynthesisRequest};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

/// Runs `<program> --model <model> --output_file <out> --file <txt>`.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    program: PathBuf,
    model: PathBuf,
}

impl CommandBackend {
    /// Check the program and model up front so a broken setup fails before synthesis.
    ///
    /// Bare names are looked up on PATH; anything with a directory part must exist as given.
    pub fn new(program: PathBuf, model: PathBuf) -> Result<Self> {
        let program = if program.components().count() > 1 {
            if !program.is_file() {
                return Err(PipelineError::BackendUnavailable(format!(
                    "program not found: {}",
                    program.display()
                ))
                .into());
            }
            program
        } else {
            which::which(&program).map_err(|e| {
                PipelineError::BackendUnavailable(format!(
                    "'{}' not found on PATH: {}",
                    program.display(),
                    e
                ))
            })?
        };

        if !model.is_file() {
            return Err(PipelineError::BackendUnavailable(format!(
                "model file not found: {}",
                model.display()
            ))
            .into());
        }

        Ok(Self { program, model })
    }
}

#[async_trait]
impl SynthesisBackend for CommandBackend {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let work_dir = tempfile::tempdir().context("Failed to create scratch directory")?;
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.wav");

        tokio::fs::write(&input, request.text.as_bytes())
            .await
            .context("Failed to write chunk text")?;

        let mut cmd = Command::new(&self.program);
        cmd.arg("--model")
            .arg(&self.model)
            .arg("--output_file")
            .arg(&output)
            .arg("--file")
            .arg(&input);
        if request.speaker_id != 0 {
            cmd.arg("--speaker").arg(request.speaker_id.to_string());
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("Running {:?}", cmd);
        let result = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.program.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                self.program.display(),
                result.status,
                stderr.trim()
            );
        }

        let audio = tokio::fs::read(&output)
            .await
            .with_context(|| format!("{} produced no output file", self.program.display()))?;
        if audio.is_empty() {
            anyhow::bail!("{} produced an empty output file", self.program.display());
        }

        Ok(audio)
    }

    fn name(&self) -> &str {
        "piper"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    const FAKE_PIPER: &str = r#"#!/bin/sh
out=""
txt=""
while [ $# -gt 0 ]; do
  case "$1" in
    --output_file) out="$2"; shift 2 ;;
    --file) txt="$2"; shift 2 ;;
    *) shift ;;
  esac
done
printf 'RIFF' > "$out"
cat "$txt" >> "$out"
"#;

    const FAILING_PIPER: &str = "#!/bin/sh\necho 'voice model is corrupt' >&2\nexit 3\n";

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn model(dir: &Path) -> PathBuf {
        let path = dir.join("voice.onnx");
        fs::write(&path, b"onnx").unwrap();
        path
    }

    #[tokio::test]
    async fn test_synthesize_reads_output_file() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(temp_dir.path(), "piper", FAKE_PIPER);
        let backend = CommandBackend::new(program, model(temp_dir.path())).unwrap();

        let audio = backend
            .synthesize(&SynthesisRequest::new("Hello there."))
            .await
            .unwrap();
        assert_eq!(audio, b"RIFFHello there.");
    }

    #[tokio::test]
    async fn test_failure_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let program = script(temp_dir.path(), "piper", FAILING_PIPER);
        let backend = CommandBackend::new(program, model(temp_dir.path())).unwrap();

        let err = backend
            .synthesize(&SynthesisRequest::new("Hello."))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("voice model is corrupt"));
    }

    #[test]
    fn test_missing_program_or_model_is_unavailable() {
        let temp_dir = TempDir::new().unwrap();
        let missing = CommandBackend::new(
            temp_dir.path().join("no-such-piper"),
            model(temp_dir.path()),
        );
        assert!(missing.is_err());

        let program = script(temp_dir.path(), "piper", FAKE_PIPER);
        let no_model = CommandBackend::new(program, temp_dir.path().join("absent.onnx"));
        let err = no_model.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_bare_program_name_resolves_on_path() {
        let temp_dir = TempDir::new().unwrap();
        let backend = CommandBackend::new(PathBuf::from("sh"), model(temp_dir.path())).unwrap();
        assert!(backend.program.is_absolute());
        assert!(backend.program.ends_with("sh"));

        let err = CommandBackend::new(
            PathBuf::from("narrate-no-such-piper-binary"),
            model(temp_dir.path()),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::BackendUnavailable(msg)) if msg.contains("not found on PATH")
        ));
    }
}
