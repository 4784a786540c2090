//! Speech synthesis backends behind one trait.
//!
//! Two invocation shapes are supported: an external command that writes a
//! WAV file (`piper`), and an in-process model that returns samples (`csm`,
//! behind the `python` feature). Both deliver complete WAV bytes.

pub mod command;
#[cfg(feature = "python")]
pub mod csm;
pub mod model;
#[cfg(test)]
pub mod scripted;
pub mod voice;
pub mod watermark;

use crate::error::PipelineError;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

pub use voice::VoiceContext;

/// Default cap on generated audio per chunk.
pub const DEFAULT_MAX_AUDIO_LENGTH_MS: u32 = 60_000;

/// One synthesis call.
#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    pub text: String,
    pub speaker_id: u32,
    pub context: Option<Arc<VoiceContext>>,
    pub max_audio_length_ms: u32,
}

impl SynthesisRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_id: 0,
            context: None,
            max_audio_length_ms: DEFAULT_MAX_AUDIO_LENGTH_MS,
        }
    }
}

/// Backend trait - all synthesis engines implement this.
#[async_trait]
pub trait SynthesisBackend: Send + Sync {
    /// Synthesize one chunk to a complete WAV file image.
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>>;

    /// Release cached accelerator state between batches.
    async fn clear_cache(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Which backend to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// External piper command
    #[default]
    Piper,
    /// Sesame CSM through embedded Python
    Csm,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Piper => write!(f, "piper"),
            BackendKind::Csm => write!(f, "csm"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "piper" => Ok(BackendKind::Piper),
            "csm" => Ok(BackendKind::Csm),
            other => Err(format!("unknown backend '{other}' (expected piper or csm)")),
        }
    }
}

/// Everything needed to construct a backend.
#[derive(Debug, Clone)]
pub struct BackendOptions {
    pub kind: BackendKind,
    pub model: Option<PathBuf>,
    pub piper_binary: PathBuf,
    /// Torch device for the embedded model; auto-detected when `None`
    pub device: Option<String>,
}

/// Create a synthesis backend, failing before any synthesis if it cannot run.
pub fn create_backend(options: &BackendOptions) -> Result<Box<dyn SynthesisBackend>> {
    match options.kind {
        BackendKind::Piper => {
            let model = options.model.clone().ok_or_else(|| {
                PipelineError::BackendUnavailable("piper needs --model <voice.onnx>".to_string())
            })?;
            Ok(Box::new(command::CommandBackend::new(
                options.piper_binary.clone(),
                model,
            )?))
        }
        #[cfg(feature = "python")]
        BackendKind::Csm => {
            let model = options.model.clone().ok_or_else(|| {
                PipelineError::BackendUnavailable("csm needs --model <checkpoint>".to_string())
            })?;
            let speech_model = csm::CsmModel::load(&model, options.device.as_deref())?;
            Ok(Box::new(model::ModelBackend::new(
                Arc::new(speech_model),
                Box::new(watermark::NoopWatermarker),
            )))
        }
        #[cfg(not(feature = "python"))]
        BackendKind::Csm => Err(PipelineError::BackendUnavailable(
            "this build has no embedded model support (rebuild with --features python)".to_string(),
        )
        .into()),
    }
}
