//! In-process speech models: samples in memory, encoded to WAV at the boundary.

use super::voice::VoiceContext;
use super::watermark::Watermarker;
use super::{SynthesisBackend, SynthesisRequest};
use crate::audio::wav::encode_wav;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// Mono audio returned by a model.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// A loaded model with one normalized calling convention.
///
/// Calls are blocking and may hold accelerator state; the backend runs them
/// on the blocking pool, one at a time.
pub trait SpeechModel: Send + Sync {
    fn generate(
        &self,
        text: &str,
        speaker: u32,
        context: Option<&VoiceContext>,
        max_audio_length_ms: u32,
    ) -> Result<AudioClip>;

    fn clear_cache(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

/// Adapts a `SpeechModel` to `SynthesisBackend`, watermarking every clip.
///
/// A caller that stops waiting (a timeout) does not stop the blocking call, so
/// every model call takes `gate` first; an abandoned call finishes before the
/// next one starts.
pub struct ModelBackend {
    model: Arc<dyn SpeechModel>,
    watermarker: Arc<dyn Watermarker>,
    gate: Arc<Mutex<()>>,
}

impl ModelBackend {
    pub fn new(model: Arc<dyn SpeechModel>, watermarker: Box<dyn Watermarker>) -> Self {
        Self {
            model,
            watermarker: Arc::from(watermarker),
            gate: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl SynthesisBackend for ModelBackend {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        let model = Arc::clone(&self.model);
        let watermarker = Arc::clone(&self.watermarker);
        let gate = Arc::clone(&self.gate);
        let request = request.clone();

        // Run in a blocking task to not block the tokio runtime
        tokio::task::spawn_blocking(move || {
            let _turn = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let clip = model.generate(
                &request.text,
                request.speaker_id,
                request.context.as_deref(),
                request.max_audio_length_ms,
            )?;
            if clip.samples.is_empty() {
                anyhow::bail!("{} returned no audio", model.name());
            }
            let clip = watermarker.apply(clip)?;
            encode_wav(&clip.samples, clip.sample_rate)
        })
        .await
        .context("Task join error")?
    }

    async fn clear_cache(&self) -> Result<()> {
        let model = Arc::clone(&self.model);
        let gate = Arc::clone(&self.gate);
        tokio::task::spawn_blocking(move || {
            let _turn = gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            model.clear_cache()
        })
        .await
        .context("Task join error")?
    }

    fn name(&self) -> &str {
        self.model.name()
    }
}
