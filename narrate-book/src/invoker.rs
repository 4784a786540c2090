//! Synthesis Invoker: one backend call per chunk, failures absorbed.
//!
//! Backend errors stop here. A failed chunk is logged and reported as `false`;
//! it is simply absent from the assembly.

use crate::store::{ChunkKey, ChunkStore};
use crate::tts::{DEFAULT_MAX_AUDIO_LENGTH_MS, SynthesisBackend, SynthesisRequest, VoiceContext};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct InvokerOptions {
    pub speaker_id: u32,
    pub max_audio_length_ms: u32,
    /// Give up on a chunk after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl Default for InvokerOptions {
    fn default() -> Self {
        Self {
            speaker_id: 0,
            max_audio_length_ms: DEFAULT_MAX_AUDIO_LENGTH_MS,
            timeout: None,
        }
    }
}

pub struct SynthesisInvoker {
    backend: Arc<dyn SynthesisBackend>,
    voice: Option<Arc<VoiceContext>>,
    options: InvokerOptions,
}

impl SynthesisInvoker {
    pub fn new(
        backend: Arc<dyn SynthesisBackend>,
        voice: Option<VoiceContext>,
        options: InvokerOptions,
    ) -> Self {
        Self {
            backend,
            voice: voice.map(Arc::new),
            options,
        }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Synthesize `text` and store it under `key`. Returns whether an artifact was written.
    pub async fn synthesize(&self, text: &str, key: ChunkKey, store: &ChunkStore) -> bool {
        let request = SynthesisRequest {
            text: text.to_string(),
            speaker_id: self.options.speaker_id,
            context: self.voice.clone(),
            max_audio_length_ms: self.options.max_audio_length_ms,
        };

        let call = self.backend.synthesize(&request);
        let result = match self.options.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {}s", limit.as_secs_f64())),
            },
            None => call.await,
        };

        let audio = match result {
            Ok(audio) if audio.is_empty() => {
                warn!("Skipping {}: backend returned no audio", key);
                return false;
            }
            Ok(audio) => audio,
            Err(e) => {
                warn!("Skipping {}: synthesis failed: {:#}", key, e);
                return false;
            }
        };

        match store.write(key, &audio) {
            Ok(path) => {
                debug!("Wrote {}", path.display());
                true
            }
            Err(e) => {
                warn!("Skipping {}: {:#}", key, e);
                false
            }
        }
    }

    /// Ask the backend to drop cached state. Failures are logged only.
    pub async fn clear_cache(&self) {
        match self.backend.clear_cache().await {
            Ok(()) => debug!("Cleared {} cache", self.backend.name()),
            Err(e) => warn!("Cache clear failed: {:#}", e),
        }
    }
}
