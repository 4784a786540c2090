//! Scripted in-memory backend for exercising the pipeline without a model.

use super::{SynthesisBackend, SynthesisRequest};
use crate::audio::wav::encode_wav;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const SAMPLE_RATE: u32 = 8000;

/// Deterministic backend: 10 ms of tone per character of input.
#[derive(Default)]
pub struct ScriptedBackend {
    /// Requests whose text contains any of these fail
    fail_on: Vec<String>,
    /// Requests whose text contains this sleep for `delay` first
    slow_on: Option<(String, Duration)>,
    calls: Mutex<Vec<String>>,
    clears: AtomicUsize,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_on.push(marker.to_string());
        self
    }

    pub fn slow_on(mut self, marker: &str, delay: Duration) -> Self {
        self.slow_on = Some((marker.to_string(), delay));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Texts synthesized so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_count(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisBackend for ScriptedBackend {
    async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        self.calls.lock().unwrap().push(request.text.clone());

        if let Some((marker, delay)) = &self.slow_on {
            if request.text.contains(marker.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }

        if self.fail_on.iter().any(|m| request.text.contains(m.as_str())) {
            anyhow::bail!("scripted failure for {:?}", request.text);
        }

        let frames = request.text.chars().count() * (SAMPLE_RATE as usize / 100);
        let samples: Vec<f32> = (0..frames).map(|i| ((i % 16) as f32 - 8.0) / 16.0).collect();
        encode_wav(&samples, SAMPLE_RATE)
    }

    async fn clear_cache(&self) -> Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
