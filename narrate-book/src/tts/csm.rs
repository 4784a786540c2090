//! Sesame CSM speech model embedded through PyO3.
//!
//! The Python `generator` module must be importable (installed or on
//! `PYTHONPATH`). Whatever shape `load_csm_1b` returns is normalized here, so
//! the rest of the crate only sees `SpeechModel`.

use super::model::{AudioClip, SpeechModel};
use super::voice::VoiceContext;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use log::{debug, info};
use pyo3::prelude::*;
use pyo3::types::{PyDict, PyList, PyTuple};
use std::path::Path;

pub struct CsmModel {
    generator: Py<PyAny>,
    sample_rate: u32,
    device: String,
}

impl CsmModel {
    /// Load the model, auto-detecting the device when none is given.
    pub fn load(model_path: &Path, device: Option<&str>) -> Result<Self> {
        Python::with_gil(|py| {
            let device = match device {
                Some(d) => d.to_string(),
                None => detect_device(py)?,
            };

            let module = py.import("generator").map_err(|e| {
                PipelineError::BackendUnavailable(format!("cannot import CSM generator module: {e}"))
            })?;

            info!("Loading CSM model from {} on {}", model_path.display(), device);
            let loaded = module
                .getattr("load_csm_1b")?
                .call1((model_path.to_string_lossy().as_ref(), device.as_str()))
                .map_err(|e| {
                    PipelineError::BackendUnavailable(format!(
                        "failed to load {}: {e}",
                        model_path.display()
                    ))
                })?;

            // Some loader versions return (generator, ...) instead of the generator.
            let generator = if loaded.is_instance_of::<PyTuple>() {
                loaded.get_item(0)?
            } else {
                loaded
            };

            let sample_rate: u32 = generator
                .getattr("sample_rate")?
                .extract()
                .context("CSM generator has no integer sample_rate")?;
            debug!("CSM sample rate {} Hz", sample_rate);

            Ok(Self {
                generator: generator.unbind(),
                sample_rate,
                device,
            })
        })
    }

    fn context_segments<'py>(
        &self,
        py: Python<'py>,
        context: Option<&VoiceContext>,
    ) -> Result<Bound<'py, PyList>> {
        let segments = PyList::empty(py);
        let Some(context) = context else {
            return Ok(segments);
        };

        let torch = py.import("torch")?;
        let mut audio = torch.call_method1("tensor", (context.samples.clone(),))?;
        if context.sample_rate != self.sample_rate {
            let kwargs = PyDict::new(py);
            kwargs.set_item("orig_freq", context.sample_rate)?;
            kwargs.set_item("new_freq", self.sample_rate)?;
            audio = py
                .import("torchaudio.functional")?
                .call_method("resample", (audio,), Some(&kwargs))?;
        }
        let audio = audio.call_method1("to", (self.device.as_str(),))?;

        let kwargs = PyDict::new(py);
        kwargs.set_item("text", context.transcript.as_str())?;
        kwargs.set_item("speaker", context.speaker)?;
        kwargs.set_item("audio", audio)?;
        let segment = py
            .import("generator")?
            .getattr("Segment")?
            .call((), Some(&kwargs))?;
        segments.append(segment)?;

        Ok(segments)
    }
}

fn detect_device(py: Python<'_>) -> Result<String> {
    let torch = py.import("torch").context("Failed to import torch")?;

    if torch
        .getattr("cuda")?
        .call_method0("is_available")?
        .extract::<bool>()?
    {
        return Ok("cuda".to_string());
    }

    let mps = torch.getattr("backends")?.getattr("mps")?;
    if mps.call_method0("is_available")?.extract::<bool>()? {
        return Ok("mps".to_string());
    }

    Ok("cpu".to_string())
}

impl SpeechModel for CsmModel {
    fn generate(
        &self,
        text: &str,
        speaker: u32,
        context: Option<&VoiceContext>,
        max_audio_length_ms: u32,
    ) -> Result<AudioClip> {
        Python::with_gil(|py| {
            let kwargs = PyDict::new(py);
            kwargs.set_item("text", text)?;
            kwargs.set_item("speaker", speaker)?;
            kwargs.set_item("context", self.context_segments(py, context)?)?;
            kwargs.set_item("max_audio_length_ms", max_audio_length_ms)?;

            let audio = self
                .generator
                .bind(py)
                .call_method("generate", (), Some(&kwargs))?;

            let samples: Vec<f32> = audio
                .call_method0("detach")?
                .call_method0("cpu")?
                .call_method0("float")?
                .call_method1("reshape", (-1,))?
                .call_method0("tolist")?
                .extract()?;

            Ok(AudioClip::new(samples, self.sample_rate))
        })
    }

    fn clear_cache(&self) -> Result<()> {
        Python::with_gil(|py| {
            py.import("gc")?.call_method0("collect")?;

            let torch = py.import("torch")?;
            match self.device.as_str() {
                "cuda" => {
                    torch.getattr("cuda")?.call_method0("empty_cache")?;
                }
                "mps" => {
                    let mps = torch.getattr("mps")?;
                    if mps.hasattr("empty_cache")? {
                        mps.call_method0("empty_cache")?;
                    }
                }
                _ => {}
            }
            Ok(())
        })
    }

    fn name(&self) -> &str {
        "csm"
    }
}
