//! Voice presets: reference audio handed to the model as conditioning context.

use crate::audio::wav::read_wav;
use anyhow::Result;
use log::{info, warn};
use std::path::{Path, PathBuf};

/// Transcript attached to a preset clip; the audio is what conditions the voice.
pub const PRESET_TRANSCRIPT: &str = "Voice prompt.";

const PRESET_SUBDIRS: &[&str] = &["prompts", "presets", "voices"];
const PRESET_EXTENSIONS: &[&str] = &["wav", "mp3"];

/// A reference-audio segment for voice conditioning.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceContext {
    pub transcript: String,
    pub speaker: u32,
    /// Mono samples in [-1, 1]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

/// Directory presets are searched from: the model itself if it is a directory,
/// otherwise the directory containing the model file.
pub fn preset_root(model: &Path) -> PathBuf {
    if model.is_dir() {
        model.to_path_buf()
    } else {
        model.parent().map(Path::to_path_buf).unwrap_or_default()
    }
}

/// Search `root` and its `prompts/`, `presets/`, `voices/` subdirectories for
/// `name`, `name.wav` or `name.mp3`, in that order.
pub fn find_voice_preset(root: &Path, name: &str) -> Option<PathBuf> {
    let locations = std::iter::once(root.to_path_buf())
        .chain(PRESET_SUBDIRS.iter().map(|sub| root.join(sub)));

    let candidates: Vec<String> = std::iter::once(name.to_string())
        .chain(PRESET_EXTENSIONS.iter().map(|ext| format!("{name}.{ext}")))
        .collect();

    locations
        .filter(|location| location.is_dir())
        .flat_map(|location| candidates.iter().map(move |c| location.join(c)))
        .find(|path| path.is_file())
}

/// Load a preset WAV as a context segment, downmixing to mono.
pub fn load_voice_context(path: &Path, speaker: u32) -> Result<VoiceContext> {
    let audio = read_wav(path)?;
    let channels = usize::from(audio.channels.max(1));
    let samples = audio
        .samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok(VoiceContext {
        transcript: PRESET_TRANSCRIPT.to_string(),
        speaker,
        samples,
        sample_rate: audio.sample_rate,
    })
}

/// Resolve a named preset into a context, or `None` with a warning.
///
/// A missing or unreadable preset never stops a run; synthesis proceeds with
/// the model's default voice.
pub fn resolve_voice(model: Option<&Path>, preset: Option<&str>, speaker: u32) -> Option<VoiceContext> {
    let name = preset?;
    let root = model.map(preset_root).unwrap_or_else(|| PathBuf::from("."));

    let Some(path) = find_voice_preset(&root, name) else {
        warn!(
            "Voice preset '{}' not found under {}; using the default voice",
            name,
            root.display()
        );
        return None;
    };

    match load_voice_context(&path, speaker) {
        Ok(context) => {
            info!("Using voice preset {}", path.display());
            Some(context)
        }
        Err(e) => {
            warn!(
                "Could not load voice preset {}: {:#}; using the default voice",
                path.display(),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::wav::encode_wav;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_find_preset_in_subdirectory_with_extension() {
        let temp_dir = TempDir::new().unwrap();
        let voices = temp_dir.path().join("voices");
        fs::create_dir_all(&voices).unwrap();
        fs::write(voices.join("calm.wav"), b"x").unwrap();

        assert_eq!(
            find_voice_preset(temp_dir.path(), "calm"),
            Some(voices.join("calm.wav"))
        );
        assert_eq!(find_voice_preset(temp_dir.path(), "loud"), None);
    }

    #[test]
    fn test_root_wins_over_subdirectories() {
        let temp_dir = TempDir::new().unwrap();
        let prompts = temp_dir.path().join("prompts");
        fs::create_dir_all(&prompts).unwrap();
        fs::write(prompts.join("calm.wav"), b"x").unwrap();
        fs::write(temp_dir.path().join("calm.mp3"), b"x").unwrap();

        assert_eq!(
            find_voice_preset(temp_dir.path(), "calm"),
            Some(temp_dir.path().join("calm.mp3"))
        );
    }

    #[test]
    fn test_preset_root_of_model_file() {
        let temp_dir = TempDir::new().unwrap();
        let model = temp_dir.path().join("en_US-voice.onnx");
        fs::write(&model, b"onnx").unwrap();
        assert_eq!(preset_root(&model), temp_dir.path());
        assert_eq!(preset_root(temp_dir.path()), temp_dir.path());
    }

    #[test]
    fn test_load_context() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("calm.wav");
        fs::write(&path, encode_wav(&[0.0; 2400], 24000).unwrap()).unwrap();

        let context = load_voice_context(&path, 3).unwrap();
        assert_eq!(context.transcript, "Voice prompt.");
        assert_eq!(context.speaker, 3);
        assert_eq!(context.samples.len(), 2400);
        assert_eq!(context.sample_rate, 24000);
    }

    #[test]
    fn test_resolve_falls_back_without_context() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("broken.wav"), b"not audio").unwrap();

        assert!(resolve_voice(Some(temp_dir.path()), None, 0).is_none());
        assert!(resolve_voice(Some(temp_dir.path()), Some("missing"), 0).is_none());
        assert!(resolve_voice(Some(temp_dir.path()), Some("broken"), 0).is_none());
    }
}
