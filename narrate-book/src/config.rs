//! narrate configuration: a TOML file of defaults merged under the CLI flags.

use crate::error::PipelineError;
use crate::invoker::InvokerOptions;
use crate::scheduler::BatchPolicy;
use crate::text::chunker::DEFAULT_CHUNK_SIZE;
use crate::tts::{BackendKind, BackendOptions, DEFAULT_MAX_AUDIO_LENGTH_MS};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_MAX_BATCH_SIZE: usize = 20;
const DEFAULT_MEMORY_PER_CHUNK_MB: u64 = 50;
const DEFAULT_BATCH_PAUSE_MS: u64 = 2000;
const DEFAULT_GAP_MS: u64 = 500;

/// Keys accepted by `narrate config set`.
pub const KEYS: &[&str] = &[
    "backend",
    "model",
    "voice_preset",
    "device",
    "piper_binary",
    "ffmpeg_binary",
    "chunk_size",
    "max_batch_size",
    "memory_per_chunk_mb",
    "batch_pause_ms",
    "gap_ms",
    "speaker_id",
    "max_audio_length_ms",
    "chunk_timeout_secs",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NarrateConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Voice model file (piper `.onnx`) or checkpoint (csm)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_preset: Option<String>,

    /// Torch device for the embedded model (cuda, mps, cpu). None means auto-detect.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,

    #[serde(default = "default_piper_binary")]
    pub piper_binary: PathBuf,

    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: PathBuf,

    /// Maximum characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    #[serde(default = "default_memory_per_chunk_mb")]
    pub memory_per_chunk_mb: u64,

    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Silence between consecutive chunks
    #[serde(default = "default_gap_ms")]
    pub gap_ms: u64,

    #[serde(default)]
    pub speaker_id: u32,

    #[serde(default = "default_max_audio_length_ms")]
    pub max_audio_length_ms: u32,

    /// Per-chunk synthesis timeout. None waits indefinitely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_timeout_secs: Option<u64>,
}

fn default_piper_binary() -> PathBuf {
    PathBuf::from("piper")
}

fn default_ffmpeg_binary() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_memory_per_chunk_mb() -> u64 {
    DEFAULT_MEMORY_PER_CHUNK_MB
}

fn default_batch_pause_ms() -> u64 {
    DEFAULT_BATCH_PAUSE_MS
}

fn default_gap_ms() -> u64 {
    DEFAULT_GAP_MS
}

fn default_max_audio_length_ms() -> u32 {
    DEFAULT_MAX_AUDIO_LENGTH_MS
}

impl Default for NarrateConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            model: None,
            voice_preset: None,
            device: None,
            piper_binary: default_piper_binary(),
            ffmpeg_binary: default_ffmpeg_binary(),
            chunk_size: default_chunk_size(),
            max_batch_size: default_max_batch_size(),
            memory_per_chunk_mb: default_memory_per_chunk_mb(),
            batch_pause_ms: default_batch_pause_ms(),
            gap_ms: default_gap_ms(),
            speaker_id: 0,
            max_audio_length_ms: default_max_audio_length_ms(),
            chunk_timeout_secs: None,
        }
    }
}

impl NarrateConfig {
    /// Get the config file path: `<config dir>/narrate-book/config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().context("Could not determine the user config directory")?;
        Ok(dir.join("narrate-book").join("config.toml"))
    }

    /// Load config from the default location, returning defaults if the file doesn't exist
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: NarrateConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }

    /// Set one key from its string form. `none` clears optional keys.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        let value = value.trim();
        let cleared = value.eq_ignore_ascii_case("none") || value.is_empty();

        match key {
            "backend" => {
                self.backend = value.parse().map_err(|reason| PipelineError::InvalidSetting {
                    key: "backend",
                    reason,
                })?
            }
            "model" => self.model = (!cleared).then(|| PathBuf::from(value)),
            "voice_preset" => self.voice_preset = (!cleared).then(|| value.to_string()),
            "device" => self.device = (!cleared).then(|| value.to_string()),
            "piper_binary" => self.piper_binary = PathBuf::from(value),
            "ffmpeg_binary" => self.ffmpeg_binary = PathBuf::from(value),
            "chunk_size" => self.chunk_size = parse_number("chunk_size", value)?,
            "max_batch_size" => self.max_batch_size = parse_number("max_batch_size", value)?,
            "memory_per_chunk_mb" => {
                self.memory_per_chunk_mb = parse_number("memory_per_chunk_mb", value)?
            }
            "batch_pause_ms" => self.batch_pause_ms = parse_number("batch_pause_ms", value)?,
            "gap_ms" => self.gap_ms = parse_number("gap_ms", value)?,
            "speaker_id" => self.speaker_id = parse_number("speaker_id", value)?,
            "max_audio_length_ms" => {
                self.max_audio_length_ms = parse_number("max_audio_length_ms", value)?
            }
            "chunk_timeout_secs" => {
                self.chunk_timeout_secs = if cleared {
                    None
                } else {
                    Some(parse_number("chunk_timeout_secs", value)?)
                }
            }
            other => anyhow::bail!(
                "Unknown setting '{}'. Known settings: {}",
                other,
                KEYS.join(", ")
            ),
        }

        Ok(())
    }
}

fn parse_number<T>(key: &'static str, value: &str) -> Result<T, PipelineError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.parse().map_err(|e: T::Err| PipelineError::InvalidSetting {
        key,
        reason: format!("'{}' is not a valid number ({})", value, e),
    })
}

/// Values given on the command line. `None` defers to the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub model: Option<PathBuf>,
    pub voice_preset: Option<String>,
    pub speaker_id: Option<u32>,
    pub chunk_size: Option<usize>,
    pub max_batch_size: Option<usize>,
    pub memory_per_chunk_mb: Option<u64>,
    pub batch_pause_ms: Option<u64>,
    pub gap_ms: Option<u64>,
    pub max_audio_length_ms: Option<u32>,
    pub chunk_timeout_secs: Option<u64>,
}

/// Effective, validated settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    pub backend: BackendOptions,
    pub voice_preset: Option<String>,
    pub ffmpeg_binary: PathBuf,
    pub chunk_size: usize,
    pub batch: BatchPolicy,
    pub gap: Duration,
    pub invoker: InvokerOptions,
}

impl Settings {
    /// Merge CLI overrides over the config file and validate the result.
    pub fn resolve(config: &NarrateConfig, overrides: Overrides) -> Result<Self, PipelineError> {
        let chunk_size = overrides.chunk_size.unwrap_or(config.chunk_size);
        if chunk_size == 0 {
            return Err(PipelineError::InvalidSetting {
                key: "chunk_size",
                reason: "must be greater than 0".to_string(),
            });
        }

        let max_batch_size = overrides.max_batch_size.unwrap_or(config.max_batch_size);
        if max_batch_size == 0 {
            return Err(PipelineError::InvalidSetting {
                key: "max_batch_size",
                reason: "must be greater than 0".to_string(),
            });
        }

        let max_audio_length_ms = overrides
            .max_audio_length_ms
            .unwrap_or(config.max_audio_length_ms);
        if max_audio_length_ms == 0 {
            return Err(PipelineError::InvalidSetting {
                key: "max_audio_length_ms",
                reason: "must be greater than 0".to_string(),
            });
        }

        let timeout_secs = overrides.chunk_timeout_secs.or(config.chunk_timeout_secs);

        Ok(Self {
            backend: BackendOptions {
                kind: overrides.backend.unwrap_or(config.backend),
                model: overrides.model.or_else(|| config.model.clone()),
                piper_binary: config.piper_binary.clone(),
                device: config.device.clone(),
            },
            voice_preset: overrides
                .voice_preset
                .or_else(|| config.voice_preset.clone()),
            ffmpeg_binary: config.ffmpeg_binary.clone(),
            chunk_size,
            batch: BatchPolicy {
                max_batch_size,
                memory_per_chunk_mb: overrides
                    .memory_per_chunk_mb
                    .unwrap_or(config.memory_per_chunk_mb),
                pause: Duration::from_millis(
                    overrides.batch_pause_ms.unwrap_or(config.batch_pause_ms),
                ),
            },
            gap: Duration::from_millis(overrides.gap_ms.unwrap_or(config.gap_ms)),
            invoker: InvokerOptions {
                speaker_id: overrides.speaker_id.unwrap_or(config.speaker_id),
                max_audio_length_ms,
                timeout: timeout_secs.filter(|&s| s > 0).map(Duration::from_secs),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = NarrateConfig::default();
        assert_eq!(config.backend, BackendKind::Piper);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.max_batch_size, 20);
        assert_eq!(config.memory_per_chunk_mb, 50);
        assert_eq!(config.batch_pause_ms, 2000);
        assert_eq!(config.gap_ms, 500);
        assert_eq!(config.max_audio_length_ms, 60_000);
        assert!(config.model.is_none());
        assert!(config.chunk_timeout_secs.is_none());
    }

    #[test]
    fn test_config_path() {
        if let Ok(path) = NarrateConfig::config_path() {
            assert!(path.ends_with("narrate-book/config.toml"));
        }
    }

    #[test]
    fn test_parse_config() {
        let toml_str = r#"
backend = "csm"
model = "/models/csm/ckpt.pt"
voice_preset = "narrator"
chunk_size = 400
max_batch_size = 8
chunk_timeout_secs = 120
"#;
        let config: NarrateConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backend, BackendKind::Csm);
        assert_eq!(config.model, Some(PathBuf::from("/models/csm/ckpt.pt")));
        assert_eq!(config.voice_preset.as_deref(), Some("narrator"));
        assert_eq!(config.chunk_size, 400);
        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.chunk_timeout_secs, Some(120));
        assert_eq!(config.gap_ms, 500);
    }

    #[test]
    fn test_parse_empty_config() {
        let config: NarrateConfig = toml::from_str("").unwrap();
        assert_eq!(config, NarrateConfig::default());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = NarrateConfig::default();
        config.set_key("model", "/voices/en.onnx").unwrap();
        config.set_key("gap_ms", "250").unwrap();
        config.save_to(&path).unwrap();

        assert_eq!(NarrateConfig::load_from(&path).unwrap(), config);
        assert_eq!(
            NarrateConfig::load_from(&temp_dir.path().join("missing.toml")).unwrap(),
            NarrateConfig::default()
        );
    }

    #[test]
    fn test_set_key() {
        let mut config = NarrateConfig::default();
        config.set_key("backend", "csm").unwrap();
        config.set_key("chunk_timeout_secs", "90").unwrap();
        assert_eq!(config.backend, BackendKind::Csm);
        assert_eq!(config.chunk_timeout_secs, Some(90));

        config.set_key("chunk_timeout_secs", "none").unwrap();
        assert!(config.chunk_timeout_secs.is_none());

        let err = config.set_key("chunk_size", "many").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidSetting { key: "chunk_size", .. })
        ));
        assert!(config.set_key("temperature", "0.8").is_err());
    }

    #[test]
    fn test_cli_overrides_file() {
        let mut config = NarrateConfig::default();
        config.chunk_size = 400;
        config.gap_ms = 750;
        config.model = Some(PathBuf::from("file.onnx"));

        let overrides = Overrides {
            chunk_size: Some(250),
            model: Some(PathBuf::from("cli.onnx")),
            ..Overrides::default()
        };
        let settings = Settings::resolve(&config, overrides).unwrap();

        assert_eq!(settings.chunk_size, 250);
        assert_eq!(settings.backend.model, Some(PathBuf::from("cli.onnx")));
        assert_eq!(settings.gap, Duration::from_millis(750));
        assert_eq!(settings.batch.max_batch_size, 20);
        assert_eq!(settings.batch.pause, Duration::from_secs(2));
        assert!(settings.invoker.timeout.is_none());
    }

    #[test]
    fn test_resolve_rejects_zero_sizes() {
        let config = NarrateConfig::default();
        for overrides in [
            Overrides {
                chunk_size: Some(0),
                ..Overrides::default()
            },
            Overrides {
                max_batch_size: Some(0),
                ..Overrides::default()
            },
        ] {
            assert!(matches!(
                Settings::resolve(&config, overrides),
                Err(PipelineError::InvalidSetting { .. })
            ));
        }
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let overrides = Overrides {
            chunk_timeout_secs: Some(0),
            ..Overrides::default()
        };
        let settings = Settings::resolve(&NarrateConfig::default(), overrides).unwrap();
        assert!(settings.invoker.timeout.is_none());
    }
}
