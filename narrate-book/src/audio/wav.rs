//! WAV encoding and decoding with hound.

use anyhow::{Context, Result};
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::Cursor;
use std::path::Path;

/// Format every assembled output and in-process model clip is written in.
pub fn pcm16_spec(channels: u16, sample_rate: u32) -> WavSpec {
    WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    }
}

/// Convert a normalized sample to 16-bit PCM, clipping to [-1, 1].
pub fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Encode mono f32 samples as an in-memory 16-bit PCM WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, pcm16_spec(1, sample_rate))
            .context("Failed to start WAV encoder")?;
        for &sample in samples {
            writer.write_sample(to_i16(sample))?;
        }
        writer.finalize().context("Failed to finalize WAV data")?;
    }
    Ok(cursor.into_inner())
}

/// Write `frames` of silence as a 16-bit PCM WAV file.
pub fn write_silence(path: &Path, channels: u16, sample_rate: u32, frames: u64) -> Result<()> {
    let mut writer = WavWriter::create(path, pcm16_spec(channels, sample_rate))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;
    for _ in 0..frames * u64::from(channels) {
        writer.write_sample(0i16)?;
    }
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize {}", path.display()))
}

/// Decoded interleaved samples, normalized to [-1, 1].
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration_secs(&self) -> f64 {
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Read a WAV file of any integer or float sample format.
pub fn read_wav(path: &Path) -> Result<DecodedAudio> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max_val))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
        SampleFormat::Float => reader.into_samples::<f32>().collect(),
    }
    .with_context(|| format!("Failed to read WAV samples: {}", path.display()))?;

    Ok(DecodedAudio {
        samples,
        channels: spec.channels,
        sample_rate: spec.sample_rate,
    })
}

/// Duration of a WAV file in seconds, from its header.
pub fn wav_duration_secs(path: &Path) -> Result<f64> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();
    let frames = reader.duration() as f64;
    Ok(frames / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_encode_then_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("tone.wav");

        let samples: Vec<f32> = (0..8000).map(|i| ((i as f32) * 0.01).sin() * 0.5).collect();
        std::fs::write(&path, encode_wav(&samples, 16000).unwrap()).unwrap();

        let decoded = read_wav(&path).unwrap();
        assert_eq!(decoded.sample_rate, 16000);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.frames(), 8000);
        assert!((decoded.duration_secs() - 0.5).abs() < 1e-9);
        assert!((wav_duration_secs(&path).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_clipping() {
        assert_eq!(to_i16(2.0), i16::MAX);
        assert_eq!(to_i16(-2.0), -i16::MAX);
        assert_eq!(to_i16(0.0), 0);
    }

    #[test]
    fn test_silence_has_requested_length() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gap.wav");
        write_silence(&path, 2, 8000, 4000).unwrap();

        let decoded = read_wav(&path).unwrap();
        assert_eq!(decoded.channels, 2);
        assert_eq!(decoded.frames(), 4000);
        assert!(decoded.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_read_rejects_garbage() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.wav");
        std::fs::write(&path, b"not a wav").unwrap();
        assert!(read_wav(&path).is_err());
    }
}
