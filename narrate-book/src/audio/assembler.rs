//! Ordered concatenation of chunk artifacts with silence gaps.

use super::metadata::ChapterInfo;
use super::wav::{DecodedAudio, pcm16_spec, read_wav, to_i16};
use crate::error::PipelineError;
use anyhow::{Context, Result};
use hound::WavWriter;
use log::{debug, warn};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default silence between consecutive artifacts.
pub const DEFAULT_GAP: Duration = Duration::from_millis(500);

/// Largest data chunk a RIFF header can describe: the 32-bit RIFF size also
/// counts the 36 bytes of `WAVE` tag, `fmt ` chunk and `data` chunk header.
pub const WAV_DATA_LIMIT: u64 = u32::MAX as u64 - 36;

/// A titled run of artifacts, typically one chapter.
#[derive(Debug, Clone)]
pub struct Section<'a> {
    pub title: &'a str,
    pub paths: &'a [PathBuf],
}

/// What an assembly produced.
#[derive(Debug, Clone)]
pub struct AssemblyReport {
    /// Artifacts concatenated into the output
    pub segments: usize,
    /// Artifacts that could not be decoded or did not match the output format
    pub skipped: usize,
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: u64,
    /// Span of every section that contributed audio
    pub chapters: Vec<ChapterInfo>,
}

impl AssemblyReport {
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / f64::from(self.sample_rate)
    }
}

struct OutputStream {
    writer: WavWriter<BufWriter<File>>,
    channels: u16,
    sample_rate: u32,
    frames: u64,
}

impl OutputStream {
    fn frames_to_ms(&self, frames: u64) -> u64 {
        frames * 1000 / u64::from(self.sample_rate)
    }

    fn data_bytes(&self, frames: u64) -> u64 {
        frames * u64::from(self.channels) * 2
    }
}

/// Concatenates artifacts in the order given.
#[derive(Debug, Clone)]
pub struct Assembler {
    gap: Duration,
    max_data_bytes: u64,
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_GAP)
    }
}

impl Assembler {
    pub fn new(gap: Duration) -> Self {
        Self {
            gap,
            max_data_bytes: WAV_DATA_LIMIT,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_max_data_bytes(mut self, limit: u64) -> Self {
        self.max_data_bytes = limit;
        self
    }

    /// Concatenate one untitled list of artifacts.
    pub fn assemble(&self, label: &str, paths: &[PathBuf], output: &Path) -> Result<AssemblyReport> {
        self.assemble_sections(label, &[Section { title: label, paths }], output)
    }

    /// Concatenate every section's artifacts into one 16-bit PCM WAV.
    ///
    /// A gap of silence separates consecutive artifacts, including across
    /// section boundaries; none is added before the first or after the last.
    /// The output format follows the first decodable artifact; later artifacts
    /// with a different rate or channel count are skipped with a warning.
    /// Zero usable artifacts is an error and no file is written, as is audio
    /// that would not fit in one WAV file.
    pub fn assemble_sections(
        &self,
        label: &str,
        sections: &[Section<'_>],
        output: &Path,
    ) -> Result<AssemblyReport> {
        let partial = output.with_extension("wav.part");
        let mut stream: Option<OutputStream> = None;
        let mut segments = 0;
        let mut skipped = 0;
        let mut chapters = Vec::new();

        for section in sections {
            let mut section_start = None;

            for path in section.paths {
                let audio = match read_wav(path) {
                    Ok(audio) if !audio.samples.is_empty() => audio,
                    Ok(_) => {
                        warn!("Skipping {}: no audio samples", path.display());
                        skipped += 1;
                        continue;
                    }
                    Err(e) => {
                        warn!("Skipping {}: {:#}", path.display(), e);
                        skipped += 1;
                        continue;
                    }
                };

                if stream.is_none() {
                    stream = Some(open_stream(&partial, &audio)?);
                }
                let Some(out) = stream.as_mut() else {
                    continue;
                };

                if audio.channels != out.channels || audio.sample_rate != out.sample_rate {
                    warn!(
                        "Skipping {}: {} Hz/{} ch does not match output {} Hz/{} ch",
                        path.display(),
                        audio.sample_rate,
                        audio.channels,
                        out.sample_rate,
                        out.channels
                    );
                    skipped += 1;
                    continue;
                }

                let gap_frames = if segments > 0 {
                    self.gap_frames(out.sample_rate)
                } else {
                    0
                };
                let needed = out.data_bytes(out.frames + gap_frames + audio.frames() as u64);
                if needed > self.max_data_bytes {
                    // Dropping the writer closes the file before it is removed.
                    drop(stream.take());
                    if let Err(e) = fs::remove_file(&partial) {
                        debug!("Could not remove {}: {}", partial.display(), e);
                    }
                    return Err(PipelineError::WavTooLarge {
                        label: label.to_string(),
                        limit: self.max_data_bytes,
                    }
                    .into());
                }

                write_silence(out, gap_frames)?;
                section_start.get_or_insert(out.frames);

                for &sample in &audio.samples {
                    out.writer.write_sample(to_i16(sample))?;
                }
                out.frames += audio.frames() as u64;
                segments += 1;
            }

            if let (Some(start), Some(out)) = (section_start, stream.as_ref()) {
                chapters.push(ChapterInfo::new(
                    section.title,
                    out.frames_to_ms(start),
                    out.frames_to_ms(out.frames),
                ));
            }
        }

        let Some(out) = stream else {
            return Err(PipelineError::EmptyAssembly(label.to_string()).into());
        };

        let sample_rate = out.sample_rate;
        let channels = out.channels;
        let frames = out.frames;
        out.writer
            .finalize()
            .with_context(|| format!("Failed to finalize {}", partial.display()))?;
        fs::rename(&partial, output)
            .with_context(|| format!("Failed to move {} into place", output.display()))?;

        let report = AssemblyReport {
            segments,
            skipped,
            sample_rate,
            channels,
            frames,
            chapters,
        };
        debug!(
            "Assembled {}: {} segments, {} skipped, {:.1}s",
            label,
            report.segments,
            report.skipped,
            report.duration_secs()
        );
        Ok(report)
    }

    pub fn gap_frames(&self, sample_rate: u32) -> u64 {
        (self.gap.as_secs_f64() * f64::from(sample_rate)).round() as u64
    }
}

fn write_silence(out: &mut OutputStream, frames: u64) -> Result<()> {
    for _ in 0..frames * u64::from(out.channels) {
        out.writer.write_sample(0i16)?;
    }
    out.frames += frames;
    Ok(())
}

fn open_stream(path: &Path, first: &DecodedAudio) -> Result<OutputStream> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let writer = WavWriter::create(path, pcm16_spec(first.channels, first.sample_rate))
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    Ok(OutputStream {
        writer,
        channels: first.channels,
        sample_rate: first.sample_rate,
        frames: 0,
    })
}
