//! Output containers: native WAV, everything else through FFmpeg.

use super::assembler::{Assembler, AssemblyReport};
use super::metadata::{BookTags, ChapterInfo, create_ffmpeg_metadata};
use super::wav::write_silence;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::process::Command;

/// Container/codec of a final output, chosen by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Wav,
    Mp3,
    M4a,
    M4b,
    Flac,
    Ogg,
}

impl OutputFormat {
    /// Format for `path`'s extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "m4a" => Ok(Self::M4a),
            "m4b" => Ok(Self::M4b),
            "flac" => Ok(Self::Flac),
            "ogg" => Ok(Self::Ogg),
            _ => Err(PipelineError::UnsupportedOutput(path.display().to_string())),
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::M4a => "m4a",
            Self::M4b => "m4b",
            Self::Flac => "flac",
            Self::Ogg => "ogg",
        }
    }

    pub fn needs_ffmpeg(self) -> bool {
        self != Self::Wav
    }

    fn ffmpeg_codec_args(self) -> &'static [&'static str] {
        match self {
            Self::Wav => &["-c:a", "pcm_s16le"],
            Self::Mp3 => &["-c:a", "libmp3lame", "-b:a", "128k"],
            Self::M4a => &["-c:a", "aac", "-b:a", "128k"],
            Self::M4b => &["-c:a", "aac", "-b:a", "128k", "-f", "mp4"],
            Self::Flac => &["-c:a", "flac"],
            Self::Ogg => &["-c:a", "libvorbis", "-q:a", "5"],
        }
    }
}

/// Handle on an FFmpeg executable.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl Ffmpeg {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Check if FFmpeg runs at all.
    pub async fn is_available(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Encode one WAV into `output`, muxing chapter markers for M4B.
    pub async fn transcode(
        &self,
        wav: &Path,
        output: &Path,
        format: OutputFormat,
        tags: &BookTags,
        chapters: &[ChapterInfo],
    ) -> Result<()> {
        let mut cmd = self.command();
        cmd.arg("-i").arg(wav);
        self.encode(cmd, output, format, tags, chapters).await
    }

    /// Encode the inputs named in a concat demuxer list into `output`.
    async fn concat(
        &self,
        list: &Path,
        output: &Path,
        format: OutputFormat,
        tags: &BookTags,
        chapters: &[ChapterInfo],
    ) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["-f", "concat", "-safe", "0", "-i"]).arg(list);
        self.encode(cmd, output, format, tags, chapters).await
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["-y", "-v", "error"]);
        cmd
    }

    async fn encode(
        &self,
        mut cmd: Command,
        output: &Path,
        format: OutputFormat,
        tags: &BookTags,
        chapters: &[ChapterInfo],
    ) -> Result<()> {
        let temp_dir = TempDir::new()?;
        if format == OutputFormat::M4b && !chapters.is_empty() {
            let metadata_file = temp_dir.path().join("metadata.txt");
            create_ffmpeg_metadata(tags, chapters, &metadata_file)?;
            cmd.arg("-i")
                .arg(&metadata_file)
                .args(["-map", "0:a", "-map_metadata", "1"]);
        }

        cmd.args(format.ffmpeg_codec_args())
            .arg(output)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        debug!("Running {:?}", cmd);

        let result = cmd
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            anyhow::bail!("ffmpeg failed to write {}: {}", output.display(), stderr.trim());
        }

        Ok(())
    }
}

/// One chapter assembled into its own WAV.
#[derive(Debug, Clone)]
pub struct ChapterPart {
    pub title: String,
    pub wav: PathBuf,
    pub report: AssemblyReport,
}

/// Join chapter WAVs into `output` with FFmpeg's concat demuxer, `gap` of
/// silence between chapters.
///
/// Only each chapter WAV is bound by the WAV size limit; the book itself never
/// exists as one WAV. Parts whose rate or channel count differ from the first
/// are left out with a warning.
pub async fn join_chapters(
    ffmpeg: &Ffmpeg,
    parts: &[ChapterPart],
    gap: Duration,
    output: &Path,
    tags: &BookTags,
) -> Result<AssemblyReport> {
    let format = OutputFormat::from_path(output)?;
    let Some(first) = parts.first() else {
        return Err(PipelineError::EmptyAssembly("book".to_string()).into());
    };
    let sample_rate = first.report.sample_rate;
    let channels = first.report.channels;
    let to_ms = |frames: u64| frames * 1000 / u64::from(sample_rate);

    let temp_dir = TempDir::new()?;
    let gap_frames = Assembler::new(gap).gap_frames(sample_rate);
    let gap_wav = temp_dir.path().join("gap.wav");
    if gap_frames > 0 {
        write_silence(&gap_wav, channels, sample_rate, gap_frames)?;
    }

    let mut inputs: Vec<PathBuf> = Vec::with_capacity(parts.len() * 2);
    let mut chapters = Vec::with_capacity(parts.len());
    let mut frames = 0;
    let mut segments = 0;
    let mut skipped = 0;
    for part in parts {
        if part.report.sample_rate != sample_rate || part.report.channels != channels {
            warn!(
                "Leaving out {}: {} Hz/{} ch does not match {} Hz/{} ch",
                part.title, part.report.sample_rate, part.report.channels, sample_rate, channels
            );
            skipped += part.report.segments + part.report.skipped;
            continue;
        }

        if !inputs.is_empty() && gap_frames > 0 {
            inputs.push(gap_wav.clone());
            frames += gap_frames;
        }
        let start = frames;
        frames += part.report.frames;
        chapters.push(ChapterInfo::new(&part.title, to_ms(start), to_ms(frames)));
        inputs.push(part.wav.clone());
        segments += part.report.segments;
        skipped += part.report.skipped;
    }

    let list = temp_dir.path().join("concat.txt");
    fs::write(&list, concat_list(&inputs))
        .with_context(|| format!("Failed to write {}", list.display()))?;
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    ffmpeg.concat(&list, output, format, tags, &chapters).await?;

    Ok(AssemblyReport {
        segments,
        skipped,
        sample_rate,
        channels,
        frames,
        chapters,
    })
}

/// Concat demuxer list; single quotes inside a path close, escape and reopen.
fn concat_list(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| {
            format!(
                "file '{}'\n",
                path.to_string_lossy().replace('\'', r"'\''")
            )
        })
        .collect()
}
