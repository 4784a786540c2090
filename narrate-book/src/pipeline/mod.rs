//! Pipeline Driver: extraction, chunking, batched synthesis, assembly, cleanup.
//!
//! Chapters run in order and chunks within a chapter run in order, one
//! backend call at a time. Resume is per chunk: a valid artifact in the store
//! is never synthesized again.

mod progress;
pub mod range;

pub use progress::{EtaTracker, Progress, estimate_total, format_duration};
pub use range::parse_chapter_range;

use crate::audio::{
    Assembler, BookTags, ChapterPart, DEFAULT_GAP, Ffmpeg, OutputFormat, Section, join_chapters,
};
use crate::document::{Chapter, Document, InputFormat, load_document};
use crate::error::PipelineError;
use crate::invoker::SynthesisInvoker;
use crate::scheduler::BatchScheduler;
use crate::store::{ChapterEntry, ChunkStore, Layout, RunManifest, compute_book_hash};
use crate::text::{TextChunk, chunk_chapter};
use crate::text::chunker::DEFAULT_CHUNK_SIZE;
use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

static RE_UNSAFE_TITLE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9_\s-]").expect("static regex"));

/// Where the driver is in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stage {
    Idle,
    Extracting,
    Chunking,
    /// 1-based chapter number and batch position
    Synthesizing { chapter: usize, batch: usize, of: usize },
    AssemblingChapter { chapter: usize },
    AssemblingBook,
    Cleanup,
    Done,
    Failed,
}

/// Everything a run needs besides the backend and scheduler.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Forced input format; detected from the extension when `None`
    pub format: Option<InputFormat>,
    pub output: PathBuf,
    /// Also export one file per chapter here
    pub output_dir: Option<PathBuf>,
    pub temp_dir: PathBuf,
    pub chunk_size: usize,
    pub chapter_range: Option<String>,
    /// Treat the whole document as one chapter
    pub no_chapters: bool,
    pub keep_temp: bool,
    pub gap: Duration,
    pub show_progress: bool,
    pub ffmpeg: Ffmpeg,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            format: None,
            output: output.into(),
            output_dir: None,
            temp_dir: temp_dir.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            chapter_range: None,
            no_chapters: false,
            keep_temp: false,
            gap: DEFAULT_GAP,
            show_progress: false,
            ffmpeg: Ffmpeg::default(),
        }
    }
}

/// Counts reported at the end of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub chapters: usize,
    pub chunks: usize,
    /// Chunks whose artifact already existed
    pub resumed: usize,
    pub synthesized: usize,
    /// Chunks the backend failed on; absent from the output
    pub failed: usize,
    /// Chapters left out because none of their chunks produced audio
    pub chapters_skipped: usize,
    pub chapter_outputs: Vec<PathBuf>,
    pub duration_secs: f64,
}

impl RunSummary {
    pub fn produced(&self) -> usize {
        self.resumed + self.synthesized
    }
}

struct ChapterWork {
    chapter: Chapter,
    chunks: Vec<TextChunk>,
}

pub struct Pipeline {
    options: RunOptions,
    invoker: SynthesisInvoker,
    scheduler: BatchScheduler,
    stage: Stage,
}

impl Pipeline {
    pub fn new(options: RunOptions, invoker: SynthesisInvoker, scheduler: BatchScheduler) -> Self {
        Self {
            options,
            invoker,
            scheduler,
            stage: Stage::Idle,
        }
    }

    pub fn stage(&self) -> &Stage {
        &self.stage
    }

    /// Parse the input document and run every stage.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.enter(Stage::Extracting);
        let document = match load_document(&self.options.input, self.options.format) {
            Ok(document) => document,
            Err(e) => {
                self.enter(Stage::Failed);
                return Err(e);
            }
        };
        self.run_document(document).await
    }

    /// Run every stage on an already parsed document.
    pub async fn run_document(&mut self, document: Document) -> Result<RunSummary> {
        let result = self.execute(document).await;
        if result.is_err() {
            self.enter(Stage::Failed);
        }
        result
    }

    fn enter(&mut self, stage: Stage) {
        debug!("Stage: {:?}", stage);
        self.stage = stage;
    }

    async fn execute(&mut self, document: Document) -> Result<RunSummary> {
        let output_format = OutputFormat::from_path(&self.options.output)?;
        if output_format.needs_ffmpeg() && !self.options.ffmpeg.is_available().await {
            anyhow::bail!(
                "ffmpeg is required to write .{} output; install it or set ffmpeg_binary",
                output_format.extension()
            );
        }

        self.enter(Stage::Extracting);
        let chapters = document.normalized_chapters(self.options.no_chapters);
        if chapters.is_empty() {
            return Err(PipelineError::NoText(self.options.input.clone()).into());
        }
        let selected = match &self.options.chapter_range {
            Some(range) => parse_chapter_range(range, chapters.len())?,
            None => 0..chapters.len(),
        };
        info!(
            "\"{}\": {} chapter(s), processing {}-{}",
            document.title,
            chapters.len(),
            selected.start + 1,
            selected.end
        );

        // Layout follows the whole document so ranged and full runs share artifacts.
        let store = ChunkStore::new(
            &self.options.temp_dir,
            Layout::for_chapter_count(chapters.len()),
        );

        self.enter(Stage::Chunking);
        let work = self.chunk_chapters(&chapters[selected]);
        let total: usize = work.iter().map(|w| w.chunks.len()).sum();
        let pending = work
            .iter()
            .flat_map(|w| &w.chunks)
            .filter(|c| !store.exists_and_valid(c.key()))
            .count();
        info!(
            "{} chunks, {} to synthesize with {} (rough estimate {})",
            total,
            pending,
            self.invoker.backend_name(),
            format_duration(estimate_total(pending))
        );

        let mut summary = RunSummary {
            chapters: work.len(),
            chunks: total,
            ..RunSummary::default()
        };
        let mut progress = Progress::new(total, self.options.show_progress);
        let mut sections: Vec<(String, Vec<PathBuf>)> = Vec::with_capacity(work.len());
        let mut parts: Vec<ChapterPart> = Vec::new();

        for item in &work {
            self.synthesize_chapter(item, &store, &mut progress, &mut summary)
                .await;

            self.enter(Stage::AssemblingChapter {
                chapter: item.chapter.number(),
            });
            let paths = store.valid_paths(item.chunks.iter().map(TextChunk::key));
            if paths.is_empty() {
                warn!(
                    "Chapter {} ({}) produced no audio; leaving it out",
                    item.chapter.number(),
                    item.chapter.title
                );
                summary.chapters_skipped += 1;
                continue;
            }

            if !output_format.needs_ffmpeg() {
                if let Some(dir) = &self.options.output_dir {
                    match self.export_chapter(&item.chapter, &paths, dir) {
                        Ok(path) => summary.chapter_outputs.push(path),
                        Err(e) => warn!(
                            "Could not write chapter {} output: {:#}",
                            item.chapter.number(),
                            e
                        ),
                    }
                }
                sections.push((item.chapter.title.clone(), paths));
                continue;
            }

            // Encoded outputs are joined from per-chapter WAVs, so only a
            // chapter has to fit in one WAV file.
            let part = match self.stage_chapter(&item.chapter, &paths) {
                Ok(part) => part,
                Err(e) => {
                    discard_staged(&parts);
                    return Err(e);
                }
            };
            if let Some(dir) = &self.options.output_dir {
                match self.export_staged(&item.chapter, &part, dir, output_format).await {
                    Ok(path) => summary.chapter_outputs.push(path),
                    Err(e) => warn!(
                        "Could not write chapter {} output: {:#}",
                        item.chapter.number(),
                        e
                    ),
                }
            }
            parts.push(part);
        }
        progress.finish();

        self.enter(Stage::AssemblingBook);
        let report = if output_format.needs_ffmpeg() {
            let tags = BookTags {
                title: document.title.clone(),
                author: document.author.clone(),
            };
            let joined = join_chapters(
                &self.options.ffmpeg,
                &parts,
                self.options.gap,
                &self.options.output,
                &tags,
            )
            .await;
            discard_staged(&parts);
            joined?
        } else {
            let section_refs: Vec<Section<'_>> = sections
                .iter()
                .map(|(title, paths)| Section {
                    title: title.as_str(),
                    paths: paths.as_slice(),
                })
                .collect();
            Assembler::new(self.options.gap).assemble_sections(
                "book",
                &section_refs,
                &self.options.output,
            )?
        };
        summary.duration_secs = report.duration_secs();

        if !self.options.keep_temp {
            self.enter(Stage::Cleanup);
            self.cleanup(&store, &work);
        }

        self.enter(Stage::Done);
        info!(
            "Wrote {} ({}): {} chunks produced ({} resumed), {} skipped",
            self.options.output.display(),
            format_duration(Duration::from_secs_f64(summary.duration_secs)),
            summary.produced(),
            summary.resumed,
            summary.failed
        );
        Ok(summary)
    }

    /// Chunk the selected chapters and bring the run manifest up to date.
    ///
    /// The manifest only produces warnings, so an input that cannot be hashed
    /// runs without one.
    fn chunk_chapters(&self, chapters: &[Chapter]) -> Vec<ChapterWork> {
        let chunk_size = self.options.chunk_size;
        let temp_dir = &self.options.temp_dir;
        let mut manifest = match compute_book_hash(&self.options.input) {
            Ok(book_hash) => Some(self.open_manifest(book_hash)),
            Err(e) => {
                warn!(
                    "Could not fingerprint {}; continuing without a run manifest: {:#}",
                    self.options.input.display(),
                    e
                );
                None
            }
        };

        let mut work = Vec::with_capacity(chapters.len());
        for chapter in chapters {
            let chunks = chunk_chapter(chapter.index, &chapter.text, chunk_size);
            debug!(
                "Chapter {} ({}): {} chunks",
                chapter.number(),
                chapter.title,
                chunks.len()
            );

            let entry = ChapterEntry::new(chapter.index, &chapter.title, &chunks);
            let previous = manifest.as_mut().and_then(|m| m.record_chapter(entry));
            if let Some(previous) = previous {
                warn!(
                    "Chapter {} text changed since its chunks were synthesized ({} chunks before, {} now); delete its artifacts to regenerate",
                    chapter.number(),
                    previous.chunk_count,
                    chunks.len()
                );
            }

            work.push(ChapterWork {
                chapter: chapter.clone(),
                chunks,
            });
        }

        if let Some(Err(e)) = manifest.map(|mut m| m.save(temp_dir)) {
            warn!("Could not save run manifest: {:#}", e);
        }
        work
    }

    /// Load the manifest in the temp dir, or start one for this input.
    fn open_manifest(&self, book_hash: String) -> RunManifest {
        let chunk_size = self.options.chunk_size;
        let temp_dir = &self.options.temp_dir;
        match RunManifest::load(temp_dir) {
            Some(mut manifest) => {
                if manifest.inputs_changed(&book_hash, chunk_size) {
                    warn!(
                        "{} holds chunks from a different input or chunk size; they are reused as-is",
                        temp_dir.display()
                    );
                    manifest.book_hash = book_hash;
                    manifest.chunk_size = chunk_size;
                }
                manifest
            }
            None => RunManifest::new(&self.options.input, book_hash, chunk_size),
        }
    }

    async fn synthesize_chapter(
        &mut self,
        item: &ChapterWork,
        store: &ChunkStore,
        progress: &mut Progress,
        summary: &mut RunSummary,
    ) {
        let plan = self.scheduler.plan(item.chunks.len());
        let pause = self.scheduler.policy().pause;
        info!(
            "Chapter {}: {} chunks in {} batch(es) of up to {}",
            item.chapter.number(),
            item.chunks.len(),
            plan.len(),
            plan.chunks_per_batch
        );
        progress.set_message(format!("chapter {}", item.chapter.number()));

        for (batch_index, batch) in plan.batches.iter().enumerate() {
            self.enter(Stage::Synthesizing {
                chapter: item.chapter.number(),
                batch: batch_index + 1,
                of: plan.len(),
            });

            let mut calls = 0;
            for chunk in &item.chunks[batch.clone()] {
                let key = chunk.key();
                if store.exists_and_valid(key) {
                    debug!("Resuming past {}", key);
                    summary.resumed += 1;
                    progress.skip_resumed();
                    continue;
                }

                let started = Instant::now();
                let ok = self.invoker.synthesize(&chunk.text, key, store).await;
                calls += 1;
                progress.record_synthesis(started.elapsed());
                if ok {
                    summary.synthesized += 1;
                } else {
                    summary.failed += 1;
                }
            }

            // A batch served entirely from the store left no backend state behind.
            if calls > 0 && plan.recovery_after(batch_index) {
                debug!(
                    "Batch {}/{} done; clearing cache and pausing {}ms",
                    batch_index + 1,
                    plan.len(),
                    pause.as_millis()
                );
                self.invoker.clear_cache().await;
                tokio::time::sleep(pause).await;
            }
        }
    }

    /// Write one chapter straight to `<dir>/<stem>.wav`.
    fn export_chapter(&self, chapter: &Chapter, paths: &[PathBuf], dir: &Path) -> Result<PathBuf> {
        let output = chapter_output_path(dir, chapter, OutputFormat::Wav)?;
        let label = format!("chapter {}", chapter.number());
        let report = Assembler::new(self.options.gap).assemble(&label, paths, &output)?;
        info!(
            "Wrote {} ({})",
            output.display(),
            format_duration(Duration::from_secs_f64(report.duration_secs()))
        );
        Ok(output)
    }

    /// Assemble one chapter into a WAV in the temp dir for joining.
    fn stage_chapter(&self, chapter: &Chapter, paths: &[PathBuf]) -> Result<ChapterPart> {
        let wav = self
            .options
            .temp_dir
            .join(format!("assembled_chapter_{:02}.wav", chapter.number()));
        let label = format!("chapter {}", chapter.number());
        let report = Assembler::new(self.options.gap).assemble(&label, paths, &wav)?;
        Ok(ChapterPart {
            title: chapter.title.clone(),
            wav,
            report,
        })
    }

    /// Encode a staged chapter into `dir`, leaving the staged WAV for the book.
    async fn export_staged(
        &self,
        chapter: &Chapter,
        part: &ChapterPart,
        dir: &Path,
        format: OutputFormat,
    ) -> Result<PathBuf> {
        let output = chapter_output_path(dir, chapter, format)?;
        let tags = BookTags {
            title: chapter.title.clone(),
            author: None,
        };
        self.options
            .ffmpeg
            .transcode(&part.wav, &output, format, &tags, &[])
            .await?;
        info!(
            "Wrote {} ({})",
            output.display(),
            format_duration(Duration::from_secs_f64(part.report.duration_secs()))
        );
        Ok(output)
    }

    /// Remove this run's artifacts and any directories left empty. Never fatal.
    fn cleanup(&self, store: &ChunkStore, work: &[ChapterWork]) {
        let mut removed = 0;
        for key in work.iter().flat_map(|w| w.chunks.iter().map(TextChunk::key)) {
            match store.remove(key) {
                Ok(true) => removed += 1,
                Ok(false) => {}
                Err(e) => warn!("Cleanup: {:#}", e),
            }
        }

        if let Err(e) = store.remove_empty_dirs() {
            warn!("Cleanup: {:#}", e);
        }
        match RunManifest::remove_if_alone(store.root()) {
            Ok(true) => {
                if let Err(e) = store.remove_empty_dirs() {
                    warn!("Cleanup: {:#}", e);
                }
            }
            Ok(false) => {}
            Err(e) => warn!("Cleanup: {:#}", e),
        }

        debug!("Removed {} chunk artifacts", removed);
    }
}

fn discard_staged(parts: &[ChapterPart]) {
    for part in parts {
        if let Err(e) = fs::remove_file(&part.wav) {
            warn!("Could not remove {}: {}", part.wav.display(), e);
        }
    }
}

fn chapter_output_path(dir: &Path, chapter: &Chapter, format: OutputFormat) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    Ok(dir.join(format!(
        "{}.{}",
        chapter_file_stem(chapter.number(), &chapter.title),
        format.extension()
    )))
}

/// `chapter_{n:02}_{title}` with the title reduced to `[A-Za-z0-9_-]` and
/// spaces turned into underscores.
pub fn chapter_file_stem(number: usize, title: &str) -> String {
    let safe = RE_UNSAFE_TITLE_CHARS.replace_all(title, "");
    let safe = safe.trim().replace(char::is_whitespace, "_");
    if safe.is_empty() {
        format!("chapter_{:02}", number)
    } else {
        format!("chapter_{:02}_{}", number, safe)
    }
}
