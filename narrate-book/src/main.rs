//! narrate - Narrate EPUB and PDF books into audio with a local speech model

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};
use narrate_book::audio::Ffmpeg;
use narrate_book::config::{NarrateConfig, Overrides, Settings};
use narrate_book::document::InputFormat;
use narrate_book::invoker::SynthesisInvoker;
use narrate_book::logging;
use narrate_book::pipeline::{Pipeline, RunOptions};
use narrate_book::scheduler::{BatchScheduler, SystemMemory};
use narrate_book::text::sentences;
use narrate_book::tts::voice::resolve_voice;
use narrate_book::tts::{BackendKind, create_backend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "narrate")]
#[command(about = "Narrate EPUB and PDF books into audio, resumably", long_about = None)]
#[command(version)]
#[command(rename_all = "snake_case")]
struct Args {
    /// Input document; the format is detected from the extension
    #[arg(long, conflicts_with_all = ["epub", "pdf"])]
    input: Option<PathBuf>,

    /// Input EPUB file
    #[arg(long, conflicts_with = "pdf")]
    epub: Option<PathBuf>,

    /// Input PDF file
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Book output file; the extension picks the format (default: <input-name>.wav)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write one audio file per chapter into this directory
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Speech backend
    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Voice model file (piper) or checkpoint (csm)
    #[arg(long)]
    model: Option<PathBuf>,

    /// Named reference voice searched for next to the model
    #[arg(long)]
    voice_preset: Option<String>,

    /// Speaker id passed to the backend
    #[arg(long)]
    speaker: Option<u32>,

    /// Maximum characters per chunk
    #[arg(long, visible_alias = "chunk_length")]
    chunk_size: Option<usize>,

    /// Directory for chunk audio (default: <output-dir>/temp_audio)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Upper bound on chunks per batch
    #[arg(long)]
    max_batch_size: Option<usize>,

    /// Estimated memory one chunk needs, in MB
    #[arg(long)]
    memory_per_chunk: Option<u64>,

    /// Pause between batches, in milliseconds
    #[arg(long)]
    batch_pause_ms: Option<u64>,

    /// Silence between chunks, in milliseconds
    #[arg(long)]
    gap_ms: Option<u64>,

    /// Chapters to process, 1-based and inclusive (e.g. "3" or "2-5")
    #[arg(long)]
    chapter_range: Option<String>,

    /// Narrate the whole document as a single chapter
    #[arg(long)]
    no_chapters: bool,

    /// Keep chunk audio after a successful run
    #[arg(long)]
    keep_temp: bool,

    /// Give up on a chunk after this many seconds
    #[arg(long)]
    chunk_timeout_secs: Option<u64>,

    /// Cap on generated audio per chunk, in milliseconds
    #[arg(long)]
    max_audio_length_ms: Option<u32>,

    /// Enable debug output
    #[arg(short, long, default_value_t = false)]
    debug: bool,

    /// Subcommands
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set one default, e.g. `config set model ~/voices/en.onnx`
    Set {
        /// Setting name
        key: String,
        /// New value; `none` clears optional settings
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.debug)?;

    if let Some(Commands::Config { action }) = &args.command {
        return handle_config_command(action);
    }

    let (input, format) = input_from_args(&args)?;

    if !sentences::init() {
        debug!("Dialog-aware sentence detector unavailable; splitting on punctuation");
    }

    let config = NarrateConfig::load().context("Failed to load configuration")?;
    let settings = Settings::resolve(&config, overrides_from_args(&args))?;

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| default_output(&input));
    let temp_dir = args
        .temp_dir
        .clone()
        .unwrap_or_else(|| default_temp_dir(&output));

    let backend = create_backend(&settings.backend)?;
    info!("Using {} backend", backend.name());
    let voice = resolve_voice(
        settings.backend.model.as_deref(),
        settings.voice_preset.as_deref(),
        settings.invoker.speaker_id,
    );
    let invoker = SynthesisInvoker::new(Arc::from(backend), voice, settings.invoker);
    let scheduler = BatchScheduler::new(settings.batch, Box::new(SystemMemory));

    let mut options = RunOptions::new(input, output, temp_dir);
    options.format = format;
    options.output_dir = args.output_dir.clone();
    options.chunk_size = settings.chunk_size;
    options.chapter_range = args.chapter_range.clone();
    options.no_chapters = args.no_chapters;
    options.keep_temp = args.keep_temp;
    options.gap = settings.gap;
    options.show_progress = true;
    options.ffmpeg = Ffmpeg::new(&settings.ffmpeg_binary);

    let summary = Pipeline::new(options, invoker, scheduler).run().await?;

    println!();
    println!(
        "Chunks produced: {} ({} resumed, {} synthesized)",
        summary.produced(),
        summary.resumed,
        summary.synthesized
    );
    println!("Chunks skipped: {}", summary.failed);
    if summary.chapters_skipped > 0 {
        println!("Chapters without audio: {}", summary.chapters_skipped);
    }
    for path in &summary.chapter_outputs {
        println!("  {}", path.display());
    }
    Ok(())
}

/// The input path and any format forced by `--epub`/`--pdf`.
fn input_from_args(args: &Args) -> Result<(PathBuf, Option<InputFormat>)> {
    if let Some(path) = &args.epub {
        return Ok((path.clone(), Some(InputFormat::Epub)));
    }
    if let Some(path) = &args.pdf {
        return Ok((path.clone(), Some(InputFormat::Pdf)));
    }
    args.input
        .clone()
        .map(|path| (path, None))
        .ok_or_else(|| {
            anyhow::anyhow!("An input document is required (--input, --epub or --pdf). Run 'narrate --help' for usage.")
        })
}

fn overrides_from_args(args: &Args) -> Overrides {
    Overrides {
        backend: args.backend,
        model: args.model.clone(),
        voice_preset: args.voice_preset.clone(),
        speaker_id: args.speaker,
        chunk_size: args.chunk_size,
        max_batch_size: args.max_batch_size,
        memory_per_chunk_mb: args.memory_per_chunk,
        batch_pause_ms: args.batch_pause_ms,
        gap_ms: args.gap_ms,
        max_audio_length_ms: args.max_audio_length_ms,
        chunk_timeout_secs: args.chunk_timeout_secs,
    }
}

/// `<input-name>.wav` next to the input.
fn default_output(input: &Path) -> PathBuf {
    input.with_extension("wav")
}

/// `temp_audio` next to the output.
fn default_temp_dir(output: &Path) -> PathBuf {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.join("temp_audio"))
        .unwrap_or_else(|| PathBuf::from("temp_audio"))
}

fn handle_config_command(action: &ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = NarrateConfig::load()?;
            println!("Configuration file: {:?}", NarrateConfig::config_path()?);
            println!();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = NarrateConfig::load()?;
            config.set_key(key, value)?;
            config.save()?;
            println!("{} set to: {}", key, value);
        }
    }
    Ok(())
}
