//! narrate-book - Narrate EPUB and PDF books into audio.
//!
//! Text is extracted per chapter, normalized, packed into sentence-aligned
//! chunks and synthesized one chunk at a time. Every chunk lands in an
//! on-disk store so an interrupted run resumes where it stopped.

pub mod audio;
pub mod config;
pub mod document;
pub mod error;
pub mod invoker;
pub mod logging;
pub mod pipeline;
pub mod scheduler;
pub mod store;
pub mod text;
pub mod tts;

pub use error::PipelineError;
