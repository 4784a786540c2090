//! Audio assembly: WAV I/O, ordered concatenation and final export.

pub mod assembler;
pub mod export;
mod metadata;
pub mod wav;

pub use assembler::{Assembler, AssemblyReport, DEFAULT_GAP, Section};
pub use export::{ChapterPart, Ffmpeg, OutputFormat, join_chapters};
pub use metadata::{BookTags, ChapterInfo};
