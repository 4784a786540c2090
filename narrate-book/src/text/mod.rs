//! Text processing for synthesis: normalization, sentence splitting and chunking.

pub mod chunker;
pub mod normalizer;
pub mod sentences;

pub use chunker::{chunk_chapter, split};
pub use normalizer::{normalize_html, normalize_text};

use crate::store::ChunkKey;

/// A chunk of text ready for synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The chapter this chunk belongs to
    pub chapter_index: usize,
    /// The chunk index within the chapter
    pub chunk_index: usize,
    /// The text content
    pub text: String,
}

impl TextChunk {
    /// Create a new text chunk.
    pub fn new(chapter_index: usize, chunk_index: usize, text: String) -> Self {
        Self {
            chapter_index,
            chunk_index,
            text,
        }
    }

    /// Store key of the audio artifact synthesized from this chunk.
    pub fn key(&self) -> ChunkKey {
        ChunkKey::new(self.chapter_index, self.chunk_index)
    }
}
