//! On-disk chunk artifacts keyed by (chapter, chunk), with resume-by-existence.
//!
//! The store is the only component that decides whether a chunk still needs
//! synthesis: an artifact is valid iff its file exists and is non-empty.

mod manifest;

pub use manifest::{ChapterEntry, RunManifest, compute_book_hash, fingerprint_chunks};

use anyhow::{Context, Result};
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Extension of every chunk artifact; backends always deliver WAV.
pub const ARTIFACT_EXTENSION: &str = "wav";

/// Identity of a chunk artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkKey {
    /// 0-based chapter index within the document
    pub chapter_index: usize,
    /// 0-based chunk index within the chapter
    pub chunk_index: usize,
}

impl ChunkKey {
    pub fn new(chapter_index: usize, chunk_index: usize) -> Self {
        Self {
            chapter_index,
            chunk_index,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "chapter {} chunk {}", self.chapter_index + 1, self.chunk_index)
    }
}

/// How artifact paths are laid out under the store root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// `{root}/chunk_{index:04}.wav`, for single-chapter documents.
    Flat,
    /// `{root}/chapter_{n:02}/chunk_{index:04}.wav`, `n` being 1-based.
    PerChapter,
}

impl Layout {
    /// Layout for a document with `chapter_count` chapters.
    pub fn for_chapter_count(chapter_count: usize) -> Self {
        if chapter_count > 1 {
            Layout::PerChapter
        } else {
            Layout::Flat
        }
    }
}

/// Directory of synthesized chunk artifacts.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    root: PathBuf,
    layout: Layout,
}

impl ChunkStore {
    /// Create a store rooted at `root`. Directories are created lazily on write.
    pub fn new(root: impl Into<PathBuf>, layout: Layout) -> Self {
        Self {
            root: root.into(),
            layout,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding one chapter's artifacts.
    pub fn chapter_dir(&self, chapter_index: usize) -> PathBuf {
        match self.layout {
            Layout::Flat => self.root.clone(),
            Layout::PerChapter => self.root.join(format!("chapter_{:02}", chapter_index + 1)),
        }
    }

    /// Deterministic artifact path for a key.
    pub fn path(&self, key: ChunkKey) -> PathBuf {
        self.chapter_dir(key.chapter_index).join(format!(
            "chunk_{:04}.{}",
            key.chunk_index, ARTIFACT_EXTENSION
        ))
    }

    /// Whether a usable artifact exists: the file is present and non-empty.
    pub fn exists_and_valid(&self, key: ChunkKey) -> bool {
        fs::metadata(self.path(key))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// Persist an artifact atomically and return its path.
    ///
    /// Bytes land in a `.part` sibling first and are renamed into place, so an
    /// interrupted write never produces a non-empty file at the final path.
    pub fn write(&self, key: ChunkKey, audio_bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let partial = path.with_extension(format!("{}.part", ARTIFACT_EXTENSION));
        fs::write(&partial, audio_bytes)
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        fs::rename(&partial, &path)
            .with_context(|| format!("Failed to move {} into place", path.display()))?;

        debug!("Stored {} ({} bytes)", key, audio_bytes.len());
        Ok(path)
    }

    /// Paths of the valid artifacts among `keys`, preserving their order.
    pub fn valid_paths<I>(&self, keys: I) -> Vec<PathBuf>
    where
        I: IntoIterator<Item = ChunkKey>,
    {
        keys.into_iter()
            .filter(|key| self.exists_and_valid(*key))
            .map(|key| self.path(key))
            .collect()
    }

    /// Delete one artifact. Returns whether a file was removed.
    pub fn remove(&self, key: ChunkKey) -> Result<bool> {
        let path = self.path(key);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// Remove chapter directories and then the root, but only those left empty.
    pub fn remove_empty_dirs(&self) -> Result<()> {
        if !self.root.exists() {
            return Ok(());
        }

        if self.layout == Layout::PerChapter {
            for entry in fs::read_dir(&self.root)? {
                let path = entry?.path();
                if path.is_dir() && is_empty_dir(&path)? {
                    fs::remove_dir(&path)
                        .with_context(|| format!("Failed to remove {}", path.display()))?;
                }
            }
        }

        if is_empty_dir(&self.root)? {
            fs::remove_dir(&self.root)
                .with_context(|| format!("Failed to remove {}", self.root.display()))?;
        }

        Ok(())
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    Ok(fs::read_dir(path)?.next().is_none())
}
