//! Run manifest: what the artifacts in a temp directory were synthesized from.
//!
//! Artifact validity stays existence-based. The manifest only lets a rerun
//! notice that the book or chunking changed underneath existing artifacts.

use crate::text::TextChunk;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};

const MANIFEST_FILE: &str = "manifest.json";

/// Per-chapter record of how a chapter was chunked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterEntry {
    /// 0-based chapter index
    pub chapter_index: usize,
    pub title: String,
    pub chunk_count: usize,
    /// SHA-256 prefix over the chunk texts
    pub fingerprint: String,
}

impl ChapterEntry {
    pub fn new(chapter_index: usize, title: &str, chunks: &[TextChunk]) -> Self {
        Self {
            chapter_index,
            title: title.to_string(),
            chunk_count: chunks.len(),
            fingerprint: fingerprint_chunks(chunks),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub book_path: PathBuf,
    /// SHA-256 of the first 1MB of the input
    pub book_hash: String,
    pub chunk_size: usize,
    pub chapters: Vec<ChapterEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunManifest {
    pub fn new(book_path: &Path, book_hash: String, chunk_size: usize) -> Self {
        let now = Utc::now();
        Self {
            book_path: book_path.to_path_buf(),
            book_hash,
            chunk_size,
            chapters: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn path_in(temp_dir: &Path) -> PathBuf {
        temp_dir.join(MANIFEST_FILE)
    }

    /// Load the manifest from a temp directory, if one is there and parses.
    pub fn load(temp_dir: &Path) -> Option<Self> {
        let file = File::open(Self::path_in(temp_dir)).ok()?;
        serde_json::from_reader(BufReader::new(file)).ok()
    }

    pub fn save(&mut self, temp_dir: &Path) -> Result<()> {
        fs::create_dir_all(temp_dir)
            .with_context(|| format!("Failed to create {}", temp_dir.display()))?;
        self.updated_at = Utc::now();

        let file = File::create(Self::path_in(temp_dir)).context("Failed to create manifest file")?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self).context("Failed to write manifest JSON")?;
        Ok(())
    }

    /// Delete the manifest when it is the last file left in `temp_dir`.
    pub fn remove_if_alone(temp_dir: &Path) -> Result<bool> {
        let path = Self::path_in(temp_dir);
        if !path.exists() {
            return Ok(false);
        }
        let others = fs::read_dir(temp_dir)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path() != path)
            .count();
        if others > 0 {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
        Ok(true)
    }

    /// Whether the recorded inputs differ from the current run's.
    pub fn inputs_changed(&self, book_hash: &str, chunk_size: usize) -> bool {
        self.book_hash != book_hash || self.chunk_size != chunk_size
    }

    /// Record a chapter entry, replacing any previous one.
    ///
    /// Returns the previous entry when its chunking differs from `entry`.
    pub fn record_chapter(&mut self, entry: ChapterEntry) -> Option<ChapterEntry> {
        match self
            .chapters
            .iter_mut()
            .find(|c| c.chapter_index == entry.chapter_index)
        {
            Some(existing) => {
                let stale = (existing.fingerprint != entry.fingerprint
                    || existing.chunk_count != entry.chunk_count)
                    .then(|| existing.clone());
                *existing = entry;
                stale
            }
            None => {
                self.chapters.push(entry);
                self.chapters.sort_by_key(|c| c.chapter_index);
                None
            }
        }
    }
}

/// Compute a hash of the input file.
///
/// Uses SHA256 of the first 1MB for speed with large files.
pub fn compute_book_hash(book_path: &Path) -> Result<String> {
    let file = File::open(book_path).context("Failed to open book file for hashing")?;
    let mut reader = BufReader::new(file).take(1024 * 1024);

    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer)?;

    let mut hasher = Sha256::new();
    hasher.update(&buffer);
    let result = hasher.finalize();

    // First 16 hex characters
    Ok(format!("{:x}", result)[..16].to_string())
}

/// Fingerprint of a chapter's chunking.
pub fn fingerprint_chunks(chunks: &[TextChunk]) -> String {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk.text.as_bytes());
        hasher.update([0x1f]);
    }
    format!("{:x}", hasher.finalize())[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn chunks(texts: &[&str]) -> Vec<TextChunk> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| TextChunk::new(0, i, t.to_string()))
            .collect()
    }

    #[test]
    fn test_book_hash_is_stable() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("book.epub");
        fs::write(&path, b"some book bytes").unwrap();

        let a = compute_book_hash(&path).unwrap();
        let b = compute_book_hash(&path).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_fingerprint_depends_on_boundaries() {
        let a = fingerprint_chunks(&chunks(&["ab", "c"]));
        let b = fingerprint_chunks(&chunks(&["a", "bc"]));
        assert_ne!(a, b);
        assert_eq!(a, fingerprint_chunks(&chunks(&["ab", "c"])));
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let mut manifest = RunManifest::new(Path::new("book.pdf"), "abc".to_string(), 1000);
        manifest.record_chapter(ChapterEntry::new(0, "One", &chunks(&["x"])));
        manifest.save(temp_dir.path()).unwrap();

        let loaded = RunManifest::load(temp_dir.path()).unwrap();
        assert_eq!(loaded.book_hash, "abc");
        assert_eq!(loaded.chunk_size, 1000);
        assert_eq!(loaded.chapters.len(), 1);
        assert_eq!(loaded.chapters[0].title, "One");
    }

    #[test]
    fn test_load_missing_or_corrupt() {
        let temp_dir = TempDir::new().unwrap();
        assert!(RunManifest::load(temp_dir.path()).is_none());

        fs::write(RunManifest::path_in(temp_dir.path()), b"{not json").unwrap();
        assert!(RunManifest::load(temp_dir.path()).is_none());
    }

    #[test]
    fn test_record_chapter_reports_changes() {
        let mut manifest = RunManifest::new(Path::new("b"), "h".to_string(), 10);
        assert!(manifest.record_chapter(ChapterEntry::new(0, "A", &chunks(&["x"]))).is_none());
        assert!(manifest.record_chapter(ChapterEntry::new(0, "A", &chunks(&["x"]))).is_none());

        let stale = manifest.record_chapter(ChapterEntry::new(0, "A", &chunks(&["y", "z"])));
        assert_eq!(stale.unwrap().chunk_count, 1);
        assert_eq!(manifest.chapters.len(), 1);
        assert_eq!(manifest.chapters[0].chunk_count, 2);
    }

    #[test]
    fn test_remove_if_alone() {
        let temp_dir = TempDir::new().unwrap();
        let mut manifest = RunManifest::new(Path::new("b"), "h".to_string(), 10);
        manifest.save(temp_dir.path()).unwrap();
        fs::write(temp_dir.path().join("chunk_0000.wav"), b"x").unwrap();

        assert!(!RunManifest::remove_if_alone(temp_dir.path()).unwrap());
        fs::remove_file(temp_dir.path().join("chunk_0000.wav")).unwrap();
        assert!(RunManifest::remove_if_alone(temp_dir.path()).unwrap());
        assert!(!RunManifest::path_in(temp_dir.path()).exists());
    }

    #[test]
    fn test_inputs_changed() {
        let manifest = RunManifest::new(Path::new("b"), "h".to_string(), 10);
        assert!(!manifest.inputs_changed("h", 10));
        assert!(manifest.inputs_changed("other", 10));
        assert!(manifest.inputs_changed("h", 20));
    }
}
