//! FFmpeg metadata generation for M4B chapter markers.

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Span of one chapter within an assembled output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterInfo {
    pub title: String,
    /// Start position in milliseconds
    pub start_ms: u64,
    /// End position in milliseconds
    pub end_ms: u64,
}

impl ChapterInfo {
    pub fn new(title: impl Into<String>, start_ms: u64, end_ms: u64) -> Self {
        Self {
            title: title.into(),
            start_ms,
            end_ms,
        }
    }
}

/// Book-level tags written alongside chapter markers.
#[derive(Debug, Clone, Default)]
pub struct BookTags {
    pub title: String,
    pub author: Option<String>,
}

/// Render global tags and one `[CHAPTER]` block per span in FFMETADATA1 form.
pub fn render_ffmpeg_metadata(tags: &BookTags, chapters: &[ChapterInfo]) -> String {
    let mut lines = vec![";FFMETADATA1".to_string()];
    let title = escape_metadata_value(&tags.title);
    lines.push(format!("title={title}"));
    lines.push(format!("album={title}"));
    if let Some(author) = &tags.author {
        lines.push(format!("artist={}", escape_metadata_value(author)));
    }
    lines.push("genre=Audiobook".to_string());

    for chapter in chapters {
        lines.push(String::new());
        lines.push("[CHAPTER]".to_string());
        lines.push("TIMEBASE=1/1000".to_string());
        lines.push(format!("START={}", chapter.start_ms));
        lines.push(format!("END={}", chapter.end_ms));
        lines.push(format!("title={}", escape_metadata_value(&chapter.title)));
    }

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

pub fn create_ffmpeg_metadata(tags: &BookTags, chapters: &[ChapterInfo], output_path: &Path) -> Result<()> {
    fs::write(output_path, render_ffmpeg_metadata(tags, chapters))
        .with_context(|| format!("Failed to write metadata file {}", output_path.display()))
}

/// Backslash-escape `=`, `;`, `#` and `\\`; newlines become `\\n`, carriage returns are dropped.
fn escape_metadata_value(value: &str) -> String {
    value
        .chars()
        .filter(|&c| c != '\r')
        .fold(String::with_capacity(value.len()), |mut out, c| {
            match c {
                '=' | ';' | '#' | '\\' => {
                    out.push('\\');
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                _ => out.push(c),
            }
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_escape_metadata_value() {
        assert_eq!(escape_metadata_value("Simple"), "Simple");
        assert_eq!(escape_metadata_value("a=b;c#d"), "a\\=b\\;c\\#d");
        assert_eq!(escape_metadata_value("back\\slash"), "back\\\\slash");
        assert_eq!(escape_metadata_value("Line1\r\nLine2"), "Line1\\nLine2");
    }

    #[test]
    fn test_render_without_chapters_has_only_globals() {
        let tags = BookTags {
            title: "Notes; Vol #1".to_string(),
            author: Some("Ann".to_string()),
        };
        let rendered = render_ffmpeg_metadata(&tags, &[]);
        assert_eq!(
            rendered,
            ";FFMETADATA1\ntitle=Notes\\; Vol \\#1\nalbum=Notes\\; Vol \\#1\nartist=Ann\ngenre=Audiobook\n"
        );
    }

    #[test]
    fn test_create_ffmpeg_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let metadata_path = temp_dir.path().join("metadata.txt");

        let tags = BookTags {
            title: "Moby Dick".to_string(),
            author: None,
        };
        let chapters = vec![
            ChapterInfo::new("Loomings", 0, 61500),
            ChapterInfo::new("The Carpet-Bag", 62000, 120000),
        ];

        create_ffmpeg_metadata(&tags, &chapters, &metadata_path).unwrap();

        let content = std::fs::read_to_string(&metadata_path).unwrap();
        assert!(content.starts_with(";FFMETADATA1"));
        assert!(content.contains("title=Moby Dick"));
        assert!(!content.contains("artist="));
        assert_eq!(content.matches("[CHAPTER]").count(), 2);
        assert!(content.contains("START=62000"));
        assert!(content.contains("END=61500"));
        assert!(content.contains("title=The Carpet-Bag"));
    }
}
