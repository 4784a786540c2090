//! Input documents: format detection, parsing and normalization into chapters.

pub mod epub;
pub mod pdf;

use crate::error::PipelineError;
use crate::text::{normalize_html, normalize_text};
use anyhow::Result;
use log::debug;
use std::path::Path;

/// Raw content of one structural unit, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawContent {
    Html(String),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawChapter {
    pub title: String,
    pub content: RawContent,
}

/// A parsed document as the parser collaborator hands it over.
#[derive(Debug, Clone)]
pub struct Document {
    pub title: String,
    pub author: Option<String>,
    /// Chapters in reading order; one implicit chapter for unstructured input
    pub chapters: Vec<RawChapter>,
}

/// A chapter's normalized text, ready for chunking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    /// 0-based index among the document's non-empty chapters
    pub index: usize,
    pub title: String,
    pub text: String,
}

impl Chapter {
    /// 1-based chapter number used in file names.
    pub fn number(&self) -> usize {
        self.index + 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Epub,
    Pdf,
}

impl InputFormat {
    /// Detect the format from the file extension, case-insensitively.
    pub fn from_path(path: &Path) -> Result<Self, PipelineError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "epub" => Ok(Self::Epub),
            "pdf" => Ok(Self::Pdf),
            _ => Err(PipelineError::UnsupportedFormat(path.display().to_string())),
        }
    }
}

/// Parse a document after checking it exists.
pub fn load_document(path: &Path, format: Option<InputFormat>) -> Result<Document> {
    if !path.is_file() {
        return Err(PipelineError::InputNotFound(path.to_path_buf()).into());
    }

    let format = match format {
        Some(format) => format,
        None => InputFormat::from_path(path)?,
    };

    match format {
        InputFormat::Epub => epub::parse_epub(path),
        InputFormat::Pdf => pdf::parse_pdf(path),
    }
}

impl Document {
    /// Normalize every chapter, dropping those left without text.
    ///
    /// With `merge`, all units become one chapter titled after the document.
    pub fn normalized_chapters(&self, merge: bool) -> Vec<Chapter> {
        let texts = self.chapters.iter().map(|raw| {
            let text = match &raw.content {
                RawContent::Html(html) => normalize_html(html),
                RawContent::Text(text) => normalize_text(text),
            };
            (raw.title.as_str(), text)
        });

        if merge {
            let text = texts
                .map(|(_, text)| text)
                .filter(|text| !text.is_empty())
                .collect::<Vec<_>>()
                .join(" ");
            if text.is_empty() {
                return Vec::new();
            }
            return vec![Chapter {
                index: 0,
                title: self.title.clone(),
                text,
            }];
        }

        texts
            .filter(|(title, text)| {
                if text.is_empty() {
                    debug!("Skipping empty unit '{}'", title);
                }
                !text.is_empty()
            })
            .enumerate()
            .map(|(index, (title, text))| Chapter {
                index,
                title: title.to_string(),
                text,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc() -> Document {
        Document {
            title: "Sample".to_string(),
            author: None,
            chapters: vec![
                RawChapter {
                    title: "One".to_string(),
                    content: RawContent::Html("<p>First   chapter.</p>".to_string()),
                },
                RawChapter {
                    title: "Blank".to_string(),
                    content: RawContent::Text(" \n ".to_string()),
                },
                RawChapter {
                    title: "Two".to_string(),
                    content: RawContent::Text("Second\nchapter.".to_string()),
                },
            ],
        }
    }

    #[test]
    fn test_format_detection() {
        assert_eq!(InputFormat::from_path(Path::new("a.EPUB")).unwrap(), InputFormat::Epub);
        assert_eq!(InputFormat::from_path(Path::new("b.pdf")).unwrap(), InputFormat::Pdf);
        assert!(matches!(
            InputFormat::from_path(Path::new("c.docx")),
            Err(PipelineError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_missing_input() {
        let err = load_document(&PathBuf::from("/nonexistent/book.epub"), None).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InputNotFound(_))
        ));
    }

    #[test]
    fn test_empty_units_are_skipped_and_indices_stay_dense() {
        let chapters = doc().normalized_chapters(false);
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].text, "First chapter.");
        assert_eq!(chapters[1].index, 1);
        assert_eq!(chapters[1].title, "Two");
        assert_eq!(chapters[1].number(), 2);
    }

    #[test]
    fn test_merge_into_single_chapter() {
        let chapters = doc().normalized_chapters(true);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Sample");
        assert_eq!(chapters[0].text, "First chapter. Second chapter.");
    }
}
