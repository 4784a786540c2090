// PDF text extraction with heuristic chapter detection

use super::epub::file_stem;
use super::{Document, RawChapter, RawContent};
use anyhow::Result;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static RE_PAGE_OF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"Page \d+ of \d+").expect("static regex"));
static RE_PAGE_NUMBER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+\s*$").expect("static regex"));

/// Line prefixes that open a new chapter.
static RE_CHAPTER_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^(?:",
        r"(?:CHAPTER|Chapter)\s+\d+",
        r"|\d+\.\s+[A-Z]",
        r"|(?:PART|Part)\s+\d+",
        r"|(?:SECTION|Section)\s+\d+",
        r"|INTRODUCTION|Introduction",
        r"|(?:APPENDIX|Appendix)\s*\d*",
        r")"
    ))
    .expect("static regex")
});

/// Title given to text that precedes the first detected heading.
const FRONT_MATTER_TITLE: &str = "Front Matter";

/// Extract a PDF's text and split it at detected chapter headings.
pub fn parse_pdf(path: &Path) -> Result<Document> {
    let text = pdf_extract::extract_text(path)
        .map_err(|e| anyhow::anyhow!("Failed to extract PDF text: {}", e))?;

    Ok(Document {
        title: file_stem(path),
        author: None,
        chapters: detect_chapters(&strip_page_furniture(&text)),
    })
}

/// Remove "Page N of M" markers and lines holding only a page number.
pub fn strip_page_furniture(text: &str) -> String {
    let text = RE_PAGE_OF.replace_all(text, "");
    RE_PAGE_NUMBER_LINE.replace_all(&text, "").into_owned()
}

/// Split text at lines that look like chapter headings.
///
/// The heading line stays at the start of its chapter's text and doubles as
/// the title. Text before the first heading becomes a leading chapter when it
/// is not blank. With no headings at all the whole text is one `Chapter 1`.
pub fn detect_chapters(text: &str) -> Vec<RawChapter> {
    let lines: Vec<&str> = text.lines().collect();
    let starts: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| RE_CHAPTER_HEADING.is_match(line.trim()))
        .map(|(i, _)| i)
        .collect();

    let Some(&first) = starts.first() else {
        return vec![text_chapter("Chapter 1", text.trim())];
    };

    let mut chapters = Vec::with_capacity(starts.len() + 1);

    let preamble = lines[..first].join("\n");
    if !preamble.trim().is_empty() {
        chapters.push(text_chapter(FRONT_MATTER_TITLE, preamble.trim()));
    }

    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(lines.len());
        let body = lines[start..end].join("\n");
        chapters.push(text_chapter(lines[start].trim(), body.trim()));
    }

    chapters
}

fn text_chapter(title: &str, text: &str) -> RawChapter {
    RawChapter {
        title: title.to_string(),
        content: RawContent::Text(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(chapter: &RawChapter) -> &str {
        match &chapter.content {
            RawContent::Text(t) => t,
            RawContent::Html(h) => h,
        }
    }

    #[test]
    fn test_strip_page_furniture() {
        let page = "The story begins.\nPage 3 of 120\n  42  \nIt continues.";
        let cleaned = strip_page_furniture(page);
        assert!(!cleaned.contains("Page 3 of 120"));
        assert!(!cleaned.contains("42"));
        assert!(cleaned.contains("The story begins."));
        assert!(cleaned.contains("It continues."));
    }

    #[test]
    fn test_detect_chapter_headings() {
        let text = "CHAPTER 1\nCall me Ishmael.\nChapter 2\nThe carpet bag.\n3. The Spouter Inn\nA dim room.";
        let chapters = detect_chapters(text);
        let titles: Vec<&str> = chapters.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["CHAPTER 1", "Chapter 2", "3. The Spouter Inn"]);
        assert!(text_of(&chapters[0]).contains("Call me Ishmael."));
        assert!(text_of(&chapters[2]).starts_with("3. The Spouter Inn"));
    }

    #[test]
    fn test_other_heading_kinds() {
        let text = "INTRODUCTION\nHello.\nPart 2\nMore.\nAppendix\nNotes.\nSECTION 4\nEnd.";
        let titles: Vec<String> = detect_chapters(text).into_iter().map(|c| c.title).collect();
        assert_eq!(titles, vec!["INTRODUCTION", "Part 2", "Appendix", "SECTION 4"]);
    }

    #[test]
    fn test_no_headings_is_one_chapter() {
        let chapters = detect_chapters("Just some prose.\nMore prose.");
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Chapter 1");
    }

    #[test]
    fn test_preamble_is_kept() {
        let chapters = detect_chapters("Dedicated to my cat.\nChapter 1\nOnce upon a time.");
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Front Matter");
        assert_eq!(text_of(&chapters[0]), "Dedicated to my cat.");
    }

    #[test]
    fn test_lowercase_numbering_is_not_a_heading() {
        let chapters = detect_chapters("1. the first item\n2. the second item");
        assert_eq!(chapters.len(), 1);
    }
}
