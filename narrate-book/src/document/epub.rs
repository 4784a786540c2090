// EPUB parsing: one chapter per spine document

use super::{Document, RawChapter, RawContent};
use crate::text::normalize_html;
use anyhow::Result;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

/// Spine items with less normalized text than this are navigation or front-matter noise.
pub const MIN_CHAPTER_CHARS: usize = 50;

static RE_HEADING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<h[1-4][^>]*>(.*?)</h[1-4]\s*>").expect("static regex"));

/// Parse an EPUB file into chapters in reading order.
pub fn parse_epub(path: &Path) -> Result<Document> {
    let mut doc =
        epub::doc::EpubDoc::new(path).map_err(|e| anyhow::anyhow!("Failed to open EPUB: {}", e))?;

    let title = doc.mdata("title").map(|m| m.value.clone());
    let author = doc.mdata("creator").map(|m| m.value.clone());

    let mut chapters = Vec::new();
    let spine = doc.spine.clone();

    for spine_item in spine.iter() {
        let Some((content_bytes, mime)) = doc.get_resource(&spine_item.idref) else {
            continue;
        };
        if !mime.contains("html") {
            debug!("Skipping spine item {} ({})", spine_item.idref, mime);
            continue;
        }

        let html = String::from_utf8_lossy(&content_bytes);
        match chapter_from_html(&html, chapters.len() + 1) {
            Some(chapter) => chapters.push(chapter),
            None => debug!("Skipping short spine item {}", spine_item.idref),
        }
    }

    Ok(Document {
        title: title.unwrap_or_else(|| file_stem(path)),
        author,
        chapters,
    })
}

/// Build a chapter from one spine document, or `None` when it is too short.
///
/// `number` is the 1-based position the chapter would take, used for the
/// fallback title.
pub fn chapter_from_html(html: &str, number: usize) -> Option<RawChapter> {
    if normalize_html(html).chars().count() < MIN_CHAPTER_CHARS {
        return None;
    }

    let title = extract_title_from_html(html).unwrap_or_else(|| format!("Chapter {}", number));
    Some(RawChapter {
        title,
        content: RawContent::Html(html.to_string()),
    })
}

/// Text of the first `h1`-`h4` heading, if it has any.
fn extract_title_from_html(html: &str) -> Option<String> {
    RE_HEADING
        .captures(html)
        .map(|caps| normalize_html(&caps[1]))
        .filter(|title| !title.is_empty())
}

pub(super) fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "Untitled".to_string())
}
