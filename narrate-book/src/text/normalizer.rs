//! Text normalization: markup stripping, character cleanup and whitespace collapsing.

use html2text::render::text_renderer::TrivialDecorator;
use once_cell::sync::Lazy;
use regex::Regex;

/// Wide enough that html2text never wraps a paragraph mid-sentence.
const RENDER_WIDTH: usize = 10_000;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static regex"));

/// Characters that trip up speech backends and their replacements.
const PROBLEMATIC_CHARS: &[(char, &str)] = &[
    ('\u{2018}', "'"),   // Left single quote
    ('\u{2019}', "'"),   // Right single quote
    ('\u{201c}', "\""),  // Left double quote
    ('\u{201d}', "\""),  // Right double quote
    ('\u{2013}', "-"),   // En dash
    ('\u{2014}', "-"),   // Em dash
    ('\u{2026}', "..."), // Ellipsis
    ('\u{00a0}', " "),   // Non-breaking space
    ('\u{200b}', ""),    // Zero-width space
    ('\u{200c}', ""),    // Zero-width non-joiner
    ('\u{200d}', ""),    // Zero-width joiner
    ('\u{feff}', ""),    // BOM
    ('\u{2011}', "-"),   // Non-breaking hyphen
    ('\u{2012}', "-"),   // Figure dash
    ('\u{2015}', "-"),   // Horizontal bar
    ('\u{00ab}', "\""),  // Left-pointing double angle quote
    ('\u{00bb}', "\""),  // Right-pointing double angle quote
];

/// Normalize one structural unit of HTML (an EPUB spine item) to plain text.
///
/// Only visible text survives; the result is a single line with no leading or
/// trailing whitespace. Returns an empty string when the markup holds no text.
pub fn normalize_html(html: &str) -> String {
    let text = html2text::from_read_with_decorator(html.as_bytes(), RENDER_WIDTH, TrivialDecorator::new());
    normalize_text(&text)
}

/// Normalize already-extracted plain text (PDF pages, chapter bodies).
pub fn normalize_text(text: &str) -> String {
    let mut cleaned = String::with_capacity(text.len());

    for c in text.chars() {
        let replacement = PROBLEMATIC_CHARS
            .iter()
            .find(|(ch, _)| *ch == c)
            .map(|(_, r)| *r);

        if let Some(r) = replacement {
            cleaned.push_str(r);
        } else if c.is_whitespace() || !c.is_control() {
            cleaned.push(c);
        }
    }

    let cleaned = fix_multiple_periods(&cleaned);
    collapse_whitespace(&cleaned)
}

/// Collapse every whitespace run (newlines included) to one space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text, " ").trim().to_string()
}

/// Replace runs of periods with a single one; "..." makes some voices hiss.
fn fix_multiple_periods(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_was_period = false;

    for c in text.chars() {
        if c == '.' {
            if !previous_was_period {
                result.push('.');
            }
            previous_was_period = true;
        } else {
            previous_was_period = false;
            result.push(c);
        }
    }

    result
}
