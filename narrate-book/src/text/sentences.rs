//! Sentence splitting using the seams library (dialog-aware).
//!
//! The detector is built once per process. `init` is called from `main` so a
//! broken detector is reported at startup; later calls reuse the same result.
//! When the detector is unavailable, or rejects a text, splitting falls back
//! to terminal-punctuation boundaries.

use log::warn;
use once_cell::sync::OnceCell;
use seams::sentence_detector::dialog_detector::SentenceDetectorDialog;

/// `None` records a failed initialization so it is not retried.
static DETECTOR: OnceCell<Option<SentenceDetectorDialog>> = OnceCell::new();

fn detector() -> Option<&'static SentenceDetectorDialog> {
    DETECTOR
        .get_or_init(|| match SentenceDetectorDialog::new() {
            Ok(detector) => Some(detector),
            Err(e) => {
                warn!(
                    "Sentence detector unavailable ({:?}); splitting on punctuation instead",
                    e
                );
                None
            }
        })
        .as_ref()
}

/// Build the process-wide sentence detector. Safe to call more than once.
///
/// Returns whether the dialog-aware detector is in use.
pub fn init() -> bool {
    detector().is_some()
}

/// Split normalized text into trimmed, non-empty sentences.
pub fn split_into_sentences(text: &str) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let Some(detector) = detector() else {
        return split_on_punctuation(text);
    };

    match detector.detect_sentences_borrowed(text) {
        Ok(sentences) => sentences
            .iter()
            .map(|s| s.normalize().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(e) => {
            warn!("Sentence detection failed ({:?}); splitting on punctuation", e);
            split_on_punctuation(text)
        }
    }
}

/// Split after runs of `.`, `!` or `?` (plus closing quotes/brackets) that are
/// followed by whitespace or the end of the text.
pub fn split_on_punctuation(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);

        if !matches!(c, '.' | '!' | '?') {
            continue;
        }

        while let Some(&next) = chars.peek() {
            if matches!(next, '.' | '!' | '?' | '"' | '\'' | ')' | ']') {
                current.push(next);
                chars.next();
            } else {
                break;
            }
        }

        if chars.peek().is_none_or(|next| next.is_whitespace()) {
            push_trimmed(&mut sentences, &current);
            current.clear();
        }
    }

    push_trimmed(&mut sentences, &current);
    sentences
}

fn push_trimmed(sentences: &mut Vec<String>, sentence: &str) {
    let trimmed = sentence.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}
