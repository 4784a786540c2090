//! `--chapter_range` parsing.

use crate::error::PipelineError;
use std::ops::Range;

/// Parse `N` or `START-END` (1-based, inclusive) into 0-based indices.
///
/// The end is clamped to `total`. A range that selects nothing, runs
/// backwards, or does not parse is rejected.
pub fn parse_chapter_range(input: &str, total: usize) -> Result<Range<usize>, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidChapterRange {
        range: input.to_string(),
        reason: reason.to_string(),
    };

    let (start, end) = match input.trim().split_once('-') {
        Some((start, end)) => (parse_number(start), parse_number(end)),
        None => {
            let n = parse_number(input);
            (n, n)
        }
    };
    let (Some(start), Some(end)) = (start, end) else {
        return Err(invalid("expected N or START-END"));
    };

    if start == 0 || end == 0 {
        return Err(invalid("chapters are numbered from 1"));
    }
    if start > end {
        return Err(invalid("start is after end"));
    }
    if start > total {
        return Err(invalid(&format!("the document has {} chapter(s)", total)));
    }

    Ok(start - 1..end.min(total))
}

fn parse_number(s: &str) -> Option<usize> {
    s.trim().parse().ok()
}
