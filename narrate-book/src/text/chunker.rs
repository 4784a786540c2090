//! Text chunking for speech synthesis.

use super::TextChunk;
use super::sentences::split_into_sentences;

/// Default maximum chunk length in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Split normalized text into chunks of at most `max_length` characters.
///
/// Sentences are packed greedily. A sentence that alone exceeds `max_length`
/// is cut into fixed `max_length`-character slices, flushing the pending chunk
/// first. Output depends only on `(text, max_length)`, which keeps chunk
/// indices stable across runs.
pub fn split(text: &str, max_length: usize) -> Vec<String> {
    let sentences = split_into_sentences(text);
    pack_sentences(&sentences, max_length)
}

/// Greedily pack already-split sentences into chunks.
pub fn pack_sentences<S: AsRef<str>>(sentences: &[S], max_length: usize) -> Vec<String> {
    let max_length = max_length.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for sentence in sentences {
        let sentence = sentence.as_ref().trim();
        if sentence.is_empty() {
            continue;
        }
        let sentence_len = sentence.chars().count();

        if current_len + sentence_len + 1 <= max_length {
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(sentence);
            current_len += sentence_len;
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        current_len = 0;

        if sentence_len > max_length {
            chunks.extend(hard_split(sentence, max_length));
        } else {
            current.push_str(sentence);
            current_len = sentence_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Cut text into consecutive `max_length`-character slices.
fn hard_split(text: &str, max_length: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_length)
        .map(|slice| slice.iter().collect())
        .collect()
}

/// Chunk one chapter's normalized text into indexed `TextChunk`s.
pub fn chunk_chapter(chapter_index: usize, text: &str, max_length: usize) -> Vec<TextChunk> {
    split(text, max_length)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| TextChunk::new(chapter_index, chunk_index, text))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn collapse(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_greedy_boundaries() {
        let sentences = ["Hello world.", "This is a test.", "Short."];
        let chunks = pack_sentences(&sentences, 15);
        assert_eq!(chunks, vec!["Hello world.", "This is a test.", "Short."]);
    }

    #[test]
    fn test_sentences_share_a_chunk_when_they_fit() {
        let sentences = ["One.", "Two.", "Three."];
        assert_eq!(pack_sentences(&sentences, 15), vec!["One. Two.", "Three."]);
        assert_eq!(pack_sentences(&sentences, 100), vec!["One. Two. Three."]);
    }

    #[test]
    fn test_oversized_sentence_is_sliced() {
        let chunks = pack_sentences(&["This is a test."], 5);
        assert_eq!(chunks, vec!["This ", "is a ", "test."]);
    }

    #[test]
    fn test_oversized_sentence_flushes_pending_chunk() {
        let sentences = ["Hi.", "abcdefghijkl", "Yo."];
        let chunks = pack_sentences(&sentences, 5);
        assert_eq!(chunks, vec!["Hi.", "abcde", "fghij", "kl", "Yo."]);
    }

    #[test]
    fn test_sentence_exactly_max_length_is_not_sliced() {
        let chunks = pack_sentences(&["abcde", "fghij"], 5);
        assert_eq!(chunks, vec!["abcde", "fghij"]);
    }

    #[test]
    fn test_slicing_counts_characters_not_bytes() {
        let chunks = pack_sentences(&["ééééé"], 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn test_split_empty_text() {
        assert!(split("", 100).is_empty());
        assert!(split("   ", 100).is_empty());
    }

    #[test]
    fn test_split_scenario() {
        let chunks = split("Hello world. This is a test. Short.", 15);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("Hello"));
        assert!(chunks[2].contains("Short"));
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 15, "chunk too long: {chunk:?}");
        }
    }

    #[test]
    fn test_split_is_deterministic() {
        let text = "First sentence here. Second one follows! A third? And a fourth, longer sentence to close.";
        assert_eq!(split(text, 30), split(text, 30));
    }

    #[test]
    fn test_chunk_chapter_indices() {
        let text = "First sentence. Second sentence. Third sentence. Fourth sentence. Fifth sentence.";
        let chunks = chunk_chapter(5, text, 30);
        assert!(chunks.len() > 1);
        assert!(chunks.iter().all(|c| c.chapter_index == 5));
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.chunk_index, i);
        }
    }

    fn sentence() -> impl Strategy<Value = String> {
        "[A-Za-z]{1,12}( [A-Za-z]{1,12}){0,6}[.!?]"
    }

    proptest! {
        #[test]
        fn prop_packing_reconstructs_text(
            sentences in prop::collection::vec(sentence(), 0..30),
            max_length in 1usize..200,
        ) {
            let chunks = pack_sentences(&sentences, max_length);
            prop_assert!(chunks.iter().all(|c| !c.is_empty()));

            let all_fit = sentences.iter().all(|s| s.chars().count() <= max_length);
            if all_fit {
                prop_assert_eq!(collapse(&chunks.join(" ")), collapse(&sentences.join(" ")));
            } else {
                let joined: String = chunks.concat().chars().filter(|c| !c.is_whitespace()).collect();
                let original: String = sentences.concat().chars().filter(|c| !c.is_whitespace()).collect();
                prop_assert_eq!(joined, original);
            }
        }

        #[test]
        fn prop_chunks_never_exceed_max_length(
            sentences in prop::collection::vec(sentence(), 0..30),
            max_length in 1usize..200,
        ) {
            for chunk in pack_sentences(&sentences, max_length) {
                prop_assert!(chunk.chars().count() <= max_length);
            }
        }
    }
}
