use std::path::PathBuf;
use thiserror::Error;

/// Fatal conditions that end a run before or after synthesis.
///
/// Per-chunk backend failures are deliberately absent: they are absorbed by the
/// synthesis invoker and never surface as errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Unsupported input format '{0}'. Supported formats: .epub, .pdf")]
    UnsupportedFormat(String),

    #[error("Unsupported output format '{0}'. Use .wav, .mp3, .m4a, .m4b, .flac or .ogg")]
    UnsupportedOutput(String),

    #[error("No text could be extracted from {}", .0.display())]
    NoText(PathBuf),

    #[error("Speech backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("No audio to assemble for {0}: every chunk is missing or empty")]
    EmptyAssembly(String),

    #[error("Audio for {label} would exceed the {limit}-byte WAV data limit; write a compressed format such as .m4b instead")]
    WavTooLarge { label: String, limit: u64 },

    #[error("Invalid chapter range '{range}': {reason}")]
    InvalidChapterRange { range: String, reason: String },

    #[error("Invalid setting {key}: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_problem() {
        let err = PipelineError::InputNotFound(PathBuf::from("/books/missing.epub"));
        assert_eq!(err.to_string(), "Input file not found: /books/missing.epub");

        let err = PipelineError::InvalidChapterRange {
            range: "5-2".to_string(),
            reason: "start is after end".to_string(),
        };
        assert!(err.to_string().contains("5-2"));
        assert!(err.to_string().contains("start is after end"));
    }

    #[test]
    fn test_wraps_into_anyhow() {
        let err: anyhow::Error = PipelineError::EmptyAssembly("book".to_string()).into();
        assert!(err.downcast_ref::<PipelineError>().is_some());
    }
}
