//! Post-processing stage applied to in-process model output.

use super::model::AudioClip;
use anyhow::Result;

/// Embeds and detects an audio watermark.
pub trait Watermarker: Send + Sync {
    /// Return the clip with the watermark applied.
    fn apply(&self, clip: AudioClip) -> Result<AudioClip>;

    /// Recover the watermark key, if one is present.
    fn verify(&self, clip: &AudioClip) -> Result<Option<Vec<u8>>>;
}

/// Leaves audio untouched and never detects a mark.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatermarker;

impl Watermarker for NoopWatermarker {
    fn apply(&self, clip: AudioClip) -> Result<AudioClip> {
        Ok(clip)
    }

    fn verify(&self, _clip: &AudioClip) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }
}
