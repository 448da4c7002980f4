//! Input limits checked before a job touches any external service.
//!
//! Rejects:
//! - Source text above the configured character limit
//! - Empty or oversized audio uploads
//! - Audio with an unsupported extension

use thiserror::Error;

use crate::config::{TranscriptionSettings, WorkflowSettings};
use crate::domain::AudioInput;

/// Limits applied to job inputs
#[derive(Debug, Clone)]
pub struct InputLimits {
    /// Maximum source text length in characters
    pub max_input_chars: usize,

    /// Maximum audio size in bytes
    pub max_audio_bytes: u64,

    /// Accepted audio file extensions (lowercase, no dot)
    pub audio_extensions: Vec<String>,
}

impl Default for InputLimits {
    fn default() -> Self {
        Self::from_settings(&WorkflowSettings::default(), &TranscriptionSettings::default())
    }
}

impl InputLimits {
    pub fn from_settings(workflow: &WorkflowSettings, transcription: &TranscriptionSettings) -> Self {
        Self {
            max_input_chars: workflow.max_input_chars,
            max_audio_bytes: transcription.max_audio_bytes,
            audio_extensions: transcription
                .allowed_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_lowercase())
                .collect(),
        }
    }

    /// Validate source text length
    pub fn validate_text(&self, text: &str) -> Result<(), InputViolation> {
        let chars = text.chars().count();
        if chars > self.max_input_chars {
            return Err(InputViolation::TextTooLong {
                actual: chars,
                limit: self.max_input_chars,
            });
        }
        Ok(())
    }

    /// Validate an audio upload before transcription
    pub fn validate_audio(&self, audio: &AudioInput) -> Result<(), InputViolation> {
        if audio.bytes.is_empty() {
            return Err(InputViolation::EmptyAudio);
        }

        let size = audio.bytes.len() as u64;
        if size > self.max_audio_bytes {
            return Err(InputViolation::AudioTooLarge {
                actual: size,
                limit: self.max_audio_bytes,
            });
        }

        match audio.extension() {
            Some(ext) if self.audio_extensions.contains(&ext) => Ok(()),
            other => Err(InputViolation::UnsupportedAudioFormat {
                extension: other.unwrap_or_default(),
            }),
        }
    }
}

/// Input limit violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputViolation {
    #[error("input text is too long: {actual} > {limit} characters")]
    TextTooLong { actual: usize, limit: usize },

    #[error("audio file is empty")]
    EmptyAudio,

    #[error("audio file is too large: {actual} > {limit} bytes")]
    AudioTooLarge { actual: u64, limit: u64 },

    #[error("unsupported audio format: '{extension}'")]
    UnsupportedAudioFormat { extension: String },
}
