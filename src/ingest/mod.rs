//! Input ingestion.
//!
//! Turns files given to the CLI into job inputs:
//!
//! 1. **Document**: text extraction from .txt, .md and .pdf files
//! 2. **Audio**: audio files are loaded as-is and transcribed by the
//!    workflow's transcriber

pub mod document;

use std::path::Path;

use anyhow::{Context, Result};

use crate::domain::AudioInput;

// Re-export key types
pub use document::{extract_from_bytes, extract_text, DocumentError, DocumentKind};

/// Load an audio file for transcription
pub fn load_audio(path: &Path) -> Result<AudioInput> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read audio file: {}", path.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(AudioInput::new(file_name, bytes))
}
