//! Whisper transcription backend.
//!
//! Shells out to a local whisper binary. The audio is written to a temp
//! directory, whisper writes its JSON transcript next to it, and the text
//! is read back. The default task translates speech to English.

use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::Transcriber;
use crate::config::TranscriptionSettings;
use crate::domain::AudioInput;

const AUDIO_STEM: &str = "audio";

/// Whisper output JSON structure
#[derive(Debug, Deserialize)]
struct WhisperOutput {
    text: String,
    #[serde(default)]
    language: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    end: f64,
}

/// Transcriber backed by the whisper CLI
pub struct WhisperTranscriber {
    settings: TranscriptionSettings,
}

impl WhisperTranscriber {
    pub fn new(settings: TranscriptionSettings) -> Self {
        Self { settings }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_seconds)
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    fn name(&self) -> &str {
        "whisper"
    }

    async fn transcribe(&self, audio: &AudioInput) -> Result<String> {
        if audio.bytes.is_empty() {
            anyhow::bail!("Audio file '{}' is empty", audio.file_name);
        }
        let extension = audio
            .extension()
            .with_context(|| format!("Audio file '{}' has no extension", audio.file_name))?;

        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let audio_path = temp_dir.path().join(format!("{}.{}", AUDIO_STEM, extension));
        tokio::fs::write(&audio_path, &audio.bytes)
            .await
            .context("Failed to write audio to temp file")?;

        debug!(
            file = %audio.file_name,
            bytes = audio.bytes.len(),
            model = %self.settings.model,
            "Running whisper"
        );

        let child = Command::new(&self.settings.whisper_path)
            .arg(&audio_path)
            .arg("--model")
            .arg(&self.settings.model)
            .arg("--task")
            .arg(&self.settings.task)
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run whisper at '{}'", self.settings.whisper_path))?;

        let output = timeout(self.timeout(), child.wait_with_output())
            .await
            .with_context(|| format!("Whisper timed out after {:?}", self.timeout()))?
            .context("Failed to wait for whisper")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Whisper failed: {}", stderr.trim());
        }

        let json_path = temp_dir.path().join(format!("{}.json", AUDIO_STEM));
        let json_content = tokio::fs::read_to_string(&json_path)
            .await
            .context("Failed to read whisper output")?;

        let transcript = parse_transcript(&json_content)?;
        if transcript.is_empty() {
            anyhow::bail!("Whisper produced an empty transcript");
        }
        Ok(transcript)
    }
}

/// Extract the transcript text from whisper's JSON output
fn parse_transcript(json: &str) -> Result<String> {
    let whisper: WhisperOutput =
        serde_json::from_str(json).context("Failed to parse whisper JSON")?;

    let duration = whisper.segments.last().map(|s| s.end).unwrap_or(0.0);
    info!(
        language = %whisper.language,
        duration_seconds = duration,
        "Audio transcribed"
    );

    Ok(whisper.text.trim().to_string())
}
