//! xmindmark CLI renderer.
//!
//! Writes the outline to `<timestamp>.xmindmark` in a temp directory and
//! runs `xmindmark` there. SVG output needs `--format svg`; the default
//! output is an `.xmind` workbook. The produced file is found by extension
//! and read back into memory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info};

use super::Renderer;
use crate::config::RenderSettings;
use crate::domain::{RenderFormat, RenderedArtifact};

/// Renderer backed by the xmindmark CLI
pub struct XMindMarkRenderer {
    settings: RenderSettings,
}

impl XMindMarkRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_seconds)
    }

    fn args(format: RenderFormat, input: &Path) -> Vec<String> {
        let input = input.to_string_lossy().to_string();
        match format {
            RenderFormat::Svg => vec!["--format".to_string(), "svg".to_string(), input],
            RenderFormat::Xmind => vec![input],
        }
    }
}

#[async_trait]
impl Renderer for XMindMarkRenderer {
    fn name(&self) -> &str {
        "xmindmark"
    }

    async fn render(&self, outline: &str, format: RenderFormat) -> Result<RenderedArtifact> {
        let temp_dir = tempfile::tempdir().context("Failed to create temp dir")?;
        let stem = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let input_path = temp_dir.path().join(format!("{}.xmindmark", stem));

        tokio::fs::write(&input_path, outline)
            .await
            .context("Failed to write outline to temp file")?;

        debug!(format = format.extension(), "Running xmindmark");
        let child = Command::new(&self.settings.binary)
            .args(Self::args(format, &input_path))
            .current_dir(temp_dir.path())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to run '{}'; is xmindmark installed?", self.settings.binary))?;

        let output = timeout(self.timeout(), child.wait_with_output())
            .await
            .with_context(|| format!("xmindmark timed out after {:?}", self.timeout()))?
            .context("Failed to wait for xmindmark")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!("xmindmark failed with exit code {}: {}", exit_code, stderr.trim());
        }

        let produced = find_output(temp_dir.path(), format.extension())
            .await?
            .with_context(|| format!("xmindmark produced no .{} file", format.extension()))?;
        let bytes = tokio::fs::read(&produced)
            .await
            .with_context(|| format!("Failed to read {}", produced.display()))?;

        let artifact = RenderedArtifact::new(format, bytes);
        info!(
            format = format.extension(),
            size_bytes = artifact.size_bytes,
            "Outline rendered"
        );
        Ok(artifact)
    }

    async fn health_check(&self) -> Result<()> {
        let output = Command::new(&self.settings.binary)
            .arg("--help")
            .output()
            .await
            .context("Failed to run xmindmark health check")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("xmindmark health check failed: {}", stderr.trim());
        }
        Ok(())
    }
}

/// First file in `dir` with the given extension
async fn find_output(dir: &Path, extension: &str) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list {}", dir.display()))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().is_some_and(|e| e == extension) {
            return Ok(Some(path));
        }
    }
    Ok(None)
}
