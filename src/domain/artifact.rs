//! Rendered outline artifacts (SVG images and XMind workbooks).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output format for rendering an outline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderFormat {
    Svg,
    Xmind,
}

impl RenderFormat {
    /// File extension produced by the renderer
    pub fn extension(&self) -> &'static str {
        match self {
            RenderFormat::Svg => "svg",
            RenderFormat::Xmind => "xmind",
        }
    }
}

/// A rendered outline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderedArtifact {
    pub format: RenderFormat,

    #[serde(skip)]
    pub bytes: Vec<u8>,

    pub created_at: DateTime<Utc>,

    /// Size in bytes (for tracking)
    pub size_bytes: u64,
}

impl RenderedArtifact {
    pub fn new(format: RenderFormat, bytes: Vec<u8>) -> Self {
        let size_bytes = bytes.len() as u64;
        Self {
            format,
            bytes,
            created_at: Utc::now(),
            size_bytes,
        }
    }

    /// Timestamped file name, e.g. `20250101_120000.svg`
    pub fn file_name(&self) -> String {
        format!(
            "{}.{}",
            self.created_at.format("%Y%m%d_%H%M%S"),
            self.format.extension()
        )
    }
}
