//! Adapter interfaces for external systems.
//!
//! The workflow only talks to the outside world through these traits:
//! a chat model, a web search service, a speech transcriber, and an
//! outline renderer. Concrete adapters live in the submodules.

pub mod openai;
pub mod tavily;
pub mod whisper;
pub mod xmindmark;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;

use crate::domain::{AudioInput, ChatTurn, RenderFormat, RenderedArtifact};

pub use openai::OpenAiClient;
pub use tavily::TavilyClient;
pub use whisper::WhisperTranscriber;
pub use xmindmark::XMindMarkRenderer;

/// Stream of raw text fragments from a model
pub type TextStream = BoxStream<'static, Result<String>>;

/// What a prompt asks the model to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    Outline,
    OutlineFromAudio,
    OutlineWithoutDocument,
    OutlineWithSearch,
    GlobalTitle,
    SplitDocument,
    MergeOutlines,
    Edit,
    EditWithSearch,
}

/// A fully built prompt: the instruction body plus the caller's history
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub body: String,
    pub history: Vec<ChatTurn>,
}

/// Chat model completion
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Blocking completion
    async fn complete(&self, prompt: &Prompt) -> Result<String>;

    /// Streaming completion; lazy, finite, not restartable
    async fn complete_stream(&self, prompt: &Prompt) -> Result<TextStream>;
}

/// Text returned by a search when nothing relevant was found
pub const NO_SEARCH_RESULTS: &str = "No relevant information found.";

/// Web search
#[async_trait]
pub trait SearchClient: Send + Sync {
    fn name(&self) -> &str;

    /// Search and return one text blob of results, or `NO_SEARCH_RESULTS`
    async fn search(&self, query: &str) -> Result<String>;
}

/// Speech-to-text
#[async_trait]
pub trait Transcriber: Send + Sync {
    fn name(&self) -> &str;

    /// Transcribe (and translate) audio to text
    async fn transcribe(&self, audio: &AudioInput) -> Result<String>;
}

/// Outline to binary conversion
#[async_trait]
pub trait Renderer: Send + Sync {
    fn name(&self) -> &str;

    async fn render(&self, outline: &str, format: RenderFormat) -> Result<RenderedArtifact>;

    /// Check that the external tool is available
    async fn health_check(&self) -> Result<()>;
}
