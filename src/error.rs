//! Error taxonomy for the outline workflow.
//!
//! Fatal errors abort a job; `ChunkGeneration` and `MergeValidation` are
//! recovered inside the workflow and only surface in logs and job events.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{JobStatus, Stage};

/// Failure of a single model call (including timeouts)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{cause}")]
pub struct GenerationFailure {
    pub cause: String,
}

impl GenerationFailure {
    pub fn new(cause: impl Into<String>) -> Self {
        Self {
            cause: cause.into(),
        }
    }

    /// Wrap an adapter error, keeping its whole context chain
    pub fn from_adapter(error: &anyhow::Error) -> Self {
        Self::new(format!("{:#}", error))
    }

    pub fn timed_out(after: Duration) -> Self {
        Self::new(format!("model call timed out after {}s", after.as_secs()))
    }
}

/// Errors raised by the workflow, tagged with the stage that produced them
#[derive(Debug, Clone, Error)]
pub enum WorkflowError {
    #[error("[{stage}] invalid input: {message}")]
    Input { stage: Stage, message: String },

    #[error("[{stage}] transcription failed: {cause}")]
    Transcription { stage: Stage, cause: String },

    #[error("[{stage}] chunk list is not a valid list literal: {cause}")]
    SplitParse { stage: Stage, cause: String },

    #[error("[{stage}] chunk {index} failed: {cause}")]
    ChunkGeneration {
        stage: Stage,
        index: usize,
        cause: String,
    },

    #[error("[{stage}] merge response rejected: {cause}")]
    MergeValidation { stage: Stage, cause: String },

    #[error("[{stage}] generation failed: {cause}")]
    Generation { stage: Stage, cause: String },

    #[error("[{stage}] web search failed: {cause}")]
    Search { stage: Stage, cause: String },

    #[error("[{stage}] render failed: {cause}")]
    Render { stage: Stage, cause: String },

    #[error("invalid job transition: {from:?} -> {to:?}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

impl WorkflowError {
    pub fn input(stage: Stage, message: impl Into<String>) -> Self {
        Self::Input {
            stage,
            message: message.into(),
        }
    }

    pub fn generation(stage: Stage, failure: GenerationFailure) -> Self {
        Self::Generation {
            stage,
            cause: failure.cause,
        }
    }

    /// Short machine-readable kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Input { .. } => "input_error",
            Self::Transcription { .. } => "transcription_error",
            Self::SplitParse { .. } => "split_parse_error",
            Self::ChunkGeneration { .. } => "chunk_generation_error",
            Self::MergeValidation { .. } => "merge_validation_error",
            Self::Generation { .. } => "generation_error",
            Self::Search { .. } => "search_error",
            Self::Render { .. } => "render_error",
            Self::InvalidTransition { .. } => "invalid_transition",
        }
    }

    /// Stage the error originated in
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Input { stage, .. }
            | Self::Transcription { stage, .. }
            | Self::SplitParse { stage, .. }
            | Self::ChunkGeneration { stage, .. }
            | Self::MergeValidation { stage, .. }
            | Self::Generation { stage, .. }
            | Self::Search { stage, .. }
            | Self::Render { stage, .. } => Some(*stage),
            Self::InvalidTransition { .. } => None,
        }
    }

    /// Whether the error ends the job
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::ChunkGeneration { .. } | Self::MergeValidation { .. }
        )
    }
}
