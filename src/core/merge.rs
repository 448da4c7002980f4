//! Merge engine: one outline out of per-chunk outlines and a global title.
//!
//! Zero and one chunk are handled structurally. Two or more go through the
//! model; a rejected or failed model merge falls back to `structural_merge`,
//! which cannot fail.

use tracing::{info, instrument, warn};

use crate::domain::{ChatTurn, Stage};
use crate::error::WorkflowError;

use super::generator::OutlineGenerator;
use super::outline::{strip_code_fences, structural_merge};
use super::prompts::{chunks_block, OutlineRequest};

/// How a merged outline was produced
#[derive(Debug, Clone)]
pub enum MergeMethod {
    /// No chunks: the title alone
    TitleOnly,

    /// One chunk nested under the title
    Nested,

    /// Model-reconciled
    Model,

    /// Structural fallback after the model merge was rejected
    Fallback(WorkflowError),
}

#[derive(Debug, Clone)]
pub struct Merged {
    pub outline: String,
    pub method: MergeMethod,
}

impl Merged {
    pub fn used_fallback(&self) -> bool {
        matches!(self.method, MergeMethod::Fallback(_))
    }
}

/// Merge chunk outlines under `global_title`
#[instrument(skip_all, fields(chunks = chunk_outlines.len()))]
pub async fn merge(
    generator: &OutlineGenerator,
    chunk_outlines: &[String],
    global_title: &str,
    requirement: &str,
    history: &[ChatTurn],
) -> Merged {
    match chunk_outlines.len() {
        0 => Merged {
            outline: global_title.trim().to_string(),
            method: MergeMethod::TitleOnly,
        },
        1 => Merged {
            outline: structural_merge(global_title, chunk_outlines),
            method: MergeMethod::Nested,
        },
        _ => match model_merge(generator, chunk_outlines, global_title, requirement, history).await {
            Ok(outline) => {
                info!(lines = outline.lines().count(), "Model merge accepted");
                Merged {
                    outline,
                    method: MergeMethod::Model,
                }
            }
            Err(err) => {
                warn!(error = %err, "Falling back to structural merge");
                Merged {
                    outline: structural_merge(global_title, chunk_outlines),
                    method: MergeMethod::Fallback(err),
                }
            }
        },
    }
}

async fn model_merge(
    generator: &OutlineGenerator,
    chunk_outlines: &[String],
    global_title: &str,
    requirement: &str,
    history: &[ChatTurn],
) -> Result<String, WorkflowError> {
    let block = chunks_block(chunk_outlines);
    let request = OutlineRequest::Merge {
        chunks_block: &block,
        global_title,
        requirement,
    };

    let response = generator
        .generate(&request, history)
        .await
        .map_err(|failure| WorkflowError::MergeValidation {
            stage: Stage::Merging,
            cause: format!("model call failed: {}", failure),
        })?;

    let outline = strip_code_fences(&response);
    check_merge_response(&outline).map_err(|cause| WorkflowError::MergeValidation {
        stage: Stage::Merging,
        cause,
    })?;
    Ok(outline)
}

/// A merge response must be non-empty with at least a title and one line
pub fn check_merge_response(outline: &str) -> Result<(), String> {
    let content = outline.trim();
    if content.is_empty() {
        return Err("empty response".to_string());
    }

    let lines = content.lines().count();
    if lines < 2 {
        return Err(format!("response has {} line, expected at least 2", lines));
    }
    Ok(())
}
