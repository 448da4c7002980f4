//! The "ask the model for an outline" primitive.
//!
//! Every model call in the workflow (chunk outlines, titles, split lists,
//! merges, edits) goes through `OutlineGenerator` with a different
//! `OutlineRequest`. The generator applies the per-call timeout and never
//! retries; retry policy belongs to the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tracing::{debug, instrument};

use crate::adapters::{ModelClient, TextStream};
use crate::domain::{ChatTurn, FragmentStream};
use crate::error::GenerationFailure;

use super::prompts::OutlineRequest;

/// Model-backed outline generation
pub struct OutlineGenerator {
    model: Arc<dyn ModelClient>,

    /// Applied to every blocking call, and between streamed fragments
    call_timeout: Duration,
}

impl OutlineGenerator {
    pub fn new(model: Arc<dyn ModelClient>, call_timeout: Duration) -> Self {
        Self {
            model,
            call_timeout,
        }
    }

    pub fn model_name(&self) -> &str {
        self.model.name()
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Blocking generation
    #[instrument(skip_all, fields(kind = ?request.kind(), model = %self.model.name()))]
    pub async fn generate(
        &self,
        request: &OutlineRequest<'_>,
        history: &[ChatTurn],
    ) -> Result<String, GenerationFailure> {
        let prompt = request.build(history);

        match tokio::time::timeout(self.call_timeout, self.model.complete(&prompt)).await {
            Ok(Ok(text)) => {
                debug!(chars = text.len(), "Model call completed");
                Ok(text)
            }
            Ok(Err(e)) => Err(GenerationFailure::from_adapter(&e)),
            Err(_) => Err(GenerationFailure::timed_out(self.call_timeout)),
        }
    }

    /// Streaming generation. Empty fragments are dropped; the stream ends
    /// after the first failure.
    #[instrument(skip_all, fields(kind = ?request.kind(), model = %self.model.name()))]
    pub async fn generate_stream(
        &self,
        request: &OutlineRequest<'_>,
        history: &[ChatTurn],
    ) -> Result<FragmentStream, GenerationFailure> {
        let prompt = request.build(history);

        let inner = match tokio::time::timeout(
            self.call_timeout,
            self.model.complete_stream(&prompt),
        )
        .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(GenerationFailure::from_adapter(&e)),
            Err(_) => return Err(GenerationFailure::timed_out(self.call_timeout)),
        };

        Ok(guard_fragments(inner, self.call_timeout))
    }
}

/// Drop empty fragments, bound the wait for each next fragment, and stop
/// after the first error.
fn guard_fragments(inner: TextStream, idle_timeout: Duration) -> FragmentStream {
    stream::unfold(Some(inner), move |state| async move {
        let mut inner = state?;
        loop {
            match tokio::time::timeout(idle_timeout, inner.next()).await {
                Ok(Some(Ok(text))) if text.is_empty() => continue,
                Ok(Some(Ok(text))) => return Some((Ok(text), Some(inner))),
                Ok(Some(Err(e))) => {
                    return Some((Err(GenerationFailure::from_adapter(&e)), None))
                }
                Ok(None) => return None,
                Err(_) => return Some((Err(GenerationFailure::timed_out(idle_timeout)), None)),
            }
        }
    })
    .boxed()
}
