//! Parallel chunk processing.
//!
//! One `ChunkPool` lives as long as its orchestrator and bounds how many
//! chunk outlines are generated at once across every job it runs. Each
//! chunk runs as its own task carrying its index; results land in a
//! per-index slot, so completion order never affects output order.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::ChatTurn;

use super::generator::OutlineGenerator;
use super::outline::strip_code_fences;
use super::prompts::OutlineRequest;

/// Prefix of the placeholder recorded for a failed chunk
pub const CHUNK_ERROR_PREFIX: &str = "Error processing chunk: ";

const CANCELLED: &str = "job cancelled before the chunk was started";
const EMPTY_OUTLINE: &str = "empty outline";

/// Result for one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    Outline(String),
    Failed(String),
}

impl ChunkOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, ChunkOutcome::Failed(_))
    }

    /// Outline text, or the inline error placeholder
    pub fn into_text(self) -> String {
        match self {
            ChunkOutcome::Outline(outline) => outline,
            ChunkOutcome::Failed(cause) => format!("{}{}", CHUNK_ERROR_PREFIX, cause),
        }
    }
}

/// Failure of the pool itself (as opposed to a single chunk)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("worker pool is shut down")]
    Closed,

    #[error("chunk task aborted: {0}")]
    TaskAborted(String),

    #[error("no result recorded for chunk {0}")]
    MissingResult(usize),
}

/// Bounded worker pool for chunk outline generation
#[derive(Debug, Clone)]
pub struct ChunkPool {
    permits: Arc<Semaphore>,
    width: usize,
}

impl ChunkPool {
    pub fn new(width: usize) -> Self {
        let width = width.max(1);
        Self {
            permits: Arc::new(Semaphore::new(width)),
            width,
        }
    }

    /// Maximum number of chunks in flight
    pub fn width(&self) -> usize {
        self.width
    }

    /// Stop accepting work. Later `process_all` calls fail with `Closed`.
    pub fn shutdown(&self) {
        self.permits.close();
    }

    pub fn is_closed(&self) -> bool {
        self.permits.is_closed()
    }

    /// Generate one outline per chunk, at most `width` at a time.
    ///
    /// The result has one entry per chunk, in chunk order. A failing chunk
    /// is recorded as `ChunkOutcome::Failed` at its position. Once `cancel`
    /// fires, chunks that have not started are recorded as failed instead
    /// of being submitted; running chunks finish.
    #[instrument(skip_all, fields(chunks = chunks.len(), width = self.width))]
    pub async fn process_all(
        &self,
        generator: Arc<OutlineGenerator>,
        chunks: &[String],
        requirement: &str,
        history: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkOutcome>, PoolError> {
        if self.permits.is_closed() {
            return Err(PoolError::Closed);
        }
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let requirement: Arc<str> = Arc::from(requirement);
        let history: Arc<[ChatTurn]> = Arc::from(history);

        let mut tasks = JoinSet::new();
        for (index, chunk) in chunks.iter().enumerate() {
            tasks.spawn(run_chunk(
                index,
                chunk.clone(),
                Arc::clone(&generator),
                Arc::clone(&requirement),
                Arc::clone(&history),
                Arc::clone(&self.permits),
                cancel.clone(),
            ));
        }

        let mut slots: Vec<Option<ChunkOutcome>> = vec![None; chunks.len()];
        while let Some(joined) = tasks.join_next().await {
            let (index, outcome) = joined.map_err(|e| PoolError::TaskAborted(e.to_string()))??;
            debug!(index, failed = outcome.is_failed(), "Chunk finished");
            slots[index] = Some(outcome);
        }

        let outcomes = collect_slots(slots)?;
        let failed = outcomes.iter().filter(|o| o.is_failed()).count();
        info!(failed, "Chunk processing finished");
        Ok(outcomes)
    }
}

async fn run_chunk(
    index: usize,
    chunk: String,
    generator: Arc<OutlineGenerator>,
    requirement: Arc<str>,
    history: Arc<[ChatTurn]>,
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
) -> Result<(usize, ChunkOutcome), PoolError> {
    let _permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            return Ok((index, ChunkOutcome::Failed(CANCELLED.to_string())));
        }
        permit = permits.acquire_owned() => permit.map_err(|_| PoolError::Closed)?,
    };

    Ok((index, generate_chunk(&generator, index, &chunk, &requirement, &history).await))
}

async fn generate_chunk(
    generator: &OutlineGenerator,
    index: usize,
    chunk: &str,
    requirement: &str,
    history: &[ChatTurn],
) -> ChunkOutcome {
    let request = OutlineRequest::Document {
        text: chunk,
        requirement,
    };
    match generator.generate(&request, history).await {
        Ok(raw) => {
            let outline = strip_code_fences(&raw);
            if outline.is_empty() {
                warn!(index, "Chunk generation returned an empty outline");
                ChunkOutcome::Failed(EMPTY_OUTLINE.to_string())
            } else {
                ChunkOutcome::Outline(outline)
            }
        }
        Err(failure) => {
            warn!(index, error = %failure, "Chunk generation failed");
            ChunkOutcome::Failed(failure.cause)
        }
    }
}

fn collect_slots(slots: Vec<Option<ChunkOutcome>>) -> Result<Vec<ChunkOutcome>, PoolError> {
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| slot.ok_or(PoolError::MissingResult(index)))
        .collect()
}

/// Process chunks one after another. Used when the pool itself fails.
#[instrument(skip_all, fields(chunks = chunks.len()))]
pub async fn process_sequential(
    generator: &OutlineGenerator,
    chunks: &[String],
    requirement: &str,
    history: &[ChatTurn],
    cancel: &CancellationToken,
) -> Vec<ChunkOutcome> {
    let mut outcomes = Vec::with_capacity(chunks.len());
    for (index, chunk) in chunks.iter().enumerate() {
        if cancel.is_cancelled() {
            outcomes.push(ChunkOutcome::Failed(CANCELLED.to_string()));
            continue;
        }
        outcomes.push(generate_chunk(generator, index, chunk, requirement, history).await);
    }
    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_outcome_renders_placeholder() {
        let outcome = ChunkOutcome::Failed("rate limited".to_string());
        assert!(outcome.is_failed());
        assert_eq!(outcome.into_text(), "Error processing chunk: rate limited");
        assert_eq!(ChunkOutcome::Outline("A\n- b".to_string()).into_text(), "A\n- b");
    }

    #[test]
    fn test_pool_width_is_at_least_one() {
        assert_eq!(ChunkPool::new(0).width(), 1);
        assert_eq!(ChunkPool::new(4).width(), 4);
    }

    #[test]
    fn test_missing_slot_is_reported() {
        let slots = vec![Some(ChunkOutcome::Outline("A".to_string())), None];
        assert_eq!(collect_slots(slots), Err(PoolError::MissingResult(1)));
    }

    #[test]
    fn test_shutdown_closes_pool() {
        let pool = ChunkPool::new(2);
        let clone = pool.clone();
        pool.shutdown();
        assert!(clone.is_closed());
    }
}
