//! Chunk Pool Integration Tests
//!
//! Tests for ordered results under out-of-order completion, per-chunk
//! failure isolation, the concurrency bound, and the pool fallbacks.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use mindmark::adapters::{Prompt, PromptKind};
use mindmark::core::{
    process_sequential, ChunkOutcome, ChunkPool, OutlineGenerator, PoolError, CHUNK_ERROR_PREFIX,
};
use mindmark::domain::{EventType, JobRequest};

use common::{
    chunk_outline, happy_responder, orchestrator, part_index, settings, tagged_document,
    ScriptedModel,
};

fn chunks(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("[part {}] section text", i)).collect()
}

fn chunk_responder(prompt: &Prompt) -> Result<String, String> {
    match part_index(&prompt.body) {
        Some(i) => Ok(chunk_outline(i)),
        None => Err("prompt without a part tag".to_string()),
    }
}

fn generator(model: &Arc<ScriptedModel>) -> Arc<OutlineGenerator> {
    Arc::new(OutlineGenerator::new(model.clone(), Duration::from_secs(5)))
}

#[tokio::test]
async fn test_results_follow_chunk_order_not_completion_order() {
    // Earlier chunks take longer; chunk 0 always finishes last
    let model = Arc::new(ScriptedModel::new(chunk_responder).with_delay(|prompt| {
        match part_index(&prompt.body).unwrap_or(0) as u64 {
            0 => Duration::from_millis(250),
            i => Duration::from_millis((5 - i) * 30),
        }
    }));
    let pool = ChunkPool::new(4);

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(5), "summarize", &[], &CancellationToken::new())
            .await
    );

    let expected: Vec<ChunkOutcome> = (0..5).map(|i| ChunkOutcome::Outline(chunk_outline(i))).collect();
    assert_eq!(outcomes, expected);

    let completed = model.completed();
    assert_eq!(completed.len(), 5);
    assert_eq!(part_index(&completed[4].body), Some(0));
    assert_ne!(part_index(&completed[0].body), Some(0));
}

#[tokio::test]
async fn test_failed_chunk_keeps_its_position() {
    let model = Arc::new(ScriptedModel::new(|prompt| match part_index(&prompt.body) {
        Some(2) => Err("rate limited".to_string()),
        Some(i) => Ok(chunk_outline(i)),
        None => Err("prompt without a part tag".to_string()),
    }));
    let pool = ChunkPool::new(4);

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(5), "summarize", &[], &CancellationToken::new())
            .await
    );

    assert_eq!(outcomes.len(), 5);
    for (i, outcome) in outcomes.iter().enumerate() {
        assert_eq!(outcome.is_failed(), i == 2, "chunk {}", i);
    }

    let texts: Vec<String> = outcomes.into_iter().map(ChunkOutcome::into_text).collect();
    assert!(texts[2].starts_with(CHUNK_ERROR_PREFIX));
    assert!(texts[2].contains("rate limited"));
    assert_eq!(texts[3], chunk_outline(3));
}

#[tokio::test]
async fn test_blank_chunk_outline_becomes_placeholder() {
    let model = Arc::new(ScriptedModel::new(|prompt| match part_index(&prompt.body) {
        Some(0) => Ok(format!("{}\n```", chunk_outline(0))),
        Some(1) => Ok("```\n```".to_string()),
        Some(2) => Ok("   ".to_string()),
        Some(i) => Ok(chunk_outline(i)),
        None => Err("prompt without a part tag".to_string()),
    }));
    let pool = ChunkPool::new(4);

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(4), "summarize", &[], &CancellationToken::new())
            .await
    );

    assert_eq!(
        outcomes,
        vec![
            ChunkOutcome::Outline(chunk_outline(0)),
            ChunkOutcome::Failed("empty outline".to_string()),
            ChunkOutcome::Failed("empty outline".to_string()),
            ChunkOutcome::Outline(chunk_outline(3)),
        ]
    );
    assert_eq!(
        outcomes[1].clone().into_text(),
        format!("{}empty outline", CHUNK_ERROR_PREFIX)
    );
}

#[tokio::test]
async fn test_pool_bounds_concurrency() {
    let model = Arc::new(
        ScriptedModel::new(chunk_responder).with_delay(|_| Duration::from_millis(50)),
    );
    let pool = ChunkPool::new(4);

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(6), "summarize", &[], &CancellationToken::new())
            .await
    );

    assert_eq!(outcomes.len(), 6);
    assert_eq!(model.count(PromptKind::Outline), 6);
    assert_eq!(model.max_chunks_in_flight(), 4);
}

#[tokio::test]
async fn test_pool_width_is_at_least_one() {
    let model = Arc::new(
        ScriptedModel::new(chunk_responder).with_delay(|_| Duration::from_millis(10)),
    );
    let pool = ChunkPool::new(0);
    assert_eq!(pool.width(), 1);

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(3), "summarize", &[], &CancellationToken::new())
            .await
    );
    assert_eq!(outcomes.len(), 3);
    assert_eq!(model.max_chunks_in_flight(), 1);
}

#[tokio::test]
async fn test_closed_pool_rejects_work() {
    let model = Arc::new(ScriptedModel::new(chunk_responder));
    let pool = ChunkPool::new(4);
    pool.shutdown();
    assert!(pool.is_closed());

    let err = assert_err!(
        pool.process_all(generator(&model), &chunks(3), "summarize", &[], &CancellationToken::new())
            .await
    );
    assert_eq!(err, PoolError::Closed);
    assert_eq!(model.count(PromptKind::Outline), 0);
}

#[tokio::test]
async fn test_workflow_falls_back_to_sequential_processing() {
    let model = Arc::new(
        ScriptedModel::new(happy_responder(3)).with_delay(|_| Duration::from_millis(5)),
    );
    let orchestrator = orchestrator(model.clone(), settings(100, 4));
    orchestrator.pool().shutdown();

    let job = assert_ok!(
        orchestrator
            .run(JobRequest::text(tagged_document(3, 500), "summarize"))
            .await
    );

    assert_eq!(job.events_of(EventType::SequentialFallback).count(), 1);
    assert_eq!(model.max_chunks_in_flight(), 1);
    assert_eq!(
        job.chunk_outlines,
        (0..3).map(chunk_outline).collect::<Vec<_>>()
    );
    assert!(job.final_outline().is_some());
}

#[tokio::test]
async fn test_sequential_processing_keeps_order() {
    let model = Arc::new(ScriptedModel::new(chunk_responder));
    let generator = generator(&model);

    let outcomes =
        process_sequential(&generator, &chunks(4), "summarize", &[], &CancellationToken::new())
            .await;

    let expected: Vec<ChunkOutcome> = (0..4).map(|i| ChunkOutcome::Outline(chunk_outline(i))).collect();
    assert_eq!(outcomes, expected);
}

#[tokio::test]
async fn test_cancelled_job_submits_no_chunks() {
    let model = Arc::new(ScriptedModel::new(chunk_responder));
    let pool = ChunkPool::new(4);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let outcomes = assert_ok!(
        pool.process_all(generator(&model), &chunks(3), "summarize", &[], &cancel)
            .await
    );

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes.iter().all(ChunkOutcome::is_failed));
    assert_eq!(model.count(PromptKind::Outline), 0);
}

#[tokio::test]
async fn test_cancellation_lets_running_chunks_finish() {
    let model = Arc::new(
        ScriptedModel::new(chunk_responder).with_delay(|_| Duration::from_millis(100)),
    );
    let pool = ChunkPool::new(1);
    let cancel = CancellationToken::new();

    let canceller = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
    };
    let input_chunks = chunks(3);
    let (processed, ()) = tokio::join!(
        pool.process_all(generator(&model), &input_chunks, "summarize", &[], &cancel),
        canceller,
    );

    // Whichever chunk held the only permit completes; the rest never start
    let outcomes = assert_ok!(processed);
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes.iter().filter(|o| !o.is_failed()).count(), 1);
    assert_eq!(model.count(PromptKind::Outline), 1);
}
