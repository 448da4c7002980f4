//! Edit Integration Tests
//!
//! Tests for streamed outline edits, search-assisted edits and the caller
//! contract checks that run before any network call.

mod common;

use std::sync::Arc;

use futures::StreamExt;
use tokio_test::{assert_err, assert_ok};

use mindmark::adapters::PromptKind;
use mindmark::core::EditRequest;
use mindmark::domain::{ChatTurn, JobRequest, Stage, StreamEvent};

use common::{happy_responder, orchestrator, settings, RecordingSearch, ScriptedModel};

const OUTLINE: &str = "Rust Async\n- Futures\n- Executors";

#[tokio::test]
async fn test_edit_streams_new_outline() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)));
    let orchestrator = orchestrator(model.clone(), settings(1000, 4));

    let events: Vec<StreamEvent> = orchestrator
        .edit_stream(EditRequest::new(OUTLINE, "add a branch on pinning"))
        .await
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            StreamEvent::fragment("Edited Outline\n"),
            StreamEvent::fragment("- changed\n"),
            StreamEvent::fragment("- kept"),
            StreamEvent::End,
        ]
    );

    let calls = model.calls_of(PromptKind::Edit);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].body.contains(OUTLINE));
    assert!(calls[0].body.contains("add a branch on pinning"));
}

#[tokio::test]
async fn test_search_edit_requires_original_requirement() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)));
    let search = Arc::new(RecordingSearch::returning("context"));
    let orchestrator = orchestrator(model.clone(), settings(1000, 4)).with_search(search.clone());

    let request = EditRequest::new(OUTLINE, "add recent releases").with_search("  ");
    let events: Vec<StreamEvent> = orchestrator.edit_stream(request).await.collect().await;

    assert_eq!(events.len(), 2);
    match &events[0] {
        StreamEvent::Error { kind, message } => {
            assert_eq!(kind, "input_error");
            assert!(message.contains("original requirement"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(events[1], StreamEvent::End);
    assert!(search.queries().is_empty());
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn test_search_edit_queries_requirement_and_request() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)));
    let search = Arc::new(RecordingSearch::returning("Tokio 1.40 was released."));
    let orchestrator = orchestrator(model.clone(), settings(1000, 4)).with_search(search.clone());

    let request = EditRequest::new(OUTLINE, "add recent releases").with_search("rust async");
    let job = assert_ok!(orchestrator.edit(request).await);

    assert_eq!(search.queries(), vec!["rust async add recent releases".to_string()]);

    let calls = model.calls_of(PromptKind::EditWithSearch);
    assert_eq!(calls.len(), 1);
    assert!(calls[0].body.contains("Tokio 1.40 was released."));
    assert_eq!(job.final_outline(), Some("Edited Outline\n- changed\n- kept"));
}

#[tokio::test]
async fn test_empty_edit_request_is_rejected() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)));
    let orchestrator = orchestrator(model.clone(), settings(1000, 4));

    let err = assert_err!(orchestrator.edit(EditRequest::new(OUTLINE, " ")).await);

    assert_eq!(err.kind(), "input_error");
    assert_eq!(err.stage(), Some(Stage::Editing));
    assert!(model.calls().is_empty());
}

#[tokio::test]
async fn test_mid_stream_failure_ends_with_error() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)).failing_stream_after(1));
    let orchestrator = orchestrator(model, settings(1000, 4));

    let events: Vec<StreamEvent> = orchestrator
        .edit_stream(EditRequest::new(OUTLINE, "reorder branches"))
        .await
        .collect()
        .await;

    assert_eq!(events.len(), 3);
    assert_eq!(events[0], StreamEvent::fragment("Edited Outline\n"));
    match &events[1] {
        StreamEvent::Error { kind, message } => {
            assert_eq!(kind, "generation_error");
            assert!(message.contains("connection dropped"));
        }
        other => panic!("expected error event, got {:?}", other),
    }
    assert_eq!(events[2], StreamEvent::End);
}

#[tokio::test]
async fn test_collected_edit_fails_on_broken_stream() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)).failing_stream_after(1));
    let orchestrator = orchestrator(model, settings(1000, 4));

    let err = assert_err!(
        orchestrator
            .edit(EditRequest::new(OUTLINE, "reorder branches"))
            .await
    );
    assert_eq!(err.kind(), "generation_error");
    assert_eq!(err.stage(), Some(Stage::Editing));
}

#[tokio::test]
async fn test_edit_job_derives_a_new_job() {
    let model = Arc::new(ScriptedModel::new(happy_responder(1)));
    let orchestrator = orchestrator(model.clone(), settings(1000, 4));
    let history = vec![ChatTurn::user("make it about rust")];

    let parent = assert_ok!(
        orchestrator
            .run(JobRequest::text("short document", "summarize").with_history(history.clone()))
            .await
    );
    let child = assert_ok!(orchestrator.edit_job(&parent, "add a branch on pinning").await);

    assert_ne!(child.id, parent.id);
    assert_eq!(child.derived_from, Some(parent.id));
    assert_eq!(child.input_text, "Direct Outline\n- main point\n  - detail");
    assert_eq!(child.final_outline(), Some("Edited Outline\n- changed\n- kept"));
    assert_eq!(child.conversation_history, history);

    // The parent is untouched
    assert_eq!(parent.final_outline(), Some("Direct Outline\n- main point\n  - detail"));

    let edit = &model.calls_of(PromptKind::Edit)[0];
    assert!(edit.body.contains("Direct Outline\n- main point\n  - detail"));
    assert_eq!(edit.history, history);
}
