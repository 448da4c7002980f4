//! Scripted collaborators shared by the integration tests.
//!
//! Every double records what it was called with so tests can assert on
//! call counts, prompt kinds and the exact history each call received.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use mindmark::adapters::{
    ModelClient, Prompt, PromptKind, SearchClient, TextStream, Transcriber,
};
use mindmark::config::WorkflowSettings;
use mindmark::core::{Orchestrator, RetryPolicy};
use mindmark::domain::AudioInput;

type Responder = Box<dyn Fn(&Prompt) -> Result<String, String> + Send + Sync>;
type Delay = Box<dyn Fn(&Prompt) -> Duration + Send + Sync>;

/// Model double driven by a response function
pub struct ScriptedModel {
    responder: Responder,
    delay: Delay,
    fail_stream_after: Option<usize>,
    calls: Mutex<Vec<Prompt>>,
    completed: Mutex<Vec<Prompt>>,
    chunks_in_flight: AtomicUsize,
    max_chunks_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(
        responder: impl Fn(&Prompt) -> Result<String, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            delay: Box::new(|_| Duration::ZERO),
            fail_stream_after: None,
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            chunks_in_flight: AtomicUsize::new(0),
            max_chunks_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: impl Fn(&Prompt) -> Duration + Send + Sync + 'static) -> Self {
        self.delay = Box::new(delay);
        self
    }

    /// Streams yield this many fragments, then an error
    pub fn failing_stream_after(mut self, fragments: usize) -> Self {
        self.fail_stream_after = Some(fragments);
        self
    }

    pub fn calls(&self) -> Vec<Prompt> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_of(&self, kind: PromptKind) -> Vec<Prompt> {
        self.calls().into_iter().filter(|p| p.kind == kind).collect()
    }

    pub fn count(&self, kind: PromptKind) -> usize {
        self.calls_of(kind).len()
    }

    /// Prompts in the order their calls finished
    pub fn completed(&self) -> Vec<Prompt> {
        self.completed.lock().unwrap().clone()
    }

    /// Highest number of chunk outline calls running at once
    pub fn max_chunks_in_flight(&self) -> usize {
        self.max_chunks_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, prompt: &Prompt) {
        self.calls.lock().unwrap().push(prompt.clone());
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        self.record(prompt);

        let is_chunk = prompt.kind == PromptKind::Outline;
        if is_chunk {
            let now = self.chunks_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_chunks_in_flight.fetch_max(now, Ordering::SeqCst);
        }

        tokio::time::sleep((self.delay)(prompt)).await;

        if is_chunk {
            self.chunks_in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        self.completed.lock().unwrap().push(prompt.clone());

        (self.responder)(prompt).map_err(|e| anyhow::anyhow!(e))
    }

    async fn complete_stream(&self, prompt: &Prompt) -> Result<TextStream> {
        self.record(prompt);
        let text = (self.responder)(prompt).map_err(|e| anyhow::anyhow!(e))?;

        // One fragment per line, with an empty fragment after the first
        let mut fragments: Vec<Result<String>> = Vec::new();
        for (i, line) in text.split_inclusive('\n').enumerate() {
            if self.fail_stream_after == Some(i) {
                fragments.push(Err(anyhow::anyhow!("connection dropped")));
                break;
            }
            fragments.push(Ok(line.to_string()));
            if i == 0 {
                fragments.push(Ok(String::new()));
            }
        }
        Ok(stream::iter(fragments).boxed())
    }
}

/// Search double returning a fixed context
pub struct RecordingSearch {
    result: Result<String, String>,
    queries: Mutex<Vec<String>>,
}

impl RecordingSearch {
    pub fn returning(context: &str) -> Self {
        Self {
            result: Ok(context.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            result: Err(cause.to_string()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl SearchClient for RecordingSearch {
    fn name(&self) -> &str {
        "recording"
    }

    async fn search(&self, query: &str) -> Result<String> {
        self.queries.lock().unwrap().push(query.to_string());
        self.result.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

/// Transcriber double returning a fixed transcript
pub struct FixedTranscriber {
    result: Result<String, String>,
    calls: AtomicUsize,
}

impl FixedTranscriber {
    pub fn returning(transcript: &str) -> Self {
        Self {
            result: Ok(transcript.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(cause: &str) -> Self {
        Self {
            result: Err(cause.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for FixedTranscriber {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn transcribe(&self, _audio: &AudioInput) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(|e| anyhow::anyhow!(e))
    }
}

/// Document made of `parts` sections tagged `[part N]`, padded to at
/// least `min_chars` characters
pub fn tagged_document(parts: usize, min_chars: usize) -> String {
    let per_part = min_chars / parts.max(1) + 1;
    (0..parts)
        .map(|i| {
            let tag = format!("[part {}] ", i);
            let filler = "x".repeat(per_part.saturating_sub(tag.len()));
            format!("{}{}", tag, filler)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Index from the first `[part N]` tag in a prompt body
pub fn part_index(body: &str) -> Option<usize> {
    let start = body.find("[part ")? + "[part ".len();
    let end = start + body[start..].find(']')?;
    body[start..end].parse().ok()
}

/// The chunk texts `tagged_document` would be split into
pub fn split_response(parts: usize) -> String {
    let chunks: Vec<String> = (0..parts).map(|i| format!("[part {}] section text", i)).collect();
    serde_json::to_string(&chunks).unwrap()
}

/// Outline a scripted model returns for chunk `i`
pub fn chunk_outline(i: usize) -> String {
    format!("Part {}\n- point {}", i, i)
}

/// A responder covering every prompt kind with well-formed answers
pub fn happy_responder(parts: usize) -> impl Fn(&Prompt) -> Result<String, String> + Send + Sync {
    move |prompt: &Prompt| match prompt.kind {
        PromptKind::SplitDocument => Ok(split_response(parts)),
        PromptKind::GlobalTitle => Ok("Global Title".to_string()),
        PromptKind::Outline => match part_index(&prompt.body) {
            Some(i) => Ok(chunk_outline(i)),
            None => Ok("Direct Outline\n- main point\n  - detail".to_string()),
        },
        PromptKind::MergeOutlines => Ok("Global Title\n- merged\n  - everything".to_string()),
        PromptKind::OutlineFromAudio => Ok("Audio Outline\n- spoken point".to_string()),
        PromptKind::OutlineWithSearch => Ok("Search Outline\n- found fact".to_string()),
        PromptKind::OutlineWithoutDocument => Ok("Bare Outline\n- idea".to_string()),
        PromptKind::Edit | PromptKind::EditWithSearch => {
            Ok("Edited Outline\n- changed\n- kept".to_string())
        }
    }
}

pub fn settings(split_threshold: usize, max_workers: usize) -> WorkflowSettings {
    WorkflowSettings {
        split_threshold,
        max_workers,
        ..Default::default()
    }
}

/// Orchestrator over a scripted model, retrying immediately
pub fn orchestrator(model: Arc<ScriptedModel>, settings: WorkflowSettings) -> Orchestrator {
    Orchestrator::new(model, Duration::from_secs(5), settings)
        .with_retry(RetryPolicy::immediate(3))
}
