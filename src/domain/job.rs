//! Document jobs and the requests that create them.
//!
//! A `DocumentJob` is created per request, moves forward through the
//! workflow stages, and is dropped once its outline (or error) has been
//! handed back. Edits create a new job derived from the old one.

use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::events::{EventType, JobEvent};
use crate::error::WorkflowError;

/// One prior conversation turn, forwarded untouched to every model call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new("assistant", content)
    }
}

/// Uploaded audio awaiting transcription
#[derive(Debug, Clone)]
pub struct AudioInput {
    /// Original file name (used for the extension)
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl AudioInput {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
        }
    }

    /// Lowercased file extension, if any
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.file_name)
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
    }
}

/// Source material submitted with a request
#[derive(Debug, Clone)]
pub enum JobSource {
    /// Raw document text
    Text(String),

    /// Audio to transcribe before generation
    Audio(AudioInput),

    /// No document; generate from the requirement alone
    RequirementOnly,
}

/// A request to produce an outline
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub source: JobSource,
    pub requirement: String,
    pub history: Vec<ChatTurn>,
    pub search: bool,
}

impl JobRequest {
    pub fn text(text: impl Into<String>, requirement: impl Into<String>) -> Self {
        Self::new(JobSource::Text(text.into()), requirement)
    }

    pub fn audio(audio: AudioInput, requirement: impl Into<String>) -> Self {
        Self::new(JobSource::Audio(audio), requirement)
    }

    pub fn requirement_only(requirement: impl Into<String>) -> Self {
        Self::new(JobSource::RequirementOnly, requirement)
    }

    fn new(source: JobSource, requirement: impl Into<String>) -> Self {
        Self {
            source,
            requirement: requirement.into(),
            history: Vec::new(),
            search: false,
        }
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn with_search(mut self, search: bool) -> Self {
        self.search = search;
        self
    }
}

/// Coarse job status. Only moves forward, except the bounded
/// generation retry which re-enters `Generating`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Chunking,
    Generating,
    Merging,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Completed | JobStatus::Failed, _) => false,
            (_, JobStatus::Failed) => true,
            (JobStatus::Generating, JobStatus::Generating) => true,
            (from, to) => to > from,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Node of the workflow state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Start,
    Validating,
    Transcribing,
    DecidingSplit,
    GeneratingDirect,
    GeneratingWithSearch,
    GeneratingFromAudio,
    Splitting,
    GeneratingGlobalTitle,
    ProcessingChunks,
    Merging,
    Editing,
    Rendering,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Start => "start",
            Stage::Validating => "validating",
            Stage::Transcribing => "transcribing",
            Stage::DecidingSplit => "deciding_split",
            Stage::GeneratingDirect => "generating_direct",
            Stage::GeneratingWithSearch => "generating_with_search",
            Stage::GeneratingFromAudio => "generating_from_audio",
            Stage::Splitting => "splitting",
            Stage::GeneratingGlobalTitle => "generating_global_title",
            Stage::ProcessingChunks => "processing_chunks",
            Stage::Merging => "merging",
            Stage::Editing => "editing",
            Stage::Rendering => "rendering",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of work flowing through the workflow
#[derive(Debug, Clone, Serialize)]
pub struct DocumentJob {
    pub id: Uuid,

    /// Source text (transcript for audio jobs); empty without a document
    pub input_text: String,

    pub user_requirement: String,

    /// Prior turns, most recent last
    pub conversation_history: Vec<ChatTurn>,

    pub search_enabled: bool,
    pub audio_sourced: bool,

    /// Set once by the chunk heuristic
    needs_split: Option<bool>,

    /// Chunks in document order (split path only)
    pub chunks: Vec<String>,

    /// One outline per chunk, same order as `chunks`
    pub chunk_outlines: Vec<String>,

    pub global_title: String,

    final_outline: Option<String>,

    status: JobStatus,

    /// Current state machine node
    pub stage: Stage,

    /// Job this one was derived from (edits)
    pub derived_from: Option<Uuid>,

    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    pub events: Vec<JobEvent>,
}

impl DocumentJob {
    pub fn new(requirement: impl Into<String>, history: Vec<ChatTurn>) -> Self {
        let id = Uuid::new_v4();
        let mut job = Self {
            id,
            input_text: String::new(),
            user_requirement: requirement.into(),
            conversation_history: history,
            search_enabled: false,
            audio_sourced: false,
            needs_split: None,
            chunks: Vec::new(),
            chunk_outlines: Vec::new(),
            global_title: String::new(),
            final_outline: None,
            status: JobStatus::Pending,
            stage: Stage::Start,
            derived_from: None,
            started_at: Utc::now(),
            completed_at: None,
            events: Vec::new(),
        };
        let summary = format!(
            "Job started (requirement {})",
            fingerprint(&job.user_requirement)
        );
        job.record(JobEvent::new(id, None, EventType::JobStarted, summary));
        job
    }

    /// Start a new job whose input is this job's final outline
    pub fn derive(&self, requirement: impl Into<String>, history: Vec<ChatTurn>) -> Self {
        let mut job = Self::new(requirement, history);
        job.input_text = self.final_outline.clone().unwrap_or_default();
        job.derived_from = Some(self.id);
        job
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    /// `None` until the chunk heuristic has run
    pub fn needs_split(&self) -> Option<bool> {
        self.needs_split
    }

    pub fn final_outline(&self) -> Option<&str> {
        self.final_outline.as_deref()
    }

    /// Record the split decision. It may only be made once.
    pub fn decide_split(&mut self, needs_split: bool) -> Result<(), WorkflowError> {
        if let Some(existing) = self.needs_split {
            if existing != needs_split {
                return Err(WorkflowError::input(
                    Stage::DecidingSplit,
                    "split decision already made for this job",
                ));
            }
        }
        self.needs_split = Some(needs_split);
        Ok(())
    }

    /// Move to a new status, rejecting backward transitions
    pub fn transition(&mut self, to: JobStatus) -> Result<(), WorkflowError> {
        if !self.status.can_transition_to(to) {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Enter a workflow stage and log it
    pub fn enter(&mut self, stage: Stage) {
        self.stage = stage;
        self.record(JobEvent::new(
            self.id,
            Some(stage),
            EventType::StageStarted,
            format!("Entered {}", stage),
        ));
    }

    /// Mark the current stage done
    pub fn complete_stage(&mut self, duration_ms: u64) {
        self.complete_stage_of(self.stage, duration_ms);
    }

    /// Mark a stage done that ran alongside the current one
    pub fn complete_stage_of(&mut self, stage: Stage, duration_ms: u64) {
        self.record(
            JobEvent::new(
                self.id,
                Some(stage),
                EventType::StageCompleted,
                format!("Completed {} in {}ms", stage, duration_ms),
            )
            .with_duration(duration_ms),
        );
    }

    /// Set the final outline. Write-once.
    pub fn finish(&mut self, outline: String) -> Result<(), WorkflowError> {
        if self.final_outline.is_some() {
            return Err(WorkflowError::InvalidTransition {
                from: self.status,
                to: JobStatus::Completed,
            });
        }
        self.transition(JobStatus::Completed)?;
        self.final_outline = Some(outline);
        self.stage = Stage::Done;
        self.completed_at = Some(Utc::now());
        let summary = format!("Job completed from {:?}", self.last_producing_stage());
        self.record(JobEvent::new(self.id, None, EventType::JobCompleted, summary));
        Ok(())
    }

    /// Mark the job failed with the error that ended it
    pub fn fail(&mut self, error: &WorkflowError) {
        if self.status.is_terminal() {
            return;
        }
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.record(
            JobEvent::new(
                self.id,
                error.stage(),
                EventType::JobFailed,
                format!("Job failed ({})", error.kind()),
            )
            .with_error(error.to_string()),
        );
    }

    pub fn record(&mut self, event: JobEvent) {
        self.events.push(event);
    }

    /// Events of a given type, in order
    pub fn events_of(&self, event_type: EventType) -> impl Iterator<Item = &JobEvent> {
        self.events
            .iter()
            .filter(move |e| e.event_type == event_type)
    }

    /// Whether any event was recorded for a stage
    pub fn visited(&self, stage: Stage) -> bool {
        self.events.iter().any(|e| {
            e.stage == Some(stage) && e.event_type == EventType::StageStarted
        })
    }

    fn last_producing_stage(&self) -> Option<Stage> {
        self.events
            .iter()
            .rev()
            .filter(|e| e.event_type == EventType::StageStarted)
            .find_map(|e| e.stage)
    }
}

/// Short content fingerprint for logs (first 16 hex chars of SHA-256)
pub fn fingerprint(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_only_moves_forward() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Chunking));
        assert!(JobStatus::Chunking.can_transition_to(JobStatus::Generating));
        assert!(JobStatus::Generating.can_transition_to(JobStatus::Generating));
        assert!(JobStatus::Merging.can_transition_to(JobStatus::Failed));

        assert!(!JobStatus::Merging.can_transition_to(JobStatus::Chunking));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Failed.can_transition_to(JobStatus::Generating));
    }

    #[test]
    fn test_final_outline_is_write_once() {
        let mut job = DocumentJob::new("summarize", Vec::new());
        job.transition(JobStatus::Generating).unwrap();
        job.finish("Title\n- A".to_string()).unwrap();

        assert_eq!(job.final_outline(), Some("Title\n- A"));
        assert_eq!(job.status(), JobStatus::Completed);
        assert!(job.finish("Other".to_string()).is_err());
        assert_eq!(job.final_outline(), Some("Title\n- A"));
    }

    #[test]
    fn test_split_decision_is_made_once() {
        let mut job = DocumentJob::new("summarize", Vec::new());
        assert_eq!(job.needs_split(), None);
        job.decide_split(true).unwrap();
        assert!(job.decide_split(false).is_err());
        assert_eq!(job.needs_split(), Some(true));
    }

    #[test]
    fn test_derived_job_starts_from_parent_outline() {
        let mut parent = DocumentJob::new("summarize", Vec::new());
        parent.transition(JobStatus::Generating).unwrap();
        parent.finish("Root\n- Branch".to_string()).unwrap();

        let child = parent.derive("add a branch", vec![ChatTurn::user("hi")]);
        assert_eq!(child.derived_from, Some(parent.id));
        assert_eq!(child.input_text, "Root\n- Branch");
        assert_eq!(child.status(), JobStatus::Pending);
        assert!(child.final_outline().is_none());
    }

    #[test]
    fn test_fail_records_stage_and_kind() {
        let mut job = DocumentJob::new("summarize", Vec::new());
        let err = WorkflowError::Transcription {
            stage: Stage::Transcribing,
            cause: "empty transcript".to_string(),
        };
        job.fail(&err);

        assert_eq!(job.status(), JobStatus::Failed);
        let failed: Vec<_> = job.events_of(EventType::JobFailed).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].stage, Some(Stage::Transcribing));
        assert!(failed[0].summary.contains("transcription_error"));
    }

    #[test]
    fn test_audio_extension() {
        let audio = AudioInput::new("Memo.M4A", vec![1, 2, 3]);
        assert_eq!(audio.extension().as_deref(), Some("m4a"));
        assert_eq!(AudioInput::new("noext", vec![]).extension(), None);
    }

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint("abc"), fingerprint("abc"));
        assert_eq!(fingerprint("abc").len(), 16);
        assert_ne!(fingerprint("abc"), fingerprint("abd"));
    }
}
