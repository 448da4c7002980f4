//! Job events: an in-memory, append-only trail of what a job did.
//!
//! Events are never persisted. They exist so callers (and tests) can see
//! which stages ran, which chunks degraded, and why a job failed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::Stage;

/// A single entry in a job's event trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Unique identifier for this event
    pub id: Uuid,

    /// When this event occurred
    pub timestamp: DateTime<Utc>,

    /// The job this event belongs to
    pub job_id: Uuid,

    /// Workflow stage, if the event is stage-scoped
    pub stage: Option<Stage>,

    /// Type of event
    pub event_type: EventType,

    /// Human-readable summary (never raw document content)
    pub summary: String,

    /// Time taken in milliseconds (for completed stages)
    pub duration_ms: Option<u64>,

    /// Error message if something failed
    pub error: Option<String>,
}

impl JobEvent {
    /// Create a new event with the current timestamp
    pub fn new(
        job_id: Uuid,
        stage: Option<Stage>,
        event_type: EventType,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            job_id,
            stage,
            event_type,
            summary: summary.into(),
            duration_ms: None,
            error: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Types of events recorded during a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    JobStarted,
    StageStarted,
    StageCompleted,

    /// A model call is being retried after failure or a weak outline
    StageRetrying,

    /// One chunk failed; a placeholder was recorded at its position
    ChunkFailed,

    /// The worker pool failed and chunks were processed sequentially
    SequentialFallback,

    /// The model merge was rejected; the structural merge was used
    MergeFallback,

    /// Title generation failed; the title was derived from the requirement
    TitleFallback,

    JobCompleted,
    JobFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::new(
            Uuid::new_v4(),
            Some(Stage::Merging),
            EventType::MergeFallback,
            "Merge response had 1 line",
        );

        let json = serde_json::to_string(&event).unwrap();
        let parsed: JobEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.event_type, EventType::MergeFallback);
        assert_eq!(parsed.stage, Some(Stage::Merging));
        assert!(json.contains("\"merge_fallback\""));
    }

    #[test]
    fn test_event_builders() {
        let event = JobEvent::new(
            Uuid::new_v4(),
            Some(Stage::ProcessingChunks),
            EventType::ChunkFailed,
            "Chunk 3 failed",
        )
        .with_duration(1500)
        .with_error("Connection timeout");

        assert_eq!(event.duration_ms, Some(1500));
        assert_eq!(event.error.as_deref(), Some("Connection timeout"));
    }
}
