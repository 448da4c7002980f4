//! Domain types for the outline workflow.
//!
//! - Job: the document job, its request, status and stages
//! - Events: in-memory job event trail
//! - Stream: the caller-facing streaming contract
//! - Artifact: rendered outlines

pub mod artifact;
pub mod events;
pub mod job;
pub mod stream;

// Re-export commonly used types
pub use artifact::{RenderFormat, RenderedArtifact};
pub use events::{EventType, JobEvent};
pub use job::{
    fingerprint, AudioInput, ChatTurn, DocumentJob, JobRequest, JobSource, JobStatus, Stage,
};
pub use stream::{
    collect_events, complete_events, error_events, into_events, EventStream, FragmentStream,
    StreamEvent,
};
