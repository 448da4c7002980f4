//! Core workflow logic.
//!
//! This module contains:
//! - Orchestrator: the workflow state machine
//! - Chunking: split decision and chunk-list parsing
//! - Fanout: the bounded chunk pool
//! - Merge: model merge with structural fallback
//! - Edit: streaming outline edits
//! - Generator / Prompts: the single model-call primitive
//! - Outline: validation, fence stripping, rendering
//! - Safety / Retry: input limits and retry policy

pub mod chunking;
pub mod edit;
pub mod fanout;
pub mod generator;
pub mod merge;
pub mod orchestrator;
pub mod outline;
pub mod prompts;
pub mod retry;
pub mod safety;

// Re-export commonly used types
pub use chunking::{decide_split, parse_chunk_list, split_document, ListParseError};
pub use edit::{EditEngine, EditRequest};
pub use fanout::{process_sequential, ChunkOutcome, ChunkPool, PoolError, CHUNK_ERROR_PREFIX};
pub use generator::OutlineGenerator;
pub use merge::{merge, MergeMethod, Merged};
pub use orchestrator::Orchestrator;
pub use outline::{
    has_hierarchy, render_outline, strip_code_fences, structural_merge, validate_outline,
    OutlineIssue,
};
pub use prompts::{search_query, OutlineRequest};
pub use retry::RetryPolicy;
pub use safety::{InputLimits, InputViolation};
