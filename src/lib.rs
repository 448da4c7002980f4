//! mindmark - LLM-driven XMindMark outline generator
//!
//! Turns long documents, audio recordings or a bare request into a
//! mind-map outline by calling a chat model, optionally with web search
//! results, and renders outlines to SVG or XMind files.
//!
//! # Architecture
//!
//! The workflow is a small state machine:
//! - Short inputs are outlined with a single model call
//! - Long inputs are split into chunks by the model, outlined in parallel
//!   on a bounded pool, and merged under a generated title
//! - Failed chunks degrade to inline placeholders; a rejected merge falls
//!   back to a deterministic structural merge
//! - Edits are always streamed
//!
//! # Modules
//!
//! - `adapters`: External systems (chat model, search, whisper, xmindmark)
//! - `core`: Workflow logic (Orchestrator, chunking, fan-out, merge, edit)
//! - `domain`: Data structures (DocumentJob, JobEvent, StreamEvent)
//! - `ingest`: Document and audio loading
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Outline a document
//! mindmark generate -r "key ideas" -i paper.pdf
//!
//! # Outline from web search, streamed
//! mindmark generate -r "rust async runtimes" --search --stream
//!
//! # Edit an outline
//! mindmark edit --outline outline.txt --request "add a branch on pinning"
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod ingest;

// Re-export main types at crate root for convenience
pub use core::{EditRequest, Orchestrator, OutlineGenerator};
pub use domain::{
    ChatTurn, DocumentJob, EventType, JobEvent, JobRequest, JobStatus, Stage, StreamEvent,
};
pub use error::{GenerationFailure, WorkflowError};
