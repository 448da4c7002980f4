//! Streaming outline edits.
//!
//! An edit is always streamed: the fragments are the new outline. In
//! search mode the query is the original requirement followed by the edit
//! request, and the search results are handed to the model as context.

use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;

use crate::adapters::SearchClient;
use crate::domain::{ChatTurn, DocumentJob, FragmentStream, Stage};
use crate::error::WorkflowError;

use super::generator::OutlineGenerator;
use super::prompts::{search_query, OutlineRequest};

/// A request to change an existing outline
#[derive(Debug, Clone)]
pub struct EditRequest {
    pub current_outline: String,
    pub edit_request: String,

    /// Use web search results as context
    pub search: bool,

    /// Requirement the outline was first generated for; needed for search
    pub original_requirement: Option<String>,

    pub history: Vec<ChatTurn>,

    /// Job that produced `current_outline`, if known
    pub derived_from: Option<Uuid>,
}

impl EditRequest {
    pub fn new(current_outline: impl Into<String>, edit_request: impl Into<String>) -> Self {
        Self {
            current_outline: current_outline.into(),
            edit_request: edit_request.into(),
            search: false,
            original_requirement: None,
            history: Vec::new(),
            derived_from: None,
        }
    }

    /// Edit the final outline of a completed job
    pub fn for_job(job: &DocumentJob, edit_request: impl Into<String>) -> Self {
        Self {
            current_outline: job.final_outline().unwrap_or_default().to_string(),
            edit_request: edit_request.into(),
            search: job.search_enabled,
            original_requirement: Some(job.user_requirement.clone()),
            history: job.conversation_history.clone(),
            derived_from: Some(job.id),
        }
    }

    pub fn with_search(mut self, original_requirement: impl Into<String>) -> Self {
        self.search = true;
        self.original_requirement = Some(original_requirement.into());
        self
    }

    pub fn with_history(mut self, history: Vec<ChatTurn>) -> Self {
        self.history = history;
        self
    }
}

/// Applies edit requests to outlines
pub struct EditEngine {
    generator: Arc<OutlineGenerator>,
    search: Option<Arc<dyn SearchClient>>,
    history_window: usize,
}

impl EditEngine {
    pub fn new(
        generator: Arc<OutlineGenerator>,
        search: Option<Arc<dyn SearchClient>>,
        history_window: usize,
    ) -> Self {
        Self {
            generator,
            search,
            history_window,
        }
    }

    /// Caller contract checks; runs before any network call
    pub fn validate(&self, request: &EditRequest) -> Result<(), WorkflowError> {
        if request.edit_request.trim().is_empty() {
            return Err(WorkflowError::input(Stage::Editing, "edit request is required"));
        }
        if request.current_outline.trim().is_empty() {
            return Err(WorkflowError::input(Stage::Editing, "current outline is required"));
        }
        if request.search {
            let has_requirement = request
                .original_requirement
                .as_deref()
                .is_some_and(|r| !r.trim().is_empty());
            if !has_requirement {
                return Err(WorkflowError::input(
                    Stage::Editing,
                    "original requirement is required for search-assisted edits",
                ));
            }
            if self.search.is_none() {
                return Err(WorkflowError::input(
                    Stage::Editing,
                    "search-assisted edit requested but no search client is configured",
                ));
            }
        }
        Ok(())
    }

    /// Start streaming the edited outline
    #[instrument(skip_all, fields(search = request.search))]
    pub async fn edit(&self, request: &EditRequest) -> Result<FragmentStream, WorkflowError> {
        self.validate(request)?;

        let context = match (&self.search, request.search) {
            (Some(search), true) => {
                let original = request.original_requirement.as_deref().unwrap_or_default();
                let query = search_query(
                    &format!("{} {}", original.trim(), request.edit_request.trim()),
                    &request.history,
                    self.history_window,
                );
                let context = search.search(&query).await.map_err(|e| WorkflowError::Search {
                    stage: Stage::Editing,
                    cause: format!("{:#}", e),
                })?;
                info!(search = search.name(), chars = context.len(), "Search context ready");
                Some(context)
            }
            _ => None,
        };

        let outline_request = match &context {
            Some(context) => OutlineRequest::EditWithSearch {
                outline: &request.current_outline,
                edit_request: &request.edit_request,
                context,
            },
            None => OutlineRequest::Edit {
                outline: &request.current_outline,
                edit_request: &request.edit_request,
            },
        };

        self.generator
            .generate_stream(&outline_request, &request.history)
            .await
            .map_err(|failure| WorkflowError::generation(Stage::Editing, failure))
    }
}
