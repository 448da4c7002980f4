//! Workflow state machine.
//!
//! One parameterized pipeline drives every job:
//!
//! ```text
//! start -> validating -> (transcribing) -> deciding_split
//!   -> generating_direct | generating_with_search | generating_from_audio
//!   -> splitting -> (generating_global_title || processing_chunks) -> merging
//! -> done
//! ```
//!
//! The orchestrator owns the model client, the chunk pool and the optional
//! search and transcription collaborators for its whole lifetime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use futures::stream::{self, StreamExt};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::adapters::{
    ModelClient, OpenAiClient, SearchClient, TavilyClient, Transcriber, WhisperTranscriber,
};
use crate::config::{ResolvedConfig, WorkflowSettings};
use crate::domain::{
    complete_events, error_events, into_events, AudioInput, DocumentJob, EventStream, EventType,
    FragmentStream, JobEvent, JobRequest, JobSource, JobStatus, Stage,
};
use crate::error::WorkflowError;

use super::chunking::{decide_split, split_document};
use super::edit::{EditEngine, EditRequest};
use super::fanout::{process_sequential, ChunkOutcome, ChunkPool};
use super::generator::OutlineGenerator;
use super::merge::{merge, MergeMethod};
use super::outline::{strip_code_fences, validate_outline};
use super::prompts::{search_query, OutlineRequest};
use super::retry::RetryPolicy;
use super::safety::InputLimits;

/// Longest title derived from the requirement when title generation fails
const FALLBACK_TITLE_CHARS: usize = 80;

/// Main workflow orchestrator
pub struct Orchestrator {
    generator: Arc<OutlineGenerator>,
    pool: ChunkPool,
    search: Option<Arc<dyn SearchClient>>,
    transcriber: Option<Arc<dyn Transcriber>>,
    editor: EditEngine,
    settings: WorkflowSettings,
    retry: RetryPolicy,
    limits: InputLimits,
}

impl Orchestrator {
    /// Create an orchestrator around a model client
    pub fn new(
        model: Arc<dyn ModelClient>,
        call_timeout: Duration,
        settings: WorkflowSettings,
    ) -> Self {
        let generator = Arc::new(OutlineGenerator::new(model, call_timeout));
        let editor = EditEngine::new(Arc::clone(&generator), None, settings.history_window);
        Self {
            generator,
            pool: ChunkPool::new(settings.max_workers),
            search: None,
            transcriber: None,
            editor,
            settings,
            retry: RetryPolicy::default(),
            limits: InputLimits::default(),
        }
    }

    /// Build the orchestrator and its adapters from configuration
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let model = Arc::new(OpenAiClient::new(config.llm.clone())?);

        let mut orchestrator = Self::new(model, config.llm.timeout(), config.workflow.clone())
            .with_retry(config.retry.clone())
            .with_limits(InputLimits::from_settings(
                &config.workflow,
                &config.transcription,
            ))
            .with_transcriber(Arc::new(WhisperTranscriber::new(
                config.transcription.clone(),
            )));

        match TavilyClient::from_settings(&config.search)? {
            Some(client) => orchestrator = orchestrator.with_search(Arc::new(client)),
            None => debug!(
                env = %config.search.api_key_env,
                "Search API key not set, web search disabled"
            ),
        }

        Ok(orchestrator)
    }

    pub fn with_search(mut self, search: Arc<dyn SearchClient>) -> Self {
        self.editor = EditEngine::new(
            Arc::clone(&self.generator),
            Some(Arc::clone(&search)),
            self.settings.history_window,
        );
        self.search = Some(search);
        self
    }

    pub fn with_transcriber(mut self, transcriber: Arc<dyn Transcriber>) -> Self {
        self.transcriber = Some(transcriber);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_limits(mut self, limits: InputLimits) -> Self {
        self.limits = limits;
        self
    }

    /// The shared chunk pool
    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// Run a job to completion
    pub async fn run(&self, request: JobRequest) -> Result<DocumentJob, WorkflowError> {
        self.run_with_cancel(request, &CancellationToken::new()).await
    }

    /// Run a job; once `cancel` fires no further chunk tasks are started
    #[instrument(skip_all, fields(search = request.search))]
    pub async fn run_with_cancel(
        &self,
        request: JobRequest,
        cancel: &CancellationToken,
    ) -> Result<DocumentJob, WorkflowError> {
        let (mut job, source) = start_job(request);
        info!(job_id = %job.id, "Starting outline job");

        let result = self.execute(&mut job, source, cancel).await;
        settle(&mut job, result)?;
        Ok(job)
    }

    /// Run a job as a stream of events.
    ///
    /// Direct paths stream model fragments as they arrive; the split path
    /// emits its merged outline as a single fragment.
    pub async fn run_stream(&self, request: JobRequest) -> EventStream {
        self.run_stream_tracked(request).await.0
    }

    /// Like `run_stream`, also handing back the job once it has settled.
    /// On the direct path that happens when the fragments run out.
    #[instrument(skip_all, fields(search = request.search))]
    pub async fn run_stream_tracked(
        &self,
        request: JobRequest,
    ) -> (EventStream, oneshot::Receiver<DocumentJob>) {
        let (done, settled) = oneshot::channel();
        let (mut job, source) = start_job(request);
        info!(job_id = %job.id, "Starting streamed outline job");

        let events = match self.start_stream(&mut job, source).await {
            StreamStart::Settled(events) => {
                let _ = done.send(job);
                events
            }
            StreamStart::Fragments(fragments, stage) => {
                into_events(settle_on_end(fragments, job, stage, done), stage)
            }
        };
        (events, settled)
    }

    async fn start_stream(&self, job: &mut DocumentJob, source: JobSource) -> StreamStart {
        if let Err(e) = self.prepare(job, source).await {
            return StreamStart::Settled(stream_failure(job, e));
        }

        let needs_split = match self.decide(job) {
            Ok(needs_split) => needs_split,
            Err(e) => return StreamStart::Settled(stream_failure(job, e)),
        };

        if needs_split {
            let result = self.run_split(job, &CancellationToken::new()).await;
            let events = match settle(job, result) {
                Ok(()) => complete_events(job.final_outline().unwrap_or_default().to_string()),
                Err(e) => error_events(&e),
            };
            return StreamStart::Settled(events);
        }

        let stage = direct_stage(job);
        job.enter(stage);
        if let Err(e) = job.transition(JobStatus::Generating) {
            return StreamStart::Settled(stream_failure(job, e));
        }

        let context = match self.search_context(job).await {
            Ok(context) => context,
            Err(e) => return StreamStart::Settled(stream_failure(job, e)),
        };
        let request = direct_request(job, context.as_deref());
        let started = self
            .generator
            .generate_stream(&request, &job.conversation_history)
            .await;

        match started {
            Ok(fragments) => StreamStart::Fragments(fragments, stage),
            Err(failure) => StreamStart::Settled(stream_failure(
                job,
                WorkflowError::generation(stage, failure),
            )),
        }
    }

    /// Stream an edit of an existing outline
    pub async fn edit_stream(&self, request: EditRequest) -> EventStream {
        match self.editor.edit(&request).await {
            Ok(fragments) => into_events(fragments, Stage::Editing),
            Err(e) => {
                error!(kind = e.kind(), error = %e, "Edit failed");
                error_events(&e)
            }
        }
    }

    /// Apply an edit and collect it into a new job
    #[instrument(skip_all, fields(search = request.search))]
    pub async fn edit(&self, request: EditRequest) -> Result<DocumentJob, WorkflowError> {
        let mut job = DocumentJob::new(request.edit_request.clone(), request.history.clone());
        job.input_text = request.current_outline.clone();
        job.derived_from = request.derived_from;
        job.search_enabled = request.search;

        let result = self.collect_edit(&mut job, &request).await;
        settle(&mut job, result)?;
        Ok(job)
    }

    /// Edit a completed job's outline, producing a derived job
    pub async fn edit_job(
        &self,
        parent: &DocumentJob,
        edit_request: &str,
    ) -> Result<DocumentJob, WorkflowError> {
        let request = EditRequest::for_job(parent, edit_request);
        let mut job = parent.derive(edit_request, request.history.clone());
        job.search_enabled = request.search;

        let result = self.collect_edit(&mut job, &request).await;
        settle(&mut job, result)?;
        Ok(job)
    }

    async fn collect_edit(
        &self,
        job: &mut DocumentJob,
        request: &EditRequest,
    ) -> Result<String, WorkflowError> {
        job.enter(Stage::Editing);
        job.transition(JobStatus::Generating)?;
        let started = Instant::now();

        let mut fragments = self.editor.edit(request).await?;
        let mut outline = String::new();
        while let Some(fragment) = fragments.next().await {
            let fragment =
                fragment.map_err(|failure| WorkflowError::generation(Stage::Editing, failure))?;
            outline.push_str(&fragment);
        }

        let outline = outline.trim().to_string();
        if outline.is_empty() {
            return Err(WorkflowError::Generation {
                stage: Stage::Editing,
                cause: "model returned an empty outline".to_string(),
            });
        }

        job.complete_stage(started.elapsed().as_millis() as u64);
        Ok(outline)
    }

    async fn execute(
        &self,
        job: &mut DocumentJob,
        source: JobSource,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        self.prepare(job, source).await?;

        if self.decide(job)? {
            self.run_split(job, cancel).await
        } else {
            self.run_direct(job).await
        }
    }

    /// Validate inputs and turn the source into `job.input_text`
    async fn prepare(&self, job: &mut DocumentJob, source: JobSource) -> Result<(), WorkflowError> {
        job.enter(Stage::Validating);

        if job.user_requirement.trim().is_empty() {
            return Err(WorkflowError::input(
                Stage::Validating,
                "user requirement is required",
            ));
        }
        if job.search_enabled && self.search.is_none() {
            return Err(WorkflowError::input(
                Stage::Validating,
                "web search requested but no search client is configured",
            ));
        }

        match source {
            JobSource::Text(text) => {
                self.limits
                    .validate_text(&text)
                    .map_err(|v| WorkflowError::input(Stage::Validating, v.to_string()))?;
                job.input_text = text;
            }
            JobSource::RequirementOnly => {}
            JobSource::Audio(audio) => {
                self.limits
                    .validate_audio(&audio)
                    .map_err(|v| WorkflowError::input(Stage::Validating, v.to_string()))?;
                job.input_text = self.transcribe(job, &audio).await?;
                job.audio_sourced = true;
            }
        }
        Ok(())
    }

    async fn transcribe(
        &self,
        job: &mut DocumentJob,
        audio: &AudioInput,
    ) -> Result<String, WorkflowError> {
        let transcriber = self.transcriber.as_ref().ok_or_else(|| {
            WorkflowError::input(
                Stage::Validating,
                "audio input requires a transcriber, none is configured",
            )
        })?;

        job.enter(Stage::Transcribing);
        let started = Instant::now();

        let transcript = transcriber
            .transcribe(audio)
            .await
            .map_err(|e| WorkflowError::Transcription {
                stage: Stage::Transcribing,
                cause: format!("{:#}", e),
            })?;

        let transcript = transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(WorkflowError::Transcription {
                stage: Stage::Transcribing,
                cause: "transcript is empty".to_string(),
            });
        }
        self.limits
            .validate_text(&transcript)
            .map_err(|v| WorkflowError::input(Stage::Transcribing, v.to_string()))?;

        info!(
            transcriber = transcriber.name(),
            chars = transcript.len(),
            "Audio transcribed"
        );
        job.complete_stage(started.elapsed().as_millis() as u64);
        Ok(transcript)
    }

    fn decide(&self, job: &mut DocumentJob) -> Result<bool, WorkflowError> {
        job.enter(Stage::DecidingSplit);
        let needs_split = decide_split(&job.input_text, self.settings.split_threshold);
        job.decide_split(needs_split)?;
        debug!(
            needs_split,
            chars = job.input_text.chars().count(),
            threshold = self.settings.split_threshold,
            "Split decided"
        );
        Ok(needs_split)
    }

    /// Fetch search context when the job asks for it
    async fn search_context(&self, job: &DocumentJob) -> Result<Option<String>, WorkflowError> {
        let search = match (&self.search, job.search_enabled) {
            (Some(search), true) => search,
            _ => return Ok(None),
        };

        let query = search_query(
            &job.user_requirement,
            &job.conversation_history,
            self.settings.history_window,
        );
        let context = search.search(&query).await.map_err(|e| WorkflowError::Search {
            stage: job.stage,
            cause: format!("{:#}", e),
        })?;

        info!(search = search.name(), chars = context.len(), "Search context ready");
        Ok(Some(context))
    }

    /// Single-call generation with bounded retry
    async fn run_direct(&self, job: &mut DocumentJob) -> Result<String, WorkflowError> {
        let stage = direct_stage(job);
        job.enter(stage);
        job.transition(JobStatus::Generating)?;

        let context = self.search_context(job).await?;
        let history = job.conversation_history.clone();
        let text = job.input_text.clone();
        let requirement = job.user_requirement.clone();
        let request = build_direct_request(&text, &requirement, context.as_deref(), job.audio_sourced);

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let started = Instant::now();
            let result = self.generator.generate(&request, &history).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            let last_attempt = !self.retry.should_retry(attempt);

            let problem = match result {
                Ok(raw) => {
                    let outline = strip_code_fences(&raw);
                    let issues = validate_outline(&outline);
                    if issues.is_empty() {
                        job.complete_stage(duration_ms);
                        return Ok(outline);
                    }

                    let problem = issues
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ");
                    let accept_weak = last_attempt || !self.retry.retry_weak_outlines;
                    if !outline.is_empty() && accept_weak {
                        warn!(attempt, issues = %problem, "Accepting outline with structural issues");
                        job.complete_stage(duration_ms);
                        return Ok(outline);
                    }
                    if last_attempt {
                        return Err(WorkflowError::Generation {
                            stage,
                            cause: format!("model returned an empty outline after {} attempts", attempt),
                        });
                    }
                    problem
                }
                Err(failure) => {
                    if last_attempt {
                        return Err(WorkflowError::generation(stage, failure));
                    }
                    failure.cause
                }
            };

            let delay = self.retry.delay_for_attempt(attempt);
            warn!(
                %stage,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %problem,
                "Generation rejected, retrying"
            );
            let event = JobEvent::new(
                job.id,
                Some(stage),
                EventType::StageRetrying,
                format!("Attempt {} rejected, retrying in {:?}", attempt, delay),
            )
            .with_duration(duration_ms)
            .with_error(problem);
            job.record(event);
            job.transition(JobStatus::Generating)?;

            tokio::time::sleep(delay).await;
        }
    }

    /// Split, title and fan out concurrently, then merge
    async fn run_split(
        &self,
        job: &mut DocumentJob,
        cancel: &CancellationToken,
    ) -> Result<String, WorkflowError> {
        job.transition(JobStatus::Chunking)?;
        job.enter(Stage::Splitting);
        let started = Instant::now();
        job.chunks = split_document(
            &self.generator,
            &job.input_text,
            &job.user_requirement,
            &job.conversation_history,
        )
        .await?;
        job.complete_stage(started.elapsed().as_millis() as u64);

        // The title runs alongside the chunks; `job.stage` follows the chunk work
        job.transition(JobStatus::Generating)?;
        job.enter(Stage::GeneratingGlobalTitle);
        job.enter(Stage::ProcessingChunks);
        let started = Instant::now();

        let title_request = OutlineRequest::GlobalTitle {
            text: &job.input_text,
            requirement: &job.user_requirement,
        };
        let title_call = async {
            let result = self
                .generator
                .generate(&title_request, &job.conversation_history)
                .await;
            (result, started.elapsed().as_millis() as u64)
        };
        let ((title, title_ms), processed) = tokio::join!(
            title_call,
            self.pool.process_all(
                Arc::clone(&self.generator),
                &job.chunks,
                &job.user_requirement,
                &job.conversation_history,
                cancel,
            ),
        );

        let title = match title {
            Ok(raw) => clean_title(&raw).ok_or_else(|| "model returned a blank title".to_string()),
            Err(failure) => Err(failure.cause),
        };
        job.global_title = match title {
            Ok(title) => {
                job.complete_stage_of(Stage::GeneratingGlobalTitle, title_ms);
                title
            }
            Err(cause) => {
                warn!(error = %cause, "Global title generation failed, using requirement");
                job.record(
                    JobEvent::new(
                        job.id,
                        Some(Stage::GeneratingGlobalTitle),
                        EventType::TitleFallback,
                        "Title generation failed, derived title from requirement",
                    )
                    .with_duration(title_ms)
                    .with_error(cause),
                );
                fallback_title(&job.user_requirement)
            }
        };

        let outcomes = match processed {
            Ok(outcomes) => outcomes,
            Err(pool_error) => {
                warn!(error = %pool_error, "Chunk pool failed, processing sequentially");
                job.record(
                    JobEvent::new(
                        job.id,
                        Some(Stage::ProcessingChunks),
                        EventType::SequentialFallback,
                        format!("Processing {} chunks sequentially", job.chunks.len()),
                    )
                    .with_error(pool_error.to_string()),
                );
                process_sequential(
                    &self.generator,
                    &job.chunks,
                    &job.user_requirement,
                    &job.conversation_history,
                    cancel,
                )
                .await
            }
        };

        self.record_chunk_failures(job, &outcomes);
        if !outcomes.is_empty() && outcomes.iter().all(ChunkOutcome::is_failed) {
            let first = outcomes
                .into_iter()
                .next()
                .map(ChunkOutcome::into_text)
                .unwrap_or_default();
            return Err(WorkflowError::Generation {
                stage: Stage::ProcessingChunks,
                cause: format!("every chunk failed; first: {}", first),
            });
        }

        job.chunk_outlines = outcomes.into_iter().map(ChunkOutcome::into_text).collect();
        if job.chunk_outlines.len() != job.chunks.len() {
            return Err(WorkflowError::Generation {
                stage: Stage::ProcessingChunks,
                cause: format!(
                    "{} outlines for {} chunks",
                    job.chunk_outlines.len(),
                    job.chunks.len()
                ),
            });
        }
        job.complete_stage(started.elapsed().as_millis() as u64);

        job.transition(JobStatus::Merging)?;
        job.enter(Stage::Merging);
        let started = Instant::now();
        let merged = merge(
            &self.generator,
            &job.chunk_outlines,
            &job.global_title,
            &job.user_requirement,
            &job.conversation_history,
        )
        .await;

        if let MergeMethod::Fallback(ref err) = merged.method {
            job.record(
                JobEvent::new(
                    job.id,
                    Some(Stage::Merging),
                    EventType::MergeFallback,
                    "Model merge rejected, used structural merge",
                )
                .with_error(err.to_string()),
            );
        }
        job.complete_stage(started.elapsed().as_millis() as u64);

        Ok(merged.outline)
    }

    fn record_chunk_failures(&self, job: &mut DocumentJob, outcomes: &[ChunkOutcome]) {
        for (index, outcome) in outcomes.iter().enumerate() {
            if let ChunkOutcome::Failed(cause) = outcome {
                let err = WorkflowError::ChunkGeneration {
                    stage: Stage::ProcessingChunks,
                    index,
                    cause: cause.clone(),
                };
                job.record(
                    JobEvent::new(
                        job.id,
                        Some(Stage::ProcessingChunks),
                        EventType::ChunkFailed,
                        format!("Chunk {} failed", index),
                    )
                    .with_error(err.to_string()),
                );
            }
        }
    }
}

/// Create the job record for a request, separating out its source
fn start_job(request: JobRequest) -> (DocumentJob, JobSource) {
    let JobRequest {
        source,
        requirement,
        history,
        search,
    } = request;

    let mut job = DocumentJob::new(requirement, history);
    job.search_enabled = search;
    (job, source)
}

/// Which direct path a job takes. Search wins over audio.
fn direct_stage(job: &DocumentJob) -> Stage {
    if job.search_enabled {
        Stage::GeneratingWithSearch
    } else if job.audio_sourced {
        Stage::GeneratingFromAudio
    } else {
        Stage::GeneratingDirect
    }
}

fn direct_request<'a>(job: &'a DocumentJob, context: Option<&'a str>) -> OutlineRequest<'a> {
    build_direct_request(
        &job.input_text,
        &job.user_requirement,
        context,
        job.audio_sourced,
    )
}

fn build_direct_request<'a>(
    text: &'a str,
    requirement: &'a str,
    context: Option<&'a str>,
    audio_sourced: bool,
) -> OutlineRequest<'a> {
    match context {
        Some(context) => OutlineRequest::WithSearch {
            context,
            requirement,
        },
        None if audio_sourced => OutlineRequest::Transcript { text, requirement },
        None if text.trim().is_empty() => OutlineRequest::NoDocument { requirement },
        None => OutlineRequest::Document { text, requirement },
    }
}

/// How a streamed job starts: already settled, or still streaming
enum StreamStart {
    Settled(EventStream),
    Fragments(FragmentStream, Stage),
}

/// Record the terminal state of a job
fn settle(job: &mut DocumentJob, result: Result<String, WorkflowError>) -> Result<(), WorkflowError> {
    let outcome = result.and_then(|outline| job.finish(outline));
    match outcome {
        Ok(()) => {
            info!(
                job_id = %job.id,
                events = job.events.len(),
                "Outline job completed"
            );
            Ok(())
        }
        Err(e) => {
            error!(job_id = %job.id, kind = e.kind(), error = %e, "Outline job failed");
            job.fail(&e);
            Err(e)
        }
    }
}

fn stream_failure(job: &mut DocumentJob, error: WorkflowError) -> EventStream {
    error!(job_id = %job.id, kind = error.kind(), error = %error, "Streamed job failed");
    job.fail(&error);
    error_events(&error)
}

/// Pass fragments through, settling the job when they end or fail
fn settle_on_end(
    fragments: FragmentStream,
    job: DocumentJob,
    stage: Stage,
    done: oneshot::Sender<DocumentJob>,
) -> FragmentStream {
    struct Streaming {
        fragments: FragmentStream,
        job: DocumentJob,
        text: String,
        done: oneshot::Sender<DocumentJob>,
    }

    impl Streaming {
        fn close(mut self, result: Result<String, WorkflowError>) {
            // Errors are already in front of the caller as stream events
            let _ = settle(&mut self.job, result);
            let _ = self.done.send(self.job);
        }
    }

    let state = Streaming {
        fragments,
        job,
        text: String::new(),
        done,
    };
    stream::unfold(Some(state), move |state| async move {
        let mut state = state?;
        match state.fragments.next().await {
            Some(Ok(fragment)) => {
                state.text.push_str(&fragment);
                Some((Ok(fragment), Some(state)))
            }
            Some(Err(failure)) => {
                state.close(Err(WorkflowError::generation(stage, failure.clone())));
                Some((Err(failure), None))
            }
            None => {
                let outline = strip_code_fences(&state.text);
                let result = if outline.is_empty() {
                    Err(WorkflowError::Generation {
                        stage,
                        cause: "model streamed an empty outline".to_string(),
                    })
                } else {
                    Ok(outline)
                };
                state.close(result);
                None
            }
        }
    })
    .boxed()
}

/// First meaningful line of a title response
fn clean_title(raw: &str) -> Option<String> {
    let line = strip_code_fences(raw)
        .lines()
        .map(|l| l.trim().trim_start_matches(['#', '-', '*', ' ']))
        .find(|l| !l.is_empty())?
        .trim_matches(['"', '\'', '*'])
        .trim()
        .to_string();
    (!line.is_empty()).then_some(line)
}

fn fallback_title(requirement: &str) -> String {
    let line = requirement.lines().next().unwrap_or_default().trim();
    line.chars().take(FALLBACK_TITLE_CHARS).collect()
}
