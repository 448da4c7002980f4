//! Command-line interface for mindmark.
//!
//! Provides commands for generating outlines from documents, audio or a
//! bare requirement, editing an existing outline, rendering outlines to
//! SVG / XMind, and showing the resolved configuration.
//!
//! Outline text goes to stdout; logs and status lines go to stderr.

use std::io::{self, IsTerminal, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::StreamExt;

use crate::adapters::{Renderer, XMindMarkRenderer};
use crate::config;
use crate::core::{render_outline, EditRequest, Orchestrator};
use crate::domain::{ChatTurn, EventStream, JobRequest, RenderFormat, StreamEvent};
use crate::error::WorkflowError;
use crate::ingest;

/// mindmark - LLM-driven XMindMark outline generator
#[derive(Parser, Debug)]
#[command(name = "mindmark")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an outline
    Generate {
        /// What the outline should cover or emphasize
        #[arg(short, long)]
        requirement: String,

        /// Source document (.txt, .md, .pdf, .docx)
        #[arg(short, long, conflicts_with = "audio")]
        input: Option<PathBuf>,

        /// Audio file to transcribe first
        #[arg(short, long)]
        audio: Option<PathBuf>,

        /// Read the source document from stdin
        #[arg(long, conflicts_with_all = ["input", "audio"])]
        stdin: bool,

        /// Use web search results as the source
        #[arg(long)]
        search: bool,

        /// Conversation history (JSON array of {role, content})
        #[arg(long)]
        history: Option<PathBuf>,

        /// Print the outline as it is generated
        #[arg(long)]
        stream: bool,

        /// Also render the outline
        #[arg(long, value_enum)]
        render: Option<FormatArg>,

        /// Where to write the rendered file (file or directory)
        #[arg(short, long, requires = "render")]
        output: Option<PathBuf>,
    },

    /// Edit an existing outline (streamed)
    Edit {
        /// File holding the current outline
        #[arg(long)]
        outline: PathBuf,

        /// What to change
        #[arg(long)]
        request: String,

        /// Use web search results while editing
        #[arg(long, requires = "original_requirement")]
        search: bool,

        /// Requirement the outline was generated for
        #[arg(long)]
        original_requirement: Option<String>,

        /// Conversation history (JSON array of {role, content})
        #[arg(long)]
        history: Option<PathBuf>,
    },

    /// Render an outline file to SVG or XMind
    Render {
        /// Outline file
        #[arg(short, long)]
        input: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "svg")]
        format: FormatArg,

        /// Where to write the rendered file (file or directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config,
}

/// Render format for CLI (maps to RenderFormat)
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum FormatArg {
    /// SVG image
    Svg,

    /// XMind workbook
    Xmind,
}

impl From<FormatArg> for RenderFormat {
    fn from(f: FormatArg) -> Self {
        match f {
            FormatArg::Svg => RenderFormat::Svg,
            FormatArg::Xmind => RenderFormat::Xmind,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Generate {
                requirement,
                input,
                audio,
                stdin,
                search,
                history,
                stream,
                render,
                output,
            } => {
                let request = build_request(requirement, input, audio, stdin, search, history)?;
                generate(request, stream, render.map(Into::into), output).await
            }
            Commands::Edit {
                outline,
                request,
                search,
                original_requirement,
                history,
            } => edit(&outline, request, search, original_requirement, history).await,
            Commands::Render {
                input,
                format,
                output,
            } => {
                let outline = std::fs::read_to_string(&input)
                    .with_context(|| format!("Failed to read outline file: {}", input.display()))?;
                render(&outline, format.into(), output).await
            }
            Commands::Config => show_config(),
        }
    }
}

/// Assemble a job request from CLI arguments
fn build_request(
    requirement: String,
    input: Option<PathBuf>,
    audio: Option<PathBuf>,
    use_stdin: bool,
    search: bool,
    history: Option<PathBuf>,
) -> Result<JobRequest> {
    let request = if let Some(path) = audio {
        JobRequest::audio(ingest::load_audio(&path)?, requirement)
    } else if let Some(path) = input {
        let text = ingest::extract_text(&path)?;
        JobRequest::text(text, requirement)
    } else if use_stdin || !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        JobRequest::text(buffer.trim().to_string(), requirement)
    } else {
        JobRequest::requirement_only(requirement)
    };

    let history = match history {
        Some(path) => load_history(&path)?,
        None => Vec::new(),
    };
    Ok(request.with_history(history).with_search(search))
}

/// Read a JSON conversation history file
pub fn load_history(path: &Path) -> Result<Vec<ChatTurn>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read history file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("History file is not a JSON array of {{role, content}}: {}", path.display()))
}

fn orchestrator() -> Result<Orchestrator> {
    let cfg = config::config()?;
    Orchestrator::from_config(cfg)
}

async fn generate(
    request: JobRequest,
    stream: bool,
    format: Option<RenderFormat>,
    output: Option<PathBuf>,
) -> Result<()> {
    let orchestrator = orchestrator()?;

    let outline = if stream {
        let events = orchestrator.run_stream(request).await;
        match print_stream(events).await? {
            Some(outline) => outline,
            None => std::process::exit(1),
        }
    } else {
        match orchestrator.run(request).await {
            Ok(job) => {
                let outline = job.final_outline().unwrap_or_default().to_string();
                println!("{}", outline);
                eprintln!(
                    "\n[Job {} completed: {} chunk(s), {} event(s)]",
                    job.id,
                    job.chunks.len(),
                    job.events.len()
                );
                outline
            }
            Err(e) => fail(&e),
        }
    };

    if let Some(format) = format {
        render(&outline, format, output).await?;
    }
    Ok(())
}

async fn edit(
    outline_path: &Path,
    edit_request: String,
    search: bool,
    original_requirement: Option<String>,
    history: Option<PathBuf>,
) -> Result<()> {
    let current = std::fs::read_to_string(outline_path)
        .with_context(|| format!("Failed to read outline file: {}", outline_path.display()))?;

    let mut request = EditRequest::new(current, edit_request);
    request.search = search;
    request.original_requirement = original_requirement;
    if let Some(path) = history {
        request = request.with_history(load_history(&path)?);
    }

    let orchestrator = orchestrator()?;
    let events = orchestrator.edit_stream(request).await;
    if print_stream(events).await?.is_none() {
        std::process::exit(1);
    }
    Ok(())
}

/// Print fragments as they arrive. Returns the full text, or `None` if the
/// stream reported an error.
async fn print_stream(mut events: EventStream) -> Result<Option<String>> {
    let mut stdout = io::stdout();
    let mut text = String::new();

    while let Some(event) = events.next().await {
        match event {
            StreamEvent::Fragment { text: fragment } => {
                write!(stdout, "{}", fragment).context("Failed to write to stdout")?;
                stdout.flush().context("Failed to flush stdout")?;
                text.push_str(&fragment);
            }
            StreamEvent::Error { kind, message } => {
                eprintln!("\n[{}] {}", kind, message);
                return Ok(None);
            }
            StreamEvent::End => break,
        }
    }

    println!();
    Ok(Some(text))
}

async fn render(outline: &str, format: RenderFormat, output: Option<PathBuf>) -> Result<()> {
    let cfg = config::config()?;
    let renderer = XMindMarkRenderer::new(cfg.render.clone());

    if let Err(e) = renderer.health_check().await {
        tracing::warn!(error = %e, "xmindmark health check failed");
    }

    let artifact = match render_outline(&renderer, outline, format).await {
        Ok(artifact) => artifact,
        Err(e) => fail(&e),
    };

    let path = match output {
        Some(path) if path.is_dir() => path.join(artifact.file_name()),
        Some(path) => path,
        None => PathBuf::from(artifact.file_name()),
    };
    std::fs::write(&path, &artifact.bytes)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    eprintln!("[Rendered {} bytes to {}]", artifact.size_bytes, path.display());
    Ok(())
}

/// Report a workflow error and exit non-zero
fn fail(error: &WorkflowError) -> ! {
    eprintln!("\n[{}] {}", error.kind(), error);
    std::process::exit(1);
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("mindmark configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("LLM:");
    println!("  Base URL:    {}", cfg.llm.base_url);
    println!("  Model:       {}", cfg.llm.model);
    println!(
        "  API key:     ${} ({})",
        cfg.llm.api_key_env,
        if cfg.llm.api_key().is_some() { "set" } else { "not set" }
    );
    println!("  Timeout:     {}s", cfg.llm.timeout_seconds);
    println!();
    println!("Workflow:");
    println!("  Split threshold: {} chars", cfg.workflow.split_threshold);
    println!("  Max workers:     {}", cfg.workflow.max_workers);
    println!("  History window:  {} turns", cfg.workflow.history_window);
    println!("  Max input:       {} chars", cfg.workflow.max_input_chars);
    println!("  Retry attempts:  {}", cfg.retry.max_attempts);
    println!();
    println!("Search:");
    println!(
        "  API key:     ${} ({})",
        cfg.search.api_key_env,
        if cfg.search.api_key().is_some() { "set" } else { "not set" }
    );
    println!();
    println!("Tools:");
    println!("  Whisper:     {} (model {})", cfg.transcription.whisper_path, cfg.transcription.model);
    println!("  xmindmark:   {}", cfg.render.binary);

    Ok(())
}
