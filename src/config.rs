//! Configuration for mindmark.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (MINDMARK_LLM_BASE_URL, MINDMARK_LLM_MODEL, ...)
//! 2. Config file (`$MINDMARK_CONFIG`, else `.mindmark/config.yaml` in the
//!    current directory or a parent, else `~/.mindmark/config.yaml`)
//! 3. Defaults
//!
//! Secrets are never stored in the file; each service names the
//! environment variable that holds its API key.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::retry::RetryPolicy;

/// Global cached configuration for the CLI (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub llm: LlmSettings,
    #[serde(default)]
    pub workflow: WorkflowSettings,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub search: SearchSettings,
    #[serde(default)]
    pub transcription: TranscriptionSettings,
    #[serde(default)]
    pub render: RenderSettings,
}

/// OpenAI-compatible chat model endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Environment variable holding the API key
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Per-call timeout in seconds (default: 60)
    #[serde(default = "default_model_timeout")]
    pub timeout_seconds: u64,

    /// Extra headers sent with every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_llm_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_llm_model() -> String {
    "gpt-4.1-mini".to_string()
}
fn default_llm_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_max_tokens() -> u32 {
    8192
}
fn default_model_timeout() -> u64 {
    60
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_seconds: default_model_timeout(),
            headers: HashMap::new(),
        }
    }
}

impl LlmSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// API key from the configured environment variable, if set
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Workflow tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Documents longer than this many characters are split (default: 1000)
    #[serde(default = "default_split_threshold")]
    pub split_threshold: usize,

    /// Worker pool width for chunk processing (default: 4)
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// History turns folded into search queries (default: 5)
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Longest accepted source text in characters (default: 50000)
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

fn default_split_threshold() -> usize {
    1000
}
fn default_max_workers() -> usize {
    4
}
fn default_history_window() -> usize {
    5
}
fn default_max_input_chars() -> usize {
    50_000
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            split_threshold: default_split_threshold(),
            max_workers: default_max_workers(),
            history_window: default_history_window(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

/// Tavily web search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Each result is cut to this many characters
    #[serde(default = "default_max_chars_per_result")]
    pub max_chars_per_result: usize,

    /// Results shorter than this are dropped as noise
    #[serde(default = "default_min_result_chars")]
    pub min_result_chars: usize,

    #[serde(default = "default_search_timeout")]
    pub timeout_seconds: u64,
}

fn default_search_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}
fn default_search_api_key_env() -> String {
    "TAVILY_API_KEY".to_string()
}
fn default_max_results() -> u32 {
    5
}
fn default_max_chars_per_result() -> usize {
    2000
}
fn default_min_result_chars() -> usize {
    50
}
fn default_search_timeout() -> u64 {
    30
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            api_key_env: default_search_api_key_env(),
            max_results: default_max_results(),
            max_chars_per_result: default_max_chars_per_result(),
            min_result_chars: default_min_result_chars(),
            timeout_seconds: default_search_timeout(),
        }
    }
}

impl SearchSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Local Whisper CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    #[serde(default = "default_whisper_path")]
    pub whisper_path: String,

    #[serde(default = "default_whisper_model")]
    pub model: String,

    /// `transcribe` keeps the spoken language, `translate` outputs English
    #[serde(default = "default_whisper_task")]
    pub task: String,

    #[serde(default = "default_transcription_timeout")]
    pub timeout_seconds: u64,

    /// Largest accepted upload (default: 25 MiB)
    #[serde(default = "default_max_audio_bytes")]
    pub max_audio_bytes: u64,

    #[serde(default = "default_audio_extensions")]
    pub allowed_extensions: Vec<String>,
}

fn default_whisper_path() -> String {
    "whisper".to_string()
}
fn default_whisper_model() -> String {
    "small".to_string()
}
fn default_whisper_task() -> String {
    "translate".to_string()
}
fn default_transcription_timeout() -> u64 {
    300
}
fn default_max_audio_bytes() -> u64 {
    25 * 1024 * 1024
}
fn default_audio_extensions() -> Vec<String> {
    ["wav", "mp3", "m4a", "ogg", "flac", "aac"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            whisper_path: default_whisper_path(),
            model: default_whisper_model(),
            task: default_whisper_task(),
            timeout_seconds: default_transcription_timeout(),
            max_audio_bytes: default_max_audio_bytes(),
            allowed_extensions: default_audio_extensions(),
        }
    }
}

/// xmindmark CLI renderer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderSettings {
    #[serde(default = "default_render_binary")]
    pub binary: String,

    #[serde(default = "default_render_timeout")]
    pub timeout_seconds: u64,
}

fn default_render_binary() -> String {
    "xmindmark".to_string()
}
fn default_render_timeout() -> u64 {
    20
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            binary: default_render_binary(),
            timeout_seconds: default_render_timeout(),
        }
    }
}

/// Resolved configuration
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResolvedConfig {
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub llm: LlmSettings,
    pub workflow: WorkflowSettings,
    pub retry: RetryPolicy,
    pub search: SearchSettings,
    pub transcription: TranscriptionSettings,
    pub render: RenderSettings,
}

impl ResolvedConfig {
    fn from_file(file: ConfigFile, config_file: Option<PathBuf>) -> Self {
        Self {
            config_file,
            llm: file.llm,
            workflow: file.workflow,
            retry: file.retry,
            search: file.search,
            transcription: file.transcription,
            render: file.render,
        }
    }

    /// Apply environment overrides on top of file values
    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(base_url) = env("MINDMARK_LLM_BASE_URL") {
            self.llm.base_url = base_url;
        }
        if let Some(model) = env("MINDMARK_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(threshold) = env("MINDMARK_SPLIT_THRESHOLD") {
            self.workflow.split_threshold = threshold
                .parse()
                .with_context(|| format!("Invalid MINDMARK_SPLIT_THRESHOLD: {}", threshold))?;
        }
        if let Some(workers) = env("MINDMARK_MAX_WORKERS") {
            self.workflow.max_workers = workers
                .parse()
                .with_context(|| format!("Invalid MINDMARK_MAX_WORKERS: {}", workers))?;
        }
        Ok(())
    }

    /// Reject settings the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.workflow.max_workers == 0 {
            anyhow::bail!("workflow.max_workers must be at least 1");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be at least 1");
        }
        if self.llm.model.trim().is_empty() {
            anyhow::bail!("llm.model cannot be empty");
        }
        Ok(())
    }
}

/// Find config file by searching current directory and parents, then home
fn find_config_file() -> Option<PathBuf> {
    if let Ok(explicit) = std::env::var("MINDMARK_CONFIG") {
        return Some(PathBuf::from(explicit));
    }

    let mut current = std::env::current_dir().ok()?;
    loop {
        let config_path = current.join(".mindmark").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home_config = dirs::home_dir()?.join(".mindmark").join("config.yaml");
    home_config.exists().then_some(home_config)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_config(content: &str) -> Result<ConfigFile> {
    // An empty file is a valid "all defaults" config
    if content.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    Ok(serde_yaml::from_str(content)?)
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = find_config_file();

    let file = match config_file {
        Some(ref path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let mut config = ResolvedConfig::from_file(file, config_file);
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}
