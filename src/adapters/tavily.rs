//! Tavily web search adapter.
//!
//! Results are reduced to their raw page text: short, duplicate and
//! sponsored pages are dropped, each page is truncated, and the rest are
//! joined into one context blob for the model.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{SearchClient, NO_SEARCH_RESULTS};
use crate::config::SearchSettings;

const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// Pages mentioning these are treated as advertising
const SPONSORED_MARKERS: &[&str] = &["sponsored", "advertisement"];

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    topic: &'a str,
    max_results: u32,
    include_raw_content: bool,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

/// Tavily search client
pub struct TavilyClient {
    client: reqwest::Client,
    settings: SearchSettings,
    api_key: String,
}

impl TavilyClient {
    pub fn new(settings: SearchSettings, api_key: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            settings,
            api_key: api_key.into(),
        })
    }

    /// Build a client if the configured API key variable is set
    pub fn from_settings(settings: &SearchSettings) -> Result<Option<Self>> {
        match settings.api_key() {
            Some(key) => Ok(Some(Self::new(settings.clone(), key)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SearchClient for TavilyClient {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str) -> Result<String> {
        let body = SearchRequest {
            query,
            topic: "general",
            max_results: self.settings.max_results,
            include_raw_content: true,
        };

        let resp = self
            .client
            .post(&self.settings.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("Search request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("Search returned {}: {}", status, text.trim());
        }

        let parsed: SearchResponse = resp
            .json()
            .await
            .context("Failed to parse search response")?;
        debug!(results = parsed.results.len(), "Search returned");

        let context = compile_results(&parsed.results, &self.settings);
        if context == NO_SEARCH_RESULTS {
            warn!(query_chars = query.len(), "No relevant search results");
        }
        Ok(context)
    }
}

/// Filter, dedupe and truncate result pages into one context blob
pub fn compile_results(results: &[SearchResult], settings: &SearchSettings) -> String {
    let mut seen = HashSet::new();
    let mut pages = Vec::new();

    for result in results {
        let Some(raw) = result.raw_content.as_deref() else {
            continue;
        };
        if raw.chars().count() <= settings.min_result_chars || !seen.insert(raw) {
            continue;
        }

        let lower = raw.to_lowercase();
        if SPONSORED_MARKERS.iter().any(|m| lower.contains(m)) {
            debug!(url = %result.url, "Skipping sponsored result");
            continue;
        }

        pages.push(raw.chars().take(settings.max_chars_per_result).collect::<String>());
    }

    if pages.is_empty() {
        return NO_SEARCH_RESULTS.to_string();
    }
    pages.join(RESULT_SEPARATOR)
}
