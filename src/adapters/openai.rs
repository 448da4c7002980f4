//! OpenAI-compatible chat completions adapter.
//!
//! Works against any server exposing `/v1/chat/completions` (OpenAI,
//! vLLM, LM Studio, ...). Streaming responses are server-sent events read
//! on a background task and forwarded through a channel.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use super::{ModelClient, Prompt, TextStream};
use crate::config::LlmSettings;

const SYSTEM_PROMPT: &str = "You turn documents and requests into XMindMark mind map outlines.";

/// Fragments buffered between the SSE reader and the consumer
const STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions client
pub struct OpenAiClient {
    client: reqwest::Client,
    settings: LlmSettings,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Build a client; extra headers from the settings go on every request
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let mut headers = HeaderMap::new();
        for (name, value) in &settings.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid header name: {}", name))?;
            let header_value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for header '{}'", name))?;
            headers.insert(header_name, header_value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        let api_key = settings.api_key();
        if api_key.is_none() {
            debug!(env = %settings.api_key_env, "No LLM API key set, sending unauthenticated requests");
        }

        Ok(Self {
            client,
            settings,
            api_key,
        })
    }

    /// Resolve the chat completions endpoint from the base URL
    fn endpoint(&self) -> String {
        let base = self.settings.base_url.trim_end_matches('/');
        if base.ends_with("/chat/completions") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{}/chat/completions", base)
        } else {
            format!("{}/v1/chat/completions", base)
        }
    }

    fn request(&self, prompt: &Prompt, stream: bool) -> reqwest::RequestBuilder {
        let mut messages = Vec::with_capacity(prompt.history.len() + 2);
        messages.push(ChatMessage {
            role: "system",
            content: SYSTEM_PROMPT,
        });
        messages.extend(prompt.history.iter().map(|turn| ChatMessage {
            role: &turn.role,
            content: &turn.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: &prompt.body,
        });

        let body = serde_json::json!({
            "model": self.settings.model,
            "messages": messages,
            "temperature": self.settings.temperature,
            "max_tokens": self.settings.max_tokens,
            "stream": stream,
        });

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn send(&self, prompt: &Prompt, stream: bool) -> Result<reqwest::Response> {
        let resp = self
            .request(prompt, stream)
            .send()
            .await
            .context("LLM request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("LLM returned {}: {}", status, body.trim());
        }
        Ok(resp)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &Prompt) -> Result<String> {
        let resp = self.send(prompt, false).await?;
        let text = resp.text().await.context("Failed to read LLM response")?;
        let parsed: ChatResponse =
            serde_json::from_str(&text).context("Failed to parse LLM JSON")?;

        // Missing or null content is an empty completion
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }

    async fn complete_stream(&self, prompt: &Prompt) -> Result<TextStream> {
        let resp = self.send(prompt, true).await?;
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);

        tokio::spawn(async move {
            let mut bytes = resp.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        warn!(error = %e, "LLM stream interrupted");
                        let _ = tx
                            .send(Err(anyhow::Error::new(e).context("LLM stream interrupted")))
                            .await;
                        return;
                    }
                };
                buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

                if !forward(&tx, drain_events(&mut buffer)).await {
                    return;
                }
            }

            // Last event may lack its blank-line terminator
            if !buffer.is_empty() {
                buffer.extend_from_slice(b"\n\n");
                forward(&tx, drain_events(&mut buffer)).await;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

/// Send items downstream. Returns false once the stream should stop.
async fn forward(tx: &mpsc::Sender<Result<String>>, items: Vec<Result<String>>) -> bool {
    for item in items {
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return false;
        }
    }
    true
}

/// Pull every complete SSE event out of `buffer`, returning content deltas
fn drain_events(buffer: &mut Vec<u8>) -> Vec<Result<String>> {
    let mut out = Vec::new();

    while let Some(end) = buffer.windows(2).position(|w| w == b"\n\n") {
        let event: Vec<u8> = buffer.drain(..end + 2).collect();
        let event = String::from_utf8_lossy(&event);

        for line in event.lines() {
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data.is_empty() || data == "[DONE]" {
                continue;
            }

            match serde_json::from_str::<StreamChunk>(data) {
                Ok(StreamChunk {
                    error: Some(error), ..
                }) => out.push(Err(anyhow::anyhow!("LLM stream error: {}", error))),
                Ok(chunk) => out.extend(
                    chunk
                        .choices
                        .into_iter()
                        .filter_map(|c| c.delta.content)
                        .map(Ok),
                ),
                Err(e) => {
                    out.push(Err(anyhow::Error::new(e).context("Failed to parse LLM stream chunk")))
                }
            }
        }
    }

    out
}
