// Streaming chat completion clients
// A producer task pushes tokens into a bounded channel as they arrive upstream

#[cfg(test)]
mod tests;

pub mod scripted;

use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::chat::messages::ChatMessage;
use crate::config::ApiConfig;
use crate::embeddings::openai::api_error_message;
use crate::{RagError, Result};

pub use scripted::ScriptedCompletion;

/// Tokens buffered between the upstream reader and the consumer
pub const TOKEN_BUFFER: usize = 64;

/// A generator that streams a response to a conversation token by token.
///
/// The returned channel yields tokens in arrival order. A failure is sent as
/// the final item; the channel closes when generation ends.
pub trait ChatCompletion: Send + Sync {
    fn stream_chat(&self, messages: Vec<ChatMessage>) -> mpsc::Receiver<Result<String>>;
}

/// Client for an OpenAI-compatible `POST /chat/completions` endpoint with `stream: true`
#[derive(Debug, Clone)]
pub struct OpenAiChat {
    endpoint: Url,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkError {
    message: String,
}

/// Agent for streamed completions.
///
/// Connecting, sending the request and waiting for the response head are bounded
/// by `timeout`. Reading the body is not: a healthy answer may keep streaming far
/// longer, and its length is bounded by `max_tokens` instead.
fn build_streaming_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_connect(Some(timeout))
        .timeout_send_request(Some(timeout))
        .timeout_send_body(Some(timeout))
        .timeout_recv_response(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// What one line of the upstream event stream means
#[derive(Debug, PartialEq)]
enum StreamLine {
    Token(String),
    Skip,
    Finished,
}

fn parse_stream_line(line: &str) -> Result<StreamLine> {
    let Some(payload) = line.strip_prefix("data:") else {
        // Comments, event names and keep-alive blank lines
        return Ok(StreamLine::Skip);
    };

    let payload = payload.trim();
    if payload == "[DONE]" {
        return Ok(StreamLine::Finished);
    }
    if payload.is_empty() {
        return Ok(StreamLine::Skip);
    }

    let chunk: CompletionChunk = serde_json::from_str(payload).map_err(|e| {
        RagError::GenerationService(format!("Failed to parse completion chunk: {}", e))
    })?;

    if let Some(error) = chunk.error {
        return Err(RagError::GenerationService(error.message));
    }

    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(token) if !token.is_empty() => Ok(StreamLine::Token(token)),
        _ => Ok(StreamLine::Skip),
    }
}

impl OpenAiChat {
    #[inline]
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let endpoint = config
            .endpoint_url("chat/completions")
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone(),
            model: config.chat_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            agent: build_streaming_agent(Duration::from_secs(config.timeout_seconds)),
        })
    }

    #[inline]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Read the upstream stream to the end, forwarding tokens to `tx`.
    ///
    /// Returns early once the receiver is gone. A body that ends before the
    /// `[DONE]` marker is a truncated answer and fails.
    fn stream_blocking(&self, messages: &[ChatMessage], tx: &mpsc::Sender<Result<String>>) -> Result<()> {
        debug!(
            "Requesting completion from {} with model {} ({} messages)",
            self.endpoint,
            self.model,
            messages.len()
        );

        let request_json = serde_json::to_string(&CompletionRequest {
            model: &self.model,
            messages,
            stream: true,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
        .map_err(|e| {
            RagError::GenerationService(format!("Failed to serialize completion request: {}", e))
        })?;

        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let mut response = request
            .send(&request_json)
            .map_err(|e| RagError::GenerationService(format!("Request error: {}", e)))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.body_mut().read_to_string().unwrap_or_default();
            warn!("Completion request failed with status {}", status);
            return Err(RagError::GenerationService(api_error_message(status, &body)));
        }

        let reader = BufReader::new(response.into_body().into_reader());
        let mut token_count = 0usize;
        let mut finished = false;
        for line in reader.lines() {
            let line = line.map_err(|e| {
                RagError::GenerationService(format!("Failed to read completion stream: {}", e))
            })?;

            match parse_stream_line(&line)? {
                StreamLine::Token(token) => {
                    token_count += 1;
                    if tx.blocking_send(Ok(token)).is_err() {
                        debug!("Token receiver dropped, abandoning completion stream");
                        return Ok(());
                    }
                }
                StreamLine::Skip => {}
                StreamLine::Finished => {
                    finished = true;
                    break;
                }
            }
        }

        if !finished {
            return Err(RagError::GenerationService(format!(
                "Completion stream ended before [DONE] after {} tokens",
                token_count
            )));
        }

        info!("Completion stream finished after {} tokens", token_count);
        Ok(())
    }
}

impl ChatCompletion for OpenAiChat {
    fn stream_chat(&self, messages: Vec<ChatMessage>) -> mpsc::Receiver<Result<String>> {
        let (tx, rx) = mpsc::channel(TOKEN_BUFFER);
        let panic_tx = tx.clone();
        let client = self.clone();

        let reader = tokio::task::spawn_blocking(move || {
            if let Err(e) = client.stream_blocking(&messages, &tx) {
                warn!("Completion stream failed: {}", e);
                let _ = tx.blocking_send(Err(e));
            }
        });

        // A reader that dies must not look like a finished answer
        tokio::spawn(async move {
            if let Err(e) = reader.await {
                error!("Completion reader task failed: {}", e);
                let _ = panic_tx
                    .send(Err(RagError::GenerationService(
                        "completion stream aborted".to_string(),
                    )))
                    .await;
            }
        });

        rx
    }
}
