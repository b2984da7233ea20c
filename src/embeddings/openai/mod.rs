#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::ApiConfig;
use crate::embeddings::provider::EmbeddingProvider;
use crate::{RagError, Result};

/// Client for an OpenAI-compatible `POST /embeddings` endpoint
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    endpoint: Url,
    api_key: String,
    model: String,
    batch_size: usize,
    agent: ureq::Agent,
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Build an HTTP agent that hands non-2xx responses back so their bodies can be read
fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build()
        .into()
}

/// Extract the upstream error message from a failed API response
pub(crate) fn api_error_message(status: u16, body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => format!("HTTP {}: {}", status, envelope.error.message),
        Err(_) if body.trim().is_empty() => format!("HTTP {}", status),
        Err(_) => format!("HTTP {}: {}", status, body.trim()),
    }
}

impl OpenAiEmbeddings {
    #[inline]
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let endpoint = config
            .endpoint_url("embeddings")
            .map_err(|e| RagError::Config(e.to_string()))?;

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone(),
            model: config.embedding_model.clone(),
            batch_size: config.batch_size.max(1) as usize,
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
        })
    }

    /// Use a different embedding model for subsequent requests
    #[inline]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    #[inline]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    fn embed_blocking(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(inputs.len());

        // Process in batches to stay under the provider's per-request input limit
        for batch in inputs.chunks(self.batch_size) {
            results.extend(self.embed_single_batch(batch)?);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn embed_single_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!(
            "Requesting {} embeddings from {} with model {}",
            inputs.len(),
            self.endpoint,
            self.model
        );

        let request_json = serde_json::to_string(&EmbeddingRequest {
            model: &self.model,
            input: inputs,
        })
        .map_err(|e| {
            RagError::EmbeddingService(format!("Failed to serialize embedding request: {}", e))
        })?;

        let mut request = self
            .agent
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            request = request.header("Authorization", format!("Bearer {}", self.api_key));
        }

        let mut response = request
            .send(&request_json)
            .map_err(|e| RagError::EmbeddingService(format!("Request error: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| RagError::EmbeddingService(format!("Failed to read response: {}", e)))?;

        if !(200..300).contains(&status) {
            warn!("Embedding request failed with status {}", status);
            return Err(RagError::EmbeddingService(api_error_message(status, &body)));
        }

        let parsed: EmbeddingResponse = serde_json::from_str(&body).map_err(|e| {
            RagError::EmbeddingService(format!("Failed to parse embedding response: {}", e))
        })?;

        order_by_index(parsed.data, inputs.len())
    }
}

/// Arrange response items by their `index` so that `result[i]` answers `input[i]`
fn order_by_index(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        return Err(RagError::EmbeddingService(format!(
            "Mismatch between request and response counts: {} vs {}",
            expected,
            data.len()
        )));
    }

    data.sort_by_key(|item| item.index);

    if data.iter().enumerate().any(|(i, item)| item.index != i) {
        return Err(RagError::EmbeddingService(
            "Embedding response indices do not cover the request".to_string(),
        ));
    }

    Ok(data.into_iter().map(|item| item.embedding).collect())
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let client = self.clone();
        let inputs = inputs.to_vec();
        tokio::task::spawn_blocking(move || client.embed_blocking(&inputs))
            .await
            .map_err(|e| RagError::EmbeddingService(format!("Embedding task failed: {}", e)))?
    }

    fn model(&self) -> &str {
        &self.model
    }
}
