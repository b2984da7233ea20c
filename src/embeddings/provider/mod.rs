
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embeddings::chunking::ChunkingConfig;
use crate::{RagError, Result};

/// An external service that turns text into fixed-dimension vectors.
///
/// Implementations return exactly one vector per input, in input order.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Name of the embedding model requests are made against
    fn model(&self) -> &str;
}

/// A chunk of document text paired with its embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Chunk `text` and embed every chunk. Blank input yields no chunks and makes no request.
#[inline]
pub async fn embed_text(
    provider: &dyn EmbeddingProvider,
    text: &str,
    chunking: &ChunkingConfig,
) -> Result<Vec<EmbeddedChunk>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chunks = chunking.chunk(text)?;
    embed_chunks(provider, chunks).await
}

/// Embed pre-chunked text; `result[i]` holds the embedding of `chunks[i]`.
#[inline]
pub async fn embed_chunks(
    provider: &dyn EmbeddingProvider,
    chunks: Vec<String>,
) -> Result<Vec<EmbeddedChunk>> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    debug!(
        "Embedding {} chunks with model {}",
        chunks.len(),
        provider.model()
    );

    let embeddings = provider
        .embed_batch(&chunks)
        .await
        .map_err(into_embedding_error)?;

    if embeddings.len() != chunks.len() {
        return Err(RagError::EmbeddingService(format!(
            "Mismatch between request and response counts: {} vs {}",
            chunks.len(),
            embeddings.len()
        )));
    }

    Ok(chunks
        .into_iter()
        .zip(embeddings)
        .map(|(text, embedding)| EmbeddedChunk { text, embedding })
        .collect())
}

/// Embed a single piece of text, such as a user query
#[inline]
pub async fn embed_single(provider: &dyn EmbeddingProvider, text: &str) -> Result<Vec<f32>> {
    if text.trim().is_empty() {
        return Err(RagError::InvalidInput(
            "text to embed cannot be empty".to_string(),
        ));
    }

    let mut embeddings = provider
        .embed_batch(&[text.to_string()])
        .await
        .map_err(into_embedding_error)?;

    match embeddings.len() {
        1 => Ok(embeddings.remove(0)),
        n => Err(RagError::EmbeddingService(format!(
            "expected 1 embedding, received {n}"
        ))),
    }
}

fn into_embedding_error(error: RagError) -> RagError {
    match error {
        RagError::EmbeddingService(_) | RagError::InvalidInput(_) => error,
        other => RagError::EmbeddingService(other.to_string()),
    }
}
