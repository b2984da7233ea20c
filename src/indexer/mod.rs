// Indexer module
// Write path: document text is chunked, embedded and stored in one batch


use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::database::{NewRecord, VectorStore};
use crate::embeddings::{ChunkingConfig, EmbeddingProvider, embed_chunks};
use crate::{RagError, Result};

/// Outcome of ingesting one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub chunk_count: usize,
    pub ids: Vec<String>,
}

/// Turns documents into stored embeddings
pub struct Indexer {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<VectorStore>,
}

impl Indexer {
    #[inline]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Chunk, embed and store `text`.
    ///
    /// Whitespace-only chunks are dropped before embedding. Either every chunk
    /// is stored or none is.
    #[inline]
    pub async fn ingest_text(&self, text: &str, options: &ChunkingConfig) -> Result<IngestReport> {
        let chunks: Vec<String> = options
            .chunk(text)?
            .into_iter()
            .filter(|chunk| !chunk.trim().is_empty())
            .collect();

        if chunks.is_empty() {
            debug!("Nothing to ingest");
            return Ok(IngestReport {
                chunk_count: 0,
                ids: Vec::new(),
            });
        }

        info!("Embedding {} chunks", chunks.len());
        let embedded = embed_chunks(self.embedder.as_ref(), chunks).await?;
        let chunk_count = embedded.len();

        let records = embedded
            .into_iter()
            .map(|chunk| NewRecord {
                embedding: chunk.embedding,
                content: chunk.text,
            })
            .collect();
        let outcome = self.store.insert_many(records).await?;

        info!("Ingested {} chunks", outcome.count);
        Ok(IngestReport {
            chunk_count,
            ids: outcome.ids,
        })
    }

    /// Read a UTF-8 document from disk and ingest it
    #[inline]
    pub async fn ingest_file(&self, path: &Path, options: &ChunkingConfig) -> Result<IngestReport> {
        debug!("Reading {}", path.display());
        let text = tokio::fs::read_to_string(path).await.map_err(|e| {
            RagError::InvalidInput(format!("Failed to read {}: {}", path.display(), e))
        })?;

        self.ingest_text(&text, options).await
    }
}
