// Retrieval module
// Turns a user query into the stored passages most relevant to it


use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::Result;
use crate::config::RetrievalConfig;
use crate::database::{SimilarityResult, VectorStore};
use crate::embeddings::{EmbeddingProvider, embed_single};

/// Default number of passages handed to the generator
pub const DEFAULT_TOP_K: usize = 5;

/// Embeds queries and looks them up in the vector store
#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<VectorStore>,
    threshold: f32,
}

impl Retriever {
    #[inline]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<VectorStore>, threshold: f32) -> Self {
        Self {
            embedder,
            store,
            threshold,
        }
    }

    #[inline]
    pub fn from_config(
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<VectorStore>,
        config: &RetrievalConfig,
    ) -> Self {
        Self::new(embedder, store, config.threshold)
    }

    #[inline]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    #[inline]
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Up to `top_k` stored passages similar to `user_text`, best first.
    ///
    /// Blank text fails before the embedding service is called. Store results
    /// and errors are passed through unchanged.
    #[inline]
    pub async fn retrieve(&self, user_text: &str, top_k: usize) -> Result<Vec<SimilarityResult>> {
        debug!("Retrieving up to {} passages", top_k);

        let query_vector = embed_single(self.embedder.as_ref(), user_text).await?;
        let results = self
            .store
            .query(&query_vector, self.threshold, top_k)
            .await?;

        info!(
            "Retrieved {} passages at threshold {}",
            results.len(),
            self.threshold
        );
        Ok(results)
    }
}

/// JSON shape of a search outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<SimilarityResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_matches: Option<usize>,
}

impl From<Result<Vec<SimilarityResult>>> for SearchResponse {
    #[inline]
    fn from(outcome: Result<Vec<SimilarityResult>>) -> Self {
        match outcome {
            Ok(results) => Self {
                success: true,
                total_matches: Some(results.len()),
                results: Some(results),
                error: None,
            },
            Err(e) => Self {
                success: false,
                results: None,
                error: Some(e.to_string()),
                total_matches: None,
            },
        }
    }
}
