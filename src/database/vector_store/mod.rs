
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::lancedb::LanceIndex;
use super::memory::MemoryIndex;
use super::{NewRecord, VectorIndex};
use crate::config::Config;
use crate::{RagError, Result};

/// Minimum similarity used when a caller does not pick one
pub const DEFAULT_THRESHOLD: f32 = 0.7;
pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// Parameters of a similarity query
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub vector: Vec<f32>,
    pub threshold: f32,
    pub limit: usize,
}

impl RetrievalQuery {
    #[inline]
    pub fn new(vector: Vec<f32>) -> Self {
        Self {
            vector,
            threshold: DEFAULT_THRESHOLD,
            limit: DEFAULT_LIMIT,
        }
    }

    #[inline]
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    #[inline]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Check the query against an index of `dimension`-wide vectors
    #[inline]
    pub fn validate(&self, dimension: usize) -> Result<()> {
        validate_vector(&self.vector, dimension)?;
        validate_threshold(self.threshold)?;
        validate_limit(self.limit)
    }
}

/// A stored record ranked against a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    pub id: String,
    pub content: String,
    /// Cosine similarity to the query vector
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub ids: Vec<String>,
    pub count: usize,
}

fn validate_vector(vector: &[f32], dimension: usize) -> Result<()> {
    if vector.is_empty() {
        return Err(RagError::InvalidInput(
            "query vector must not be empty".to_string(),
        ));
    }
    if vector.len() != dimension {
        return Err(RagError::InvalidInput(format!(
            "query vector must have {} dimensions, got {}",
            dimension,
            vector.len()
        )));
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(RagError::InvalidInput(
            "query vector contains non-finite values".to_string(),
        ));
    }
    Ok(())
}

fn validate_threshold(threshold: f32) -> Result<()> {
    if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
        return Err(RagError::InvalidInput(format!(
            "threshold must be between -1 and 1, got {}",
            threshold
        )));
    }
    Ok(())
}

fn validate_limit(limit: usize) -> Result<()> {
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(RagError::InvalidInput(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }
    Ok(())
}

/// Similarity search over an injected vector index.
///
/// Every call validates its arguments before the index is touched; rows come
/// back ordered by descending similarity, filtered by threshold and truncated
/// to the limit.
#[derive(Clone)]
pub struct VectorStore {
    index: Arc<dyn VectorIndex>,
    dimension: usize,
}

impl VectorStore {
    #[inline]
    pub fn new(index: Arc<dyn VectorIndex>, dimension: usize) -> Self {
        Self { index, dimension }
    }

    /// Open the LanceDB store described by `config`
    #[inline]
    pub async fn open(config: &Config) -> Result<Self> {
        let uri = config.store_uri();
        let dimension = config.store.embedding_dimension;
        let index = LanceIndex::connect(&uri, &config.store.table, dimension).await?;
        Ok(Self::new(Arc::new(index), dimension))
    }

    /// A store backed by a fresh in-memory index
    #[inline]
    pub fn in_memory(dimension: usize) -> Self {
        Self::new(Arc::new(MemoryIndex::new(dimension)), dimension)
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Persist `records` in a single batch and return their ids in input order.
    ///
    /// Nothing is written unless every record is valid.
    #[inline]
    pub async fn insert_many(&self, records: Vec<NewRecord>) -> Result<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome {
                ids: Vec::new(),
                count: 0,
            });
        }

        for (position, record) in records.iter().enumerate() {
            if record.embedding.len() != self.dimension {
                return Err(RagError::InvalidInput(format!(
                    "record {} has {} dimensions, expected {}",
                    position,
                    record.embedding.len(),
                    self.dimension
                )));
            }
            if record.content.trim().is_empty() {
                return Err(RagError::InvalidInput(format!(
                    "record {} has empty content",
                    position
                )));
            }
        }

        let ids = self.index.insert(records).await?;
        info!("Stored {} embeddings", ids.len());

        Ok(InsertOutcome {
            count: ids.len(),
            ids,
        })
    }

    /// Records most similar to `query_vector`, best first
    #[inline]
    pub async fn query(
        &self,
        query_vector: &[f32],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        validate_vector(query_vector, self.dimension)?;
        validate_threshold(threshold)?;
        validate_limit(limit)?;

        self.ranked(query_vector, threshold, limit, None).await
    }

    #[inline]
    pub async fn search(&self, query: &RetrievalQuery) -> Result<Vec<SimilarityResult>> {
        self.query(&query.vector, query.threshold, query.limit).await
    }

    /// The single best match above `threshold`, if any
    #[inline]
    pub async fn find_most_similar(
        &self,
        query_vector: &[f32],
        threshold: f32,
    ) -> Result<Option<SimilarityResult>> {
        let mut results = self.query(query_vector, threshold, 1).await?;
        Ok(results.pop())
    }

    /// Neighbours of the stored record `id`, never including the record itself
    #[inline]
    pub async fn find_similar_excluding_self(
        &self,
        id: &str,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<SimilarityResult>> {
        if id.trim().is_empty() {
            return Err(RagError::InvalidInput("record id must not be empty".to_string()));
        }
        validate_threshold(threshold)?;
        validate_limit(limit)?;

        let embedding = self
            .index
            .embedding_of(id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("no record with id {}", id)))?;

        self.ranked(&embedding, threshold, limit, Some(id)).await
    }

    /// Run several queries concurrently; fails as a whole if any one fails
    #[inline]
    pub async fn batch_query(
        &self,
        queries: &[Vec<f32>],
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<Vec<SimilarityResult>>> {
        let outcomes = join_all(
            queries
                .iter()
                .map(|vector| self.query(vector, threshold, limit)),
        )
        .await;

        let total = outcomes.len();
        let mut results = Vec::with_capacity(total);
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(rows) => results.push(rows),
                Err(e) => {
                    warn!("Batch query failed: {}", e);
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(RagError::BatchFailed { failed, total });
        }
        Ok(results)
    }

    #[inline]
    pub async fn count(&self) -> Result<u64> {
        self.index.count().await
    }

    /// Ask the index to build an ANN index; `false` when it declined
    #[inline]
    pub async fn create_vector_index(&self) -> Result<bool> {
        self.index.create_vector_index().await
    }

    async fn ranked(
        &self,
        vector: &[f32],
        threshold: f32,
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<SimilarityResult>> {
        let rows = self.index.query(vector, limit, exclude_id).await?;

        let mut results: Vec<SimilarityResult> = rows
            .into_iter()
            .map(|row| SimilarityResult {
                id: row.id,
                content: row.content,
                similarity: row.similarity,
            })
            .filter(|result| result.similarity >= threshold)
            .collect();

        // Stable: equal similarities keep the index's order
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(limit);

        debug!(
            "Similarity query kept {} results at threshold {}",
            results.len(),
            threshold
        );
        Ok(results)
    }
}
