// In-memory vector index
// Exhaustive cosine scan over records held in insertion order


use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{IndexedRow, NewRecord, StoredRecord, VectorIndex};
use crate::embeddings::cosine_similarity;
use crate::{RagError, Result};

/// Vector index that keeps every record in memory.
///
/// Ties in similarity keep insertion order, so results are stable for a given state.
#[derive(Debug)]
pub struct MemoryIndex {
    dimension: usize,
    records: RwLock<Vec<StoredRecord>>,
}

impl MemoryIndex {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            records: RwLock::new(Vec::new()),
        }
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Copy of every stored record
    #[inline]
    pub async fn records(&self) -> Vec<StoredRecord> {
        self.records.read().await.clone()
    }
}

#[async_trait]
impl VectorIndex for MemoryIndex {
    async fn insert(&self, records: Vec<NewRecord>) -> Result<Vec<String>> {
        if let Some(bad) = records.iter().find(|r| r.embedding.len() != self.dimension) {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: bad.embedding.len(),
            });
        }

        let stored: Vec<StoredRecord> = records
            .into_iter()
            .map(|record| StoredRecord {
                id: Uuid::new_v4().to_string(),
                content: record.content,
                embedding: record.embedding,
            })
            .collect();
        let ids = stored.iter().map(|r| r.id.clone()).collect();

        self.records.write().await.extend(stored);
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<IndexedRow>> {
        let records = self.records.read().await;

        let mut rows = Vec::with_capacity(records.len());
        for record in records.iter() {
            if exclude_id == Some(record.id.as_str()) {
                continue;
            }
            rows.push(IndexedRow {
                id: record.id.clone(),
                content: record.content.clone(),
                similarity: cosine_similarity(vector, &record.embedding)?,
            });
        }

        // Stable sort keeps insertion order among equal scores
        rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        rows.truncate(limit);

        debug!("Memory index scan returned {} rows", rows.len());
        Ok(rows)
    }

    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .find(|r| r.id == id)
            .map(|r| r.embedding.clone()))
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.records.read().await.len() as u64)
    }
}
