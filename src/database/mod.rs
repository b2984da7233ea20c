// Database module
// The vector index capability, its LanceDB and in-memory drivers, and the
// similarity-search adapter built on top of them

pub mod lancedb;
pub mod memory;
pub mod vector_store;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub use self::lancedb::LanceIndex;
pub use memory::MemoryIndex;
pub use vector_store::{
    DEFAULT_LIMIT, DEFAULT_THRESHOLD, InsertOutcome, MAX_LIMIT, RetrievalQuery, SimilarityResult,
    VectorStore,
};

/// A record to be written; the index assigns its id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub embedding: Vec<f32>,
    pub content: String,
}

/// A persisted record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
}

/// A row returned by a nearest-neighbour query
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedRow {
    pub id: String,
    pub content: String,
    /// Cosine similarity to the query vector, computed from the stored embedding
    pub similarity: f32,
}

/// Storage that can persist vectors and answer nearest-neighbour queries.
///
/// Implementations score rows with [`cosine_similarity`](crate::embeddings::cosine_similarity)
/// against the stored embedding, so a row scores the same whichever index holds
/// it, and return rows in descending similarity order, breaking ties in a fixed
/// order for a given store state.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Persist `records` as one unit and return the assigned ids in input order
    async fn insert(&self, records: Vec<NewRecord>) -> Result<Vec<String>>;

    /// The `limit` rows nearest to `vector`, skipping the row whose id is `exclude_id`
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<IndexedRow>>;

    /// Embedding of the record with `id`, if any
    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>>;

    async fn count(&self) -> Result<u64>;

    /// Build an approximate nearest-neighbour index if the backend supports one
    /// and holds enough rows. Returns whether an index was built.
    async fn create_vector_index(&self) -> Result<bool> {
        Ok(false)
    }
}
