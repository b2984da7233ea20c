// LanceDB vector index
// Persists embeddings on disk (or object storage) and answers cosine-similarity queries

#[cfg(test)]
mod tests;

use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use super::{IndexedRow, NewRecord, VectorIndex};
use crate::embeddings::cosine_similarity;
use crate::{RagError, Result};

const ID_COLUMN: &str = "id";
const CONTENT_COLUMN: &str = "content";
const EMBEDDING_COLUMN: &str = "embedding";

/// Rows needed before an IVF-PQ index can be trained
pub const MIN_INDEX_ROWS: u64 = 256;

/// Vector index backed by a LanceDB table
pub struct LanceIndex {
    connection: Connection,
    table_name: String,
    dimension: usize,
}

impl LanceIndex {
    /// Connect to the database at `uri` and open (or create) `table_name`.
    ///
    /// An existing table whose embedding width differs from `dimension` is rejected
    /// rather than recreated, since stored records are never rewritten.
    #[inline]
    pub async fn connect(uri: &str, table_name: &str, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::InvalidInput(
                "embedding dimension must be greater than 0".to_string(),
            ));
        }

        // Local paths need their parent directory; URIs with a scheme are left to LanceDB
        if !uri.contains("://") {
            if let Some(parent) = Path::new(uri).parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::Store(format!("Failed to create vector database directory: {}", e))
                })?;
            }
        }

        debug!("Connecting to LanceDB at {}", uri);
        let connection = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to connect to LanceDB: {}", e)))?;

        let index = Self {
            connection,
            table_name: table_name.to_string(),
            dimension,
        };
        index.initialize_table().await?;

        info!(
            "Vector index ready (table {}, {} dimensions)",
            index.table_name, index.dimension
        );
        Ok(index)
    }

    /// Create the table if it does not exist, otherwise verify its vector width
    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to list tables: {}", e)))?;

        if table_names.contains(&self.table_name) {
            let existing = self.detect_existing_vector_dimension().await?;
            if existing != self.dimension {
                return Err(RagError::Store(format!(
                    "Table {} stores {}-dimensional embeddings but {} were configured",
                    self.table_name, existing, self.dimension
                )));
            }
            debug!("Table {} already exists", self.table_name);
            return Ok(());
        }

        info!(
            "Creating table {} with {} dimensions",
            self.table_name, self.dimension
        );
        self.connection
            .create_empty_table(&self.table_name, self.create_schema())
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to create table: {}", e)))?;

        Ok(())
    }

    /// Detect vector dimension from existing table schema
    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;
        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Store(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == EMBEDDING_COLUMN)
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::Store("Could not find embedding column or determine dimension".to_string())
            })
    }

    fn create_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(vec![
            Field::new(ID_COLUMN, DataType::Utf8, false),
            Field::new(CONTENT_COLUMN, DataType::Utf8, false),
            Field::new(
                EMBEDDING_COLUMN,
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    async fn open_table(&self) -> Result<lancedb::Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to open table: {}", e)))
    }

    fn create_record_batch(&self, ids: &[String], records: &[NewRecord]) -> Result<RecordBatch> {
        let mut flat_values = Vec::with_capacity(records.len() * self.dimension);
        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
            flat_values.extend_from_slice(&record.embedding);
        }

        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array = FixedSizeListArray::try_new(
            field,
            self.dimension as i32,
            Arc::new(Float32Array::from(flat_values)),
            None,
        )
        .map_err(|e| RagError::Store(format!("Failed to create vector array: {}", e)))?;

        let contents: Vec<&str> = records.iter().map(|r| r.content.as_str()).collect();
        let arrays: Vec<Arc<dyn Array>> = vec![
            Arc::new(StringArray::from_iter_values(ids)),
            Arc::new(StringArray::from(contents)),
            Arc::new(vector_array),
        ];

        RecordBatch::try_new(self.create_schema(), arrays)
            .map_err(|e| RagError::Store(format!("Failed to create record batch: {}", e)))
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Quote a value for use inside a LanceDB filter expression
fn sql_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Store(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Store(format!("Invalid {} column type", name)))
}

/// Rows of a search batch, scored against `query` from their stored embeddings.
///
/// LanceDB's `_distance` is only used for candidate selection; rescoring keeps the
/// similarity exact where `1 - distance` in f32 would drift near the threshold.
fn parse_rows(batch: &RecordBatch, query: &[f32]) -> Result<Vec<IndexedRow>> {
    let ids = string_column(batch, ID_COLUMN)?;
    let contents = string_column(batch, CONTENT_COLUMN)?;

    (0..batch.num_rows())
        .map(|row| {
            let embedding = parse_embedding(batch, row)?;
            Ok(IndexedRow {
                id: ids.value(row).to_string(),
                content: contents.value(row).to_string(),
                similarity: cosine_similarity(query, &embedding)?,
            })
        })
        .collect()
}

fn parse_embedding(batch: &RecordBatch, row: usize) -> Result<Vec<f32>> {
    let vectors = batch
        .column_by_name(EMBEDDING_COLUMN)
        .ok_or_else(|| RagError::Store("Missing embedding column".to_string()))?
        .as_any()
        .downcast_ref::<FixedSizeListArray>()
        .ok_or_else(|| RagError::Store("Invalid embedding column type".to_string()))?;

    let values = vectors.value(row);
    let values = values
        .as_any()
        .downcast_ref::<Float32Array>()
        .ok_or_else(|| RagError::Store("Invalid embedding value type".to_string()))?;

    Ok(values.values().to_vec())
}

#[async_trait]
impl VectorIndex for LanceIndex {
    async fn insert(&self, records: Vec<NewRecord>) -> Result<Vec<String>> {
        if records.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<String> = records
            .iter()
            .map(|_| Uuid::new_v4().to_string())
            .collect();
        let record_batch = self.create_record_batch(&ids, &records)?;

        let table = self.open_table().await?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);

        // A single add is a single table version: every row becomes visible or none does
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to insert records: {}", e)))?;

        info!("Successfully stored {} records", ids.len());
        Ok(ids)
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        exclude_id: Option<&str>,
    ) -> Result<Vec<IndexedRow>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        let table = self.open_table().await?;
        let mut query = table
            .vector_search(vector)
            .map_err(|e| RagError::Store(format!("Failed to create vector search: {}", e)))?
            .column(EMBEDDING_COLUMN)
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(id) = exclude_id {
            query = query.only_if(format!("{} != {}", ID_COLUMN, sql_literal(id)));
        }

        let mut stream = query
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to execute search: {}", e)))?;

        let mut rows = Vec::new();
        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Store(format!("Failed to read result stream: {}", e)))?
        {
            rows.extend(parse_rows(&batch, vector)?);
        }

        rows.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        debug!("Vector search returned {} rows", rows.len());
        Ok(rows)
    }

    async fn embedding_of(&self, id: &str) -> Result<Option<Vec<f32>>> {
        let table = self.open_table().await?;
        let mut stream = table
            .query()
            .only_if(format!("{} = {}", ID_COLUMN, sql_literal(id)))
            .limit(1)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to look up record: {}", e)))?;

        while let Some(batch) = stream
            .try_next()
            .await
            .map_err(|e| RagError::Store(format!("Failed to read result stream: {}", e)))?
        {
            if batch.num_rows() > 0 {
                return parse_embedding(&batch, 0).map(Some);
            }
        }

        Ok(None)
    }

    async fn count(&self) -> Result<u64> {
        let table = self.open_table().await?;
        let count = table
            .count_rows(None)
            .await
            .map_err(|e| RagError::Store(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }

    async fn create_vector_index(&self) -> Result<bool> {
        let rows = self.count().await?;
        if rows < MIN_INDEX_ROWS {
            debug!(
                "Skipping vector index: {} rows, {} needed",
                rows, MIN_INDEX_ROWS
            );
            return Ok(false);
        }

        debug!("Creating cosine vector index on {}", self.table_name);
        let table = self.open_table().await?;
        let builder = lancedb::index::vector::IvfPqIndexBuilder::default()
            .distance_type(DistanceType::Cosine);
        table
            .create_index(&[EMBEDDING_COLUMN], lancedb::index::Index::IvfPq(builder))
            .replace(true)
            .execute()
            .await
            .map_err(|e| RagError::Store(format!("Failed to create vector index: {}", e)))?;

        info!("Vector index created over {} rows", rows);
        Ok(true)
    }
}
