//! Deterministic embedding provider for tests and offline runs.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::provider::EmbeddingProvider;
use crate::{RagError, Result};

/// Produces vectors from a hash of the input text, unless a fixed vector was registered
/// for that exact text.
#[derive(Debug)]
pub struct MockEmbeddings {
    dimension: usize,
    fixed: HashMap<String, Vec<f32>>,
    failure: Option<String>,
    calls: AtomicUsize,
    requests: Mutex<Vec<Vec<String>>>,
}

impl MockEmbeddings {
    #[inline]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            fixed: HashMap::new(),
            failure: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Return `vector` whenever `text` is embedded
    #[inline]
    pub fn with_vector(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.fixed.insert(text.into(), vector);
        self
    }

    /// Fail every request with an embedding service error carrying `message`
    #[inline]
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Number of `embed_batch` calls made so far
    #[inline]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Inputs of every request, in call order
    #[inline]
    pub fn requests(&self) -> Vec<Vec<String>> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_default()
    }

    #[inline]
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.fixed.get(text) {
            return vector.clone();
        }

        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let bytes = hasher.finish().to_le_bytes();

        let mut embedding: Vec<f32> = (0..self.dimension)
            .map(|i| f32::from(bytes[i % 8]) / 255.0 + 0.01)
            .collect();

        let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(inputs.to_vec());
        }

        if let Some(message) = &self.failure {
            return Err(RagError::EmbeddingService(message.clone()));
        }

        Ok(inputs.iter().map(|text| self.vector_for(text)).collect())
    }

    fn model(&self) -> &str {
        "mock-embedding"
    }
}
