// Embeddings module
// Document chunking, the embedding service client, and vector similarity

pub mod chunking;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod similarity;

pub use chunking::{ChunkingConfig, chunk_text};
pub use mock::MockEmbeddings;
pub use openai::OpenAiEmbeddings;
pub use provider::{EmbeddedChunk, EmbeddingProvider, embed_chunks, embed_single, embed_text};
pub use similarity::{cosine_distance, cosine_similarity};
