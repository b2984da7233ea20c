
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{RagError, Result};

/// Sentinel that separates hand-curated sections in reference documents
pub const DEFAULT_SEPARATOR: &str = "-------split line-------";
/// Maximum chunk length in characters
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 8000;

/// Configuration for document chunking
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkingConfig {
    /// Literal separator between sections. Empty disables separator splitting.
    pub separator: String,
    /// Maximum chunk size in characters before fixed-width slicing
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    #[inline]
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_string(),
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
        }
    }
}

impl ChunkingConfig {
    /// The separator, or `None` when splitting on a separator is disabled
    #[inline]
    pub fn separator(&self) -> Option<&str> {
        (!self.separator.is_empty()).then_some(self.separator.as_str())
    }

    #[inline]
    pub fn chunk(&self, text: &str) -> Result<Vec<String>> {
        chunk_text(text, self.separator(), self.max_chunk_size)
    }
}

/// Split `text` into chunks of at most `max_chunk_size` characters.
///
/// Pieces between separators that are blank after trimming are dropped; surviving
/// pieces keep their surrounding whitespace. Oversized pieces are cut into fixed-width
/// slices with no regard for word or sentence boundaries.
#[inline]
pub fn chunk_text(text: &str, separator: Option<&str>, max_chunk_size: usize) -> Result<Vec<String>> {
    if max_chunk_size == 0 {
        return Err(RagError::InvalidInput(
            "max chunk size must be greater than 0".to_string(),
        ));
    }

    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let pieces: Vec<&str> = match separator.filter(|s| !s.is_empty()) {
        Some(separator) => text
            .split(separator)
            .filter(|piece| !piece.trim().is_empty())
            .collect(),
        None => vec![text],
    };

    let mut chunks = Vec::with_capacity(pieces.len());
    for piece in pieces {
        split_fixed_width(piece, max_chunk_size, &mut chunks);
    }

    debug!(
        "Chunked {} characters into {} chunks (max {} characters each)",
        text.chars().count(),
        chunks.len(),
        max_chunk_size
    );

    Ok(chunks)
}

/// Cut `piece` into slices of exactly `width` characters, the last possibly shorter
fn split_fixed_width(piece: &str, width: usize, out: &mut Vec<String>) {
    let mut current = String::new();
    let mut count = 0;

    for ch in piece.chars() {
        current.push(ch);
        count += 1;
        if count == width {
            out.push(std::mem::take(&mut current));
            count = 0;
        }
    }

    if !current.is_empty() {
        out.push(current);
    }
}
