
use serde::{Deserialize, Serialize};

use crate::database::SimilarityResult;

pub const SEARCHING_MESSAGE: &str = "searching for relevant content...";
pub const DONE_MESSAGE: &str = "conversation complete";
pub const RETRIEVAL_FAILED_PREFIX: &str = "retrieval failed: ";

/// One event of a streamed chat response.
///
/// Serialized as `{"type": "...", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum StreamEvent {
    Retrieval(RetrievalUpdate),
    Content {
        /// The token just received
        content: String,
        /// Everything received so far, including `content`
        accumulated: String,
    },
    Error {
        message: String,
    },
    #[serde(rename_all = "camelCase")]
    Done {
        message: String,
        /// Length of the full response in characters
        total_length: usize,
        retrieval_count: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RetrievalUpdate {
    Searching {
        message: String,
    },
    Found {
        results: Vec<SimilarityResult>,
        count: usize,
    },
}

impl StreamEvent {
    #[inline]
    pub fn searching() -> Self {
        Self::Retrieval(RetrievalUpdate::Searching {
            message: SEARCHING_MESSAGE.to_string(),
        })
    }

    #[inline]
    pub fn found(results: Vec<SimilarityResult>) -> Self {
        Self::Retrieval(RetrievalUpdate::Found {
            count: results.len(),
            results,
        })
    }

    #[inline]
    pub fn content(token: impl Into<String>, accumulated: impl Into<String>) -> Self {
        Self::Content {
            content: token.into(),
            accumulated: accumulated.into(),
        }
    }

    #[inline]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    #[inline]
    pub fn retrieval_failed(reason: impl std::fmt::Display) -> Self {
        Self::error(format!("{}{}", RETRIEVAL_FAILED_PREFIX, reason))
    }

    #[inline]
    pub fn done(response: &str, retrieval_count: usize) -> Self {
        Self::Done {
            message: DONE_MESSAGE.to_string(),
            total_length: response.chars().count(),
            retrieval_count,
        }
    }

    /// Whether this event ends the stream
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Done { .. })
    }

    /// Frame the event as a Server-Sent Events message: `data: <json>\n\n`
    #[inline]
    pub fn to_sse_frame(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
