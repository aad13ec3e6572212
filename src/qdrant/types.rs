//! Shared types used by the Qdrant client and helpers.

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::retry::Retryable;

/// Errors returned while interacting with Qdrant.
#[derive(Debug, Error)]
pub enum QdrantError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid Qdrant URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// Qdrant responded with an unexpected status code.
    #[error("Unexpected Qdrant response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned from Qdrant.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// A row could not be turned into a point.
    #[error("Invalid point: {0}")]
    InvalidPoint(String),
}

impl Retryable for QdrantError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Http(error) => error.is_retryable(),
            Self::UnexpectedStatus { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Self::InvalidUrl(_) | Self::InvalidPoint(_) => false,
        }
    }
}

/// Scroll API response wrapper.
#[derive(Debug, Deserialize)]
pub(crate) struct ScrollResponse {
    pub(crate) result: ScrollResult,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollResult {
    pub(crate) points: Vec<ScrollPoint>,
    #[serde(default)]
    pub(crate) next_page_offset: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScrollPoint {
    #[serde(default)]
    pub(crate) payload: Option<Map<String, Value>>,
}

/// Collection info response, reduced to the vector width.
#[derive(Debug, Deserialize)]
pub(crate) struct CollectionInfoResponse {
    pub(crate) result: CollectionInfo,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionInfo {
    pub(crate) config: CollectionConfig,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionConfig {
    pub(crate) params: CollectionParams,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CollectionParams {
    pub(crate) vectors: Value,
}

impl CollectionInfo {
    /// Width of the unnamed vector, when the collection uses a single vector.
    pub(crate) fn vector_size(&self) -> Option<usize> {
        self.config
            .params
            .vectors
            .get("size")
            .and_then(Value::as_u64)
            .map(|size| size as usize)
    }
}
