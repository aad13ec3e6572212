//! Error definitions and per-document outcomes for the reconciliation engine.

use anyhow::Error as TokenizerError;
use thiserror::Error;

use crate::corpus::CorpusError;
use crate::embedding::EmbeddingClientError;
use crate::extract::ExtractError;
use crate::store::StoreError;

/// Errors produced while turning page text into chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// Ingestion configured an impossible chunk length.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
    /// Tokenizer resources were unavailable for the configured model.
    #[error("failed to initialize tokenizer for model '{model}': {source}")]
    Tokenizer {
        /// Embedding model we attempted to load.
        model: String,
        /// Underlying error raised by the tokenizer library.
        #[source]
        source: TokenizerError,
    },
}

/// Pre-write invariant violations and store failures raised by the dual-collection writer.
#[derive(Debug, Error)]
pub enum WriteError {
    /// The batch broke a row-count, field or dimension invariant and was not sent.
    #[error("{collection}: {reason}")]
    Rejected {
        /// Target collection.
        collection: String,
        /// Which invariant failed.
        reason: String,
    },
    /// The store failed while applying a validated batch or delete.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a single document ended in the failed state.
///
/// None of these abort the run; the engine records the message and moves on.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file could not be read.
    #[error("failed to read source file: {0}")]
    Unreadable(#[source] std::io::Error),
    /// The extractor rejected the file.
    #[error("extraction failed: {0}")]
    Extraction(#[from] ExtractError),
    /// Extraction succeeded but produced no page or no chunk with text.
    #[error("no usable text extracted ({0})")]
    ExtractionEmpty(String),
    /// Returned embedding count or width disagrees with the input.
    #[error("embedding mismatch for {what}: {detail}")]
    EmbeddingMismatch {
        /// Which input was embedded (`chunks` or `page summaries`).
        what: &'static str,
        /// Expected versus received.
        detail: String,
    },
    /// The embedding provider did not answer in time.
    #[error("embedding gateway timed out: {0}")]
    GatewayTimeout(String),
    /// The embedding provider failed or could not be reached.
    #[error("embedding gateway error: {0}")]
    GatewayError(String),
    /// A batch failed its pre-write check.
    #[error("write rejected: {0}")]
    WriteRejected(String),
    /// A store call failed mid-document.
    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),
    /// The chunk id sequence moved underneath this document.
    #[error("chunk id sequence conflict: {0}")]
    Sequence(String),
}

impl From<EmbeddingClientError> for DocumentError {
    fn from(error: EmbeddingClientError) -> Self {
        match error {
            EmbeddingClientError::Timeout(message) => Self::GatewayTimeout(message),
            EmbeddingClientError::InvalidResponse(message) => Self::EmbeddingMismatch {
                what: "provider response",
                detail: message,
            },
            other => Self::GatewayError(other.to_string()),
        }
    }
}

impl From<WriteError> for DocumentError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::Rejected { .. } => Self::WriteRejected(error.to_string()),
            WriteError::Store(store) => Self::Store(store),
        }
    }
}

/// Corpus-level failures that abort the run before any document is processed.
#[derive(Debug, Error)]
pub enum RunError {
    /// The corpus could not be listed.
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    /// A collection could not be loaded at startup.
    #[error("vector store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),
    /// An existing-state lookup failed while strict lookups are enabled.
    #[error("existing-state lookup failed: {0}")]
    StrictLookup(String),
}

/// Terminal state of a document that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Stored fingerprint matched; nothing was touched.
    Skipped,
    /// Rows were written (after removing stale ones when `replaced`).
    Processed {
        /// Whether rows of an earlier version were deleted first.
        replaced: bool,
        /// Chunk rows written.
        chunks: usize,
        /// Page rows written.
        pages_written: usize,
        /// Pages whose rows already existed and were left in place.
        pages_reused: usize,
        /// First chunk id assigned to this document.
        first_chunk_id: u64,
    },
}
