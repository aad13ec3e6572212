#![deny(missing_docs)]

//! Core library for incremental document ingestion into paired page and chunk collections.

/// Environment-driven configuration management.
pub mod config;
/// Recursive discovery of supported source documents.
pub mod corpus;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Per-format text extraction and the extension dispatch table.
pub mod extract;
/// Content fingerprints for change detection.
pub mod fingerprint;
/// Structured logging and tracing setup.
pub mod logging;
/// Reconciliation pipeline: ids, chunking, summaries, writes and reports.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Bounded retry with exponential backoff.
pub mod retry;
/// Vector store capability trait and in-memory implementation.
pub mod store;
/// Summarization client abstraction and adapters.
pub mod summarization;
