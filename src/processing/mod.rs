//! Ingestion core: chunking, identifier allocation, reconciliation and dual-collection writes.

pub mod chunking;
pub mod engine;
pub mod ids;
pub mod report;
pub mod state;
pub mod summarize;
pub mod types;
pub mod writer;

pub use chunking::TextSplitter;
pub use engine::{EngineSettings, ReconciliationEngine};
pub use ids::{ChunkIdSequence, allocate_chunk_ids, derive_page_id, next_chunk_id_seed};
pub use report::{FailedDocument, ProcessedDocument, RunReport, SummaryFailure};
pub use state::StoreSnapshot;
pub use summarize::PageSummarizer;
pub use types::{ChunkingError, DocumentError, DocumentOutcome, RunError, WriteError};
pub use writer::{DualCollectionWriter, chunk_schema, page_schema};
