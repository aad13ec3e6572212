//! Reconciliation engine: compares the corpus with the store and drives each document through
//! hash, classify, extract, summarize, embed and write.
//!
//! Documents are processed one at a time. Any error inside a document is caught at its boundary
//! and reported; only a corpus scan failure or an unreachable store at startup ends the run.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::corpus::{RejectedFile, SourceDocument, scan_corpus};
use crate::embedding::EmbeddingClient;
use crate::extract::{ExtractError, Extraction, ExtractorRegistry};
use crate::fingerprint::fingerprint;
use crate::store::VectorStore;

use super::ids::{ChunkIdSequence, allocate_chunk_ids};
use super::report::{ProcessedDocument, RunReport, SummaryFailure};
use super::state::StoreSnapshot;
use super::summarize::PageSummarizer;
use super::types::{DocumentError, DocumentOutcome, RunError};
use super::writer::{
    ChunkOwner, DualCollectionWriter, PendingChunk, PendingPage, build_chunk_batch,
    build_page_batch,
};

const DEFAULT_PAGE_SIZE: usize = 512;

/// Collection names and policies the engine needs at construction time.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Chunk collection name.
    pub chunks_collection: String,
    /// Page collection name.
    pub pages_collection: String,
    /// Vector width shared by both collections.
    pub dimension: usize,
    /// Rows fetched per request while reading existing state.
    pub page_size: usize,
    /// Fail the run instead of degrading when a lookup fails.
    pub strict_store_lookups: bool,
}

impl EngineSettings {
    /// Settings with the default lookup page size and lenient lookups.
    pub fn new(chunks_collection: &str, pages_collection: &str, dimension: usize) -> Self {
        Self {
            chunks_collection: chunks_collection.to_string(),
            pages_collection: pages_collection.to_string(),
            dimension,
            page_size: DEFAULT_PAGE_SIZE,
            strict_store_lookups: false,
        }
    }

    /// Settings taken from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunks_collection: config.store.chunks_collection.clone(),
            pages_collection: config.store.pages_collection.clone(),
            dimension: config.embedding.dimension,
            page_size: config.store.page_size,
            strict_store_lookups: config.strict_store_lookups,
        }
    }
}

/// Drives incremental ingestion of a corpus into the page and chunk collections.
pub struct ReconciliationEngine {
    settings: EngineSettings,
    store: Arc<dyn VectorStore>,
    writer: DualCollectionWriter,
    extractors: Arc<ExtractorRegistry>,
    embedder: Arc<dyn EmbeddingClient>,
    summarizer: PageSummarizer,
}

impl ReconciliationEngine {
    /// Assemble an engine from its collaborators.
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn VectorStore>,
        extractors: ExtractorRegistry,
        embedder: Arc<dyn EmbeddingClient>,
        summarizer: PageSummarizer,
    ) -> Self {
        let writer = DualCollectionWriter::new(
            Arc::clone(&store),
            &settings.chunks_collection,
            &settings.pages_collection,
            settings.dimension,
        );
        Self {
            settings,
            store,
            writer,
            extractors: Arc::new(extractors),
            embedder,
            summarizer,
        }
    }

    /// Scan `source_dir` and reconcile every supported document in it.
    pub async fn run(&self, source_dir: &Path) -> Result<RunReport, RunError> {
        let scan = scan_corpus(source_dir)?;
        self.reconcile_with_rejected(&scan.documents, &scan.rejected)
            .await
    }

    /// Reconcile an already-scanned list of documents.
    pub async fn reconcile(&self, documents: &[SourceDocument]) -> Result<RunReport, RunError> {
        self.reconcile_with_rejected(documents, &[]).await
    }

    async fn reconcile_with_rejected(
        &self,
        documents: &[SourceDocument],
        rejected: &[RejectedFile],
    ) -> Result<RunReport, RunError> {
        let mut report = RunReport::start();

        self.writer.load().await.map_err(|error| {
            tracing::error!(%error, "Failed to load collections");
            RunError::StoreUnavailable(error)
        })?;

        let mut snapshot = StoreSnapshot::load(
            self.store.as_ref(),
            &self.settings.chunks_collection,
            &self.settings.pages_collection,
            self.settings.page_size,
        )
        .await;
        if self.settings.strict_store_lookups && !snapshot.degraded.is_empty() {
            return Err(RunError::StrictLookup(snapshot.degraded.join("; ")));
        }
        report.degraded_lookups = snapshot.degraded.clone();

        let sequence = ChunkIdSequence::seeded(snapshot.seed);
        for document in documents {
            let mut summary_failures = Vec::new();
            let outcome = self
                .process_document(document, &mut snapshot, &sequence, &mut summary_failures)
                .await;
            match outcome {
                Ok(DocumentOutcome::Skipped) => {
                    tracing::info!(file = %document.file_name, "Unchanged; skipped");
                    report.record_skipped(&document.file_name);
                }
                Ok(DocumentOutcome::Processed {
                    replaced,
                    chunks,
                    pages_written,
                    pages_reused,
                    first_chunk_id,
                }) => {
                    tracing::info!(
                        file = %document.file_name,
                        replaced,
                        chunks,
                        pages_written,
                        pages_reused,
                        first_chunk_id,
                        "Document written"
                    );
                    report.record_chunk_ids(first_chunk_id, first_chunk_id + chunks as u64);
                    report.summary_failures.extend(summary_failures);
                    report.record_processed(ProcessedDocument {
                        file_name: document.file_name.clone(),
                        chunks,
                        pages_written,
                        pages_reused,
                        replaced,
                    });
                }
                Err(error) => {
                    tracing::error!(file = %document.file_name, %error, "Document failed");
                    report.record_failed(&document.file_name, error.to_string());
                }
            }
        }

        for file in rejected {
            report.record_failed(file.display_name(), file.reason.clone());
        }

        report.finish();
        tracing::info!(
            processed = report.processed_count(),
            skipped = report.skipped_count(),
            failed = report.failed_count(),
            chunks = report.chunks_written(),
            "Ingestion run complete"
        );
        Ok(report)
    }

    async fn process_document(
        &self,
        document: &SourceDocument,
        snapshot: &mut StoreSnapshot,
        sequence: &ChunkIdSequence,
        summary_failures: &mut Vec<SummaryFailure>,
    ) -> Result<DocumentOutcome, DocumentError> {
        let bytes = tokio::fs::read(&document.path)
            .await
            .map_err(DocumentError::Unreadable)?;
        let content_hash = fingerprint(&bytes);

        let replaced = match snapshot.stored_hash(&document.file_name) {
            Some(stored) if stored == content_hash => return Ok(DocumentOutcome::Skipped),
            Some(_) => {
                tracing::info!(file = %document.file_name, "Content changed; removing stale rows");
                self.writer.delete_by_file_name(&document.file_name).await?;
                self.writer
                    .delete_pages_by_file_id(&document.file_id)
                    .await?;
                snapshot.forget_file(&document.file_name, &document.file_id);
                true
            }
            None => false,
        };

        let extraction = self.extract(document, bytes).await?;
        if extraction.is_empty() {
            return Err(DocumentError::ExtractionEmpty(format!(
                "no text found in {} document",
                document.format
            )));
        }

        let mut pending_pages = Vec::new();
        for page in extraction
            .pages
            .iter()
            .filter(|page| !snapshot.page_exists(&page.page_id))
        {
            let (summary, failure) = self.summarizer.summarize_or_placeholder(&page.text).await;
            if let Some(error) = failure {
                tracing::warn!(page_id = %page.page_id, %error, "Summary replaced by placeholder");
                summary_failures.push(SummaryFailure {
                    page_id: page.page_id.clone(),
                    reason: error.to_string(),
                });
            }
            pending_pages.push(PendingPage {
                page_id: page.page_id.clone(),
                local_page_num: page.local_page_num,
                summary,
            });
        }
        let pages_reused = extraction.pages.len() - pending_pages.len();

        let summary_vectors = if pending_pages.is_empty() {
            Vec::new()
        } else {
            let summaries = pending_pages.iter().map(|page| page.summary.clone()).collect();
            self.embed("page summaries", summaries).await?
        };

        let pending_chunks: Vec<PendingChunk> = extraction
            .chunks
            .into_iter()
            .map(|chunk| PendingChunk {
                page_id: chunk.page_id,
                chunk_index: chunk.chunk_index,
                text: chunk.text,
            })
            .collect();
        let chunk_vectors = self
            .embed(
                "chunks",
                pending_chunks.iter().map(|chunk| chunk.text.clone()).collect(),
            )
            .await?;

        let first_chunk_id = sequence.peek();
        let ids = allocate_chunk_ids(first_chunk_id, pending_chunks.len());
        let source_location = document.path.display().to_string();
        let owner = ChunkOwner {
            file_id: &document.file_id,
            file_name: &document.file_name,
            content_hash: &content_hash,
            source_location: &source_location,
        };
        let chunk_batch = build_chunk_batch(&owner, ids, &pending_chunks, chunk_vectors);
        let page_batch = (!pending_pages.is_empty())
            .then(|| build_page_batch(&document.file_id, &pending_pages, summary_vectors));

        // Both batches must pass before either is written.
        if let Some(batch) = &page_batch {
            self.writer.validate_pages(batch)?;
        }
        self.writer.validate_chunks(&chunk_batch)?;

        let pages_written = match page_batch {
            Some(batch) => self.writer.write_pages(batch).await?,
            None => 0,
        };
        snapshot.record_pages(
            &document.file_id,
            pending_pages.iter().map(|page| page.page_id.as_str()),
        );
        let chunks = self.writer.write_chunks(chunk_batch).await?;

        sequence
            .commit(first_chunk_id, chunks)
            .map_err(|actual| {
                DocumentError::Sequence(format!(
                    "expected next id {first_chunk_id}, found {actual}"
                ))
            })?;
        snapshot.record_hash(&document.file_name, &content_hash);

        Ok(DocumentOutcome::Processed {
            replaced,
            chunks,
            pages_written,
            pages_reused,
            first_chunk_id,
        })
    }

    async fn extract(
        &self,
        document: &SourceDocument,
        bytes: Vec<u8>,
    ) -> Result<Extraction, DocumentError> {
        let extractors = Arc::clone(&self.extractors);
        let owned = document.clone();
        let extraction = tokio::task::spawn_blocking(move || extractors.extract(&owned, &bytes))
            .await
            .map_err(|error| ExtractError::Aborted(error.to_string()))??;
        Ok(extraction)
    }

    async fn embed(
        &self,
        what: &'static str,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, DocumentError> {
        let expected = texts.len();
        let vectors = self.embedder.generate_embeddings(texts).await?;
        if vectors.len() != expected {
            return Err(DocumentError::EmbeddingMismatch {
                what,
                detail: format!("expected {expected} vectors, received {}", vectors.len()),
            });
        }
        let dimension = self.settings.dimension;
        if let Some((index, vector)) = vectors
            .iter()
            .enumerate()
            .find(|(_, vector)| vector.len() != dimension)
        {
            return Err(DocumentError::EmbeddingMismatch {
                what,
                detail: format!(
                    "vector {index} has width {}, expected {dimension}",
                    vector.len()
                ),
            });
        }
        Ok(vectors)
    }
}
