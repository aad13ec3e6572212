//! Per-run report: every document ends in exactly one of processed, skipped or failed.

use std::fmt;

use serde::Serialize;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

/// A document whose rows were written during the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessedDocument {
    /// Source file name.
    pub file_name: String,
    /// Chunk rows written.
    pub chunks: usize,
    /// Page rows written.
    pub pages_written: usize,
    /// Pages that already existed and were not rewritten.
    pub pages_reused: usize,
    /// Whether rows of a previous version were deleted first.
    pub replaced: bool,
}

/// A document that ended in the failed state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedDocument {
    /// Source file name.
    pub file_name: String,
    /// Human-readable cause.
    pub reason: String,
}

/// A page stored with an error placeholder instead of a summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SummaryFailure {
    /// Affected page.
    pub page_id: String,
    /// Provider error.
    pub reason: String,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// RFC 3339 start time.
    pub started_at: String,
    /// RFC 3339 finish time; empty until [`finish`](Self::finish).
    pub finished_at: String,
    /// Documents written.
    pub processed: Vec<ProcessedDocument>,
    /// Unchanged documents.
    pub skipped: Vec<String>,
    /// Documents that failed, with their reason.
    pub failed: Vec<FailedDocument>,
    /// Pages stored with placeholders.
    pub summary_failures: Vec<SummaryFailure>,
    /// Existing-state lookups that failed and were treated as empty.
    pub degraded_lookups: Vec<String>,
    /// Half-open chunk id range assigned during the run, if any.
    pub chunk_id_range: Option<(u64, u64)>,
}

impl RunReport {
    /// Empty report stamped with the current time.
    pub fn start() -> Self {
        Self {
            started_at: now(),
            finished_at: String::new(),
            processed: Vec::new(),
            skipped: Vec::new(),
            failed: Vec::new(),
            summary_failures: Vec::new(),
            degraded_lookups: Vec::new(),
            chunk_id_range: None,
        }
    }

    /// Stamp the finish time.
    pub fn finish(&mut self) {
        self.finished_at = now();
    }

    /// Record a written document.
    pub fn record_processed(&mut self, document: ProcessedDocument) {
        self.processed.push(document);
    }

    /// Record an unchanged document.
    pub fn record_skipped(&mut self, file_name: impl Into<String>) {
        self.skipped.push(file_name.into());
    }

    /// Record a failed document.
    pub fn record_failed(&mut self, file_name: impl Into<String>, reason: impl Into<String>) {
        self.failed.push(FailedDocument {
            file_name: file_name.into(),
            reason: reason.into(),
        });
    }

    /// Record a page stored with a placeholder summary.
    pub fn record_summary_failure(&mut self, page_id: impl Into<String>, reason: impl Into<String>) {
        self.summary_failures.push(SummaryFailure {
            page_id: page_id.into(),
            reason: reason.into(),
        });
    }

    /// Extend the run's chunk id range with `start..end`.
    pub fn record_chunk_ids(&mut self, start: u64, end: u64) {
        if start == end {
            return;
        }
        self.chunk_id_range = Some(match self.chunk_id_range {
            Some((first, last)) => (first.min(start), last.max(end)),
            None => (start, end),
        });
    }

    /// Number of processed documents.
    pub fn processed_count(&self) -> usize {
        self.processed.len()
    }

    /// Number of skipped documents.
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    /// Number of failed documents.
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Total documents accounted for.
    pub fn total(&self) -> usize {
        self.processed_count() + self.skipped_count() + self.failed_count()
    }

    /// Chunk rows written across the run.
    pub fn chunks_written(&self) -> usize {
        self.processed.iter().map(|doc| doc.chunks).sum()
    }

    /// Whether `file_name` failed during the run.
    pub fn failure_for(&self, file_name: &str) -> Option<&str> {
        self.failed
            .iter()
            .find(|failed| failed.file_name == file_name)
            .map(|failed| failed.reason.as_str())
    }
}

fn now() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default()
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Ingestion report ({} -> {})", self.started_at, self.finished_at)?;
        writeln!(
            f,
            "  processed: {}  skipped: {}  failed: {}",
            self.processed_count(),
            self.skipped_count(),
            self.failed_count()
        )?;
        if let Some((start, end)) = self.chunk_id_range {
            writeln!(f, "  chunk ids: {start}..{end}")?;
        }

        if !self.processed.is_empty() {
            writeln!(f, "Processed:")?;
            for doc in &self.processed {
                let action = if doc.replaced { "replaced" } else { "new" };
                writeln!(
                    f,
                    "  {} ({action}): {} chunks, {} pages written, {} pages reused",
                    doc.file_name, doc.chunks, doc.pages_written, doc.pages_reused
                )?;
            }
        }
        if !self.skipped.is_empty() {
            writeln!(f, "Skipped (unchanged):")?;
            for name in &self.skipped {
                writeln!(f, "  {name}")?;
            }
        }
        if !self.failed.is_empty() {
            writeln!(f, "Failed:")?;
            for failed in &self.failed {
                writeln!(f, "  {}: {}", failed.file_name, failed.reason)?;
            }
        }
        if !self.summary_failures.is_empty() {
            writeln!(f, "Summary placeholders:")?;
            for failure in &self.summary_failures {
                writeln!(f, "  {}: {}", failure.page_id, failure.reason)?;
            }
        }
        if !self.degraded_lookups.is_empty() {
            writeln!(f, "Degraded lookups (treated as empty):")?;
            for lookup in &self.degraded_lookups {
                writeln!(f, "  {lookup}")?;
            }
        }
        Ok(())
    }
}
