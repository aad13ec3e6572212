//! Format-specific text extraction behind a single dispatch table.
//!
//! Each extractor turns file bytes into numbered page texts. The registry picks the extractor by
//! lower-cased extension, drops blank pages (keeping the original page numbers) and cuts every
//! page into chunks with the shared [`TextSplitter`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;

use crate::config::OcrSettings;
use crate::corpus::SourceDocument;
use crate::processing::chunking::TextSplitter;
use crate::processing::ids::derive_page_id;

mod markdown;
mod ocr;
mod pdf;
mod spreadsheet;

pub use markdown::{MarkdownExtractor, markdown_to_text};
pub use ocr::{PageOcr, TesseractOcr};
pub use pdf::PdfExtractor;
pub use spreadsheet::{SpreadsheetExtractor, workbook_text};

/// Errors raised while reading a document's text.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// The PDF parser failed or panicked.
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    /// The workbook could not be opened.
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    /// Text content was not valid UTF-8.
    #[error("invalid text encoding: {0}")]
    Encoding(String),
    /// No extractor is registered for the extension.
    #[error("unsupported document type '{0}'")]
    Unsupported(String),
    /// OCR tooling failed for a page.
    #[error("OCR failed: {0}")]
    Ocr(String),
    /// The blocking extraction task panicked or was cancelled.
    #[error("extraction task aborted: {0}")]
    Aborted(String),
}

/// Raw text of one page as produced by an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageText {
    /// 1-based page number within the document.
    pub local_page_num: u32,
    /// Extracted text, possibly blank.
    pub text: String,
}

impl PageText {
    /// Page `local_page_num` holding `text`.
    pub fn new(local_page_num: u32, text: impl Into<String>) -> Self {
        Self {
            local_page_num,
            text: text.into(),
        }
    }
}

/// Turns the bytes of one document format into page texts.
pub trait DocumentExtractor: Send + Sync {
    /// Extract every page; blank pages may be returned and are dropped by the registry.
    fn extract_pages(&self, path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError>;
}

/// A non-blank page ready for summarization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    /// Derived page id.
    pub page_id: String,
    /// 1-based page number.
    pub local_page_num: u32,
    /// Page text, transient.
    pub text: String,
}

/// A chunk cut from one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedChunk {
    /// Owning page.
    pub page_id: String,
    /// 0-based position across the whole document.
    pub chunk_index: u64,
    /// Chunk text.
    pub text: String,
}

/// Pages and chunks of one document, before summarization and embedding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Non-blank pages in page order.
    pub pages: Vec<ExtractedPage>,
    /// Chunks in document order.
    pub chunks: Vec<ExtractedChunk>,
}

impl Extraction {
    /// Whether nothing usable was found.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() || self.chunks.is_empty()
    }
}

/// Dispatch table from file extension to extractor.
pub struct ExtractorRegistry {
    extractors: HashMap<String, Arc<dyn DocumentExtractor>>,
    splitter: TextSplitter,
}

impl ExtractorRegistry {
    /// Registry with no extractors.
    pub fn new(splitter: TextSplitter) -> Self {
        Self {
            extractors: HashMap::new(),
            splitter,
        }
    }

    /// Registry with the pdf, xlsx and md extractors.
    pub fn with_defaults(splitter: TextSplitter, settings: &OcrSettings) -> Self {
        let ocr: Option<Arc<dyn PageOcr>> = if !settings.enabled {
            None
        } else if ocr::tools_available() {
            Some(Arc::new(TesseractOcr::new(&settings.language)))
        } else {
            tracing::warn!("OCR enabled but pdftoppm/tesseract are unavailable; image-only pages will be empty");
            None
        };
        let mut registry = Self::new(splitter);
        registry.register("pdf", Arc::new(PdfExtractor::new(ocr)));
        registry.register("xlsx", Arc::new(SpreadsheetExtractor));
        registry.register("md", Arc::new(MarkdownExtractor));
        registry
    }

    /// Add or replace the extractor for `extension`.
    pub fn register(&mut self, extension: &str, extractor: Arc<dyn DocumentExtractor>) {
        self.extractors
            .insert(extension.to_ascii_lowercase(), extractor);
    }

    /// Extract pages and chunks for one document.
    pub fn extract(
        &self,
        document: &SourceDocument,
        bytes: &[u8],
    ) -> Result<Extraction, ExtractError> {
        let extension = document
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let extractor = self
            .extractors
            .get(&extension)
            .ok_or_else(|| ExtractError::Unsupported(extension.clone()))?;

        let raw_pages = extractor.extract_pages(&document.path, bytes)?;
        let total = raw_pages.len();
        let mut extraction = Extraction::default();
        for raw in raw_pages {
            if raw.text.trim().is_empty() {
                continue;
            }
            let page_id = derive_page_id(&document.file_id, raw.local_page_num);
            for text in self.splitter.split(&raw.text) {
                extraction.chunks.push(ExtractedChunk {
                    page_id: page_id.clone(),
                    chunk_index: extraction.chunks.len() as u64,
                    text,
                });
            }
            extraction.pages.push(ExtractedPage {
                page_id,
                local_page_num: raw.local_page_num,
                text: raw.text,
            });
        }

        tracing::debug!(
            file = %document.file_name,
            format = %document.format,
            pages = extraction.pages.len(),
            blank_pages = total - extraction.pages.len(),
            chunks = extraction.chunks.len(),
            "Extracted document"
        );
        Ok(extraction)
    }
}
