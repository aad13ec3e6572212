use std::panic;
use std::path::Path;
use std::sync::Arc;

use super::{DocumentExtractor, ExtractError, PageOcr, PageText};

/// Per-page PDF text with an OCR fallback for image-only pages.
pub struct PdfExtractor {
    ocr: Option<Arc<dyn PageOcr>>,
}

impl PdfExtractor {
    /// Extractor that sends blank pages to `ocr` when one is given.
    pub fn new(ocr: Option<Arc<dyn PageOcr>>) -> Self {
        Self { ocr }
    }
}

impl DocumentExtractor for PdfExtractor {
    fn extract_pages(&self, path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        // The parser panics on some malformed inputs.
        let pages = panic::catch_unwind(|| pdf_extract::extract_text_from_mem_by_pages(bytes))
            .map_err(|_| ExtractError::Pdf("parser panicked".into()))?
            .map_err(|error| ExtractError::Pdf(error.to_string()))?;

        Ok(fill_blank_pages(path, bytes, pages, self.ocr.as_deref()))
    }
}

/// Number pages from 1 and replace blank ones with OCR output when available.
///
/// An OCR failure leaves the page blank; the registry then drops it.
pub(crate) fn fill_blank_pages(
    path: &Path,
    bytes: &[u8],
    pages: Vec<String>,
    ocr: Option<&dyn PageOcr>,
) -> Vec<PageText> {
    pages
        .into_iter()
        .zip(1u32..)
        .map(|(text, page_number)| {
            if !text.trim().is_empty() {
                return PageText::new(page_number, text);
            }
            let Some(ocr) = ocr else {
                return PageText::new(page_number, text);
            };
            match ocr.recognize(bytes, page_number) {
                Ok(recognized) => {
                    tracing::debug!(file = %path.display(), page = page_number, chars = recognized.len(), "OCR fallback used");
                    PageText::new(page_number, recognized)
                }
                Err(error) => {
                    tracing::warn!(file = %path.display(), page = page_number, %error, "OCR fallback failed");
                    PageText::new(page_number, text)
                }
            }
        })
        .collect()
}
