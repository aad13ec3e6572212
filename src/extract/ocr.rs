use std::fs;
use std::process::{Command, Output};

use super::ExtractError;

/// Recognizes the text of a single rendered PDF page.
pub trait PageOcr: Send + Sync {
    /// OCR page `page_number` (1-based) of the PDF held in `bytes`.
    fn recognize(&self, bytes: &[u8], page_number: u32) -> Result<String, ExtractError>;
}

/// OCR through the `pdftoppm` and `tesseract` command-line tools.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    /// Use the given tesseract language code.
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

impl PageOcr for TesseractOcr {
    fn recognize(&self, bytes: &[u8], page_number: u32) -> Result<String, ExtractError> {
        let workdir = tempfile::tempdir()
            .map_err(|error| ExtractError::Ocr(format!("failed to create temp dir: {error}")))?;
        let pdf_path = workdir.path().join("source.pdf");
        fs::write(&pdf_path, bytes)
            .map_err(|error| ExtractError::Ocr(format!("failed to stage PDF: {error}")))?;

        let output_root = workdir.path().join(format!("page_{page_number}"));
        let png_path = output_root.with_extension("png");
        let page = page_number.to_string();

        let pdftoppm = Command::new("pdftoppm")
            .args(["-f", &page, "-l", &page, "-singlefile", "-png"])
            .arg(&pdf_path)
            .arg(&output_root)
            .output()
            .map_err(|error| ExtractError::Ocr(format!("failed to execute pdftoppm: {error}")))?;
        ensure_success("pdftoppm", page_number, &pdftoppm)?;

        if !png_path.exists() {
            return Err(ExtractError::Ocr(format!(
                "pdftoppm did not produce an image for page {page_number}"
            )));
        }

        let tesseract = Command::new("tesseract")
            .arg(&png_path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .map_err(|error| ExtractError::Ocr(format!("failed to execute tesseract: {error}")))?;
        ensure_success("tesseract", page_number, &tesseract)?;

        Ok(String::from_utf8_lossy(&tesseract.stdout)
            .replace('\u{0000}', "")
            .trim()
            .to_string())
    }
}

fn ensure_success(
    program: &str,
    page_number: u32,
    output: &Output,
) -> Result<(), ExtractError> {
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(ExtractError::Ocr(format!(
        "{program} exited with {} for page {page_number}: {}",
        output.status,
        stderr.trim()
    )))
}

/// Whether both OCR tools are on the `PATH`.
pub(crate) fn tools_available() -> bool {
    ["pdftoppm", "tesseract"].iter().all(|program| {
        Command::new(program)
            .arg(if *program == "pdftoppm" { "-v" } else { "--version" })
            .output()
            .is_ok()
    })
}
