//! Discovery of source documents under the corpus root.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Errors that prevent the corpus from being scanned at all.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// The corpus root does not exist or is not a directory.
    #[error("corpus root {0} is not a readable directory")]
    NotADirectory(PathBuf),
    /// The root itself could not be listed.
    #[error("failed to scan corpus root {path}: {source}")]
    Walk {
        /// Corpus root being scanned.
        path: PathBuf,
        /// Underlying traversal error.
        #[source]
        source: walkdir::Error,
    },
}

/// Supported source formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocumentFormat {
    /// Portable Document Format, one page per PDF page.
    Pdf,
    /// Excel workbook, a single logical page.
    Spreadsheet,
    /// Markdown text, a single logical page.
    Markdown,
}

impl DocumentFormat {
    /// Resolve a format from a file extension, ignoring case.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "pdf" => Some(Self::Pdf),
            "xlsx" => Some(Self::Spreadsheet),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }

    /// Canonical lower-case extension for the format.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Spreadsheet => "xlsx",
            Self::Markdown => "md",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// A supported file found during the scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDocument {
    /// Location of the file on disk.
    pub path: PathBuf,
    /// Base name including extension; the identity used for change detection.
    pub file_name: String,
    /// Base name without extension; the identity used for page ids.
    pub file_id: String,
    /// Detected format.
    pub format: DocumentFormat,
}

impl SourceDocument {
    /// Describe a path, returning `None` for unsupported or nameless files.
    pub fn from_path(path: &Path) -> Option<Self> {
        let format = DocumentFormat::from_extension(path.extension()?.to_str()?)?;
        let file_name = path.file_name()?.to_str()?.to_string();
        let file_id = path.file_stem()?.to_str()?.to_string();
        Some(Self {
            path: path.to_path_buf(),
            file_name,
            file_id,
            format,
        })
    }
}

/// A file with a supported extension that cannot be ingested as named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedFile {
    /// Location of the file on disk.
    pub path: PathBuf,
    /// Why the file was not turned into a [`SourceDocument`].
    pub reason: String,
}

impl RejectedFile {
    /// Base name for reports, with invalid UTF-8 replaced.
    pub fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Result of a corpus scan.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CorpusScan {
    /// Supported documents, sorted by path.
    pub documents: Vec<SourceDocument>,
    /// Supported files that could not be described.
    pub rejected: Vec<RejectedFile>,
}

/// Recursively list supported documents under `root`, sorted by path.
///
/// Entries that cannot be read are logged and skipped; only a failure on the root aborts.
pub fn scan_corpus(root: &Path) -> Result<CorpusScan, CorpusError> {
    if !root.is_dir() {
        return Err(CorpusError::NotADirectory(root.to_path_buf()));
    }

    let mut scan = CorpusScan::default();
    for entry in WalkDir::new(root).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(CorpusError::Walk {
                    path: root.to_path_buf(),
                    source,
                });
            }
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unreadable corpus entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let supported = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(DocumentFormat::from_extension)
            .is_some();
        if !supported {
            continue;
        }
        match SourceDocument::from_path(path) {
            Some(document) => scan.documents.push(document),
            None => {
                tracing::warn!(path = %path.display(), "File name is not valid UTF-8; not ingesting");
                scan.rejected.push(RejectedFile {
                    path: path.to_path_buf(),
                    reason: "file name is not valid UTF-8".into(),
                });
            }
        }
    }

    scan.documents.sort_by(|left, right| left.path.cmp(&right.path));
    scan.rejected.sort_by(|left, right| left.path.cmp(&right.path));
    warn_on_duplicate_ids(&scan.documents);
    tracing::info!(
        root = %root.display(),
        documents = scan.documents.len(),
        rejected = scan.rejected.len(),
        "Corpus scanned"
    );
    Ok(scan)
}

fn warn_on_duplicate_ids(documents: &[SourceDocument]) {
    let mut seen: HashMap<&str, &Path> = HashMap::new();
    for document in documents {
        if let Some(previous) = seen.insert(&document.file_id, &document.path) {
            tracing::warn!(
                file_id = %document.file_id,
                first = %previous.display(),
                second = %document.path.display(),
                "Two documents share a file id; their page ids will collide"
            );
        }
    }
}
