use std::io::Cursor;
use std::path::Path;

use calamine::{DataType, Reader, Xlsx};

use super::{DocumentExtractor, ExtractError, PageText};

/// Workbooks become a single page listing every sheet row by row.
pub struct SpreadsheetExtractor;

impl DocumentExtractor for SpreadsheetExtractor {
    fn extract_pages(&self, _path: &Path, bytes: &[u8]) -> Result<Vec<PageText>, ExtractError> {
        Ok(vec![PageText::new(1, workbook_text(bytes)?)])
    }
}

/// Flatten an xlsx workbook: a `=== Sheet: name ===` header per sheet, cells joined by ` | `.
pub fn workbook_text(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut workbook = Xlsx::new(Cursor::new(bytes))
        .map_err(|error| ExtractError::Spreadsheet(format!("failed to read xlsx workbook: {error}")))?;

    let sheet_names: Vec<String> = workbook.sheet_names().clone();
    let mut text = String::new();
    for sheet_name in &sheet_names {
        let range = match workbook.worksheet_range(sheet_name) {
            Some(Ok(range)) => range,
            Some(Err(error)) => {
                tracing::warn!(sheet = %sheet_name, %error, "Skipping unreadable sheet");
                continue;
            }
            None => continue,
        };

        text.push_str(&format!("=== Sheet: {sheet_name} ===\n"));
        for row in range.rows() {
            let line = row.iter().map(cell_text).collect::<Vec<_>>().join(" | ");
            text.push_str(&line);
            text.push('\n');
        }
        text.push('\n');
    }
    Ok(text)
}

fn cell_text(cell: &DataType) -> String {
    match cell {
        DataType::String(s) | DataType::DateTimeIso(s) | DataType::DurationIso(s) => s.clone(),
        DataType::Float(v) | DataType::DateTime(v) | DataType::Duration(v) => v.to_string(),
        DataType::Int(v) => v.to_string(),
        DataType::Bool(b) => b.to_string(),
        DataType::Error(e) => format!("#{e:?}"),
        DataType::Empty => String::new(),
    }
}
