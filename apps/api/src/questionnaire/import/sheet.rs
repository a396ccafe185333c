//! Reads the `Import` worksheet, exported as CSV, into header-keyed rows.
//!
//! Row 1 holds the headers and row 2 an optional hint row that is always
//! skipped. Rows with no filled cell are dropped.

use std::collections::HashMap;

use csv::ReaderBuilder;
use thiserror::Error;

/// One data row: normalised header → raw cell text. Blank cells are absent.
pub type SheetRow = HashMap<String, String>;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("The import file could not be read as CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Worksheet 'Import' is missing a header row.")]
    MissingHeader,
}

/// `"Question Title"`, `"question_title"` and `"QUESTION-TITLE"` all become
/// `"questiontitle"`.
pub fn normalize_header(raw: &str) -> String {
    raw.trim()
        .chars()
        .filter(|ch| !ch.is_whitespace() && !matches!(ch, '_' | '-' | '/'))
        .flat_map(char::to_lowercase)
        .collect()
}

pub fn read_rows(bytes: &[u8]) -> Result<Vec<SheetRow>, SheetError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);
    let mut records = reader.records();

    let headers: Vec<String> = match records.next() {
        Some(header) => header?.iter().map(normalize_header).collect(),
        None => return Ok(Vec::new()),
    };
    if headers.iter().all(String::is_empty) {
        return Err(SheetError::MissingHeader);
    }

    let mut rows = Vec::new();
    // Index 0 is the hint row.
    for record in records.skip(1) {
        let record = record?;
        let row: SheetRow = record
            .iter()
            .zip(headers.iter())
            .filter(|(value, header)| !header.is_empty() && !value.trim().is_empty())
            .map(|(value, header)| (header.clone(), value.to_string()))
            .collect();
        if !row.is_empty() {
            rows.push(row);
        }
    }
    Ok(rows)
}
