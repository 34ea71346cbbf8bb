//! CSV files loaded as new tables. Every value is kept as text.

use crate::db::error::{Result, StageError};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::HashSet;
use std::path::Path;

/// Rows read from a CSV file, padded or cut to the header width
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Read options shared by preview and import
#[derive(Debug, Clone)]
pub struct CsvOptions {
    pub delimiter: u8,
    pub has_header: bool,
    /// Overrides the header row (or the generated names)
    pub column_names: Option<Vec<String>>,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            column_names: None,
        }
    }
}

/// Turn the wire separator ("," / "\t" / "tab") into a single byte
pub fn parse_delimiter(separator: &str) -> Result<u8> {
    match separator {
        "" => Ok(b','),
        "\\t" | "tab" => Ok(b'\t'),
        s if s.len() == 1 => Ok(s.as_bytes()[0]),
        s => Err(StageError::Sql(format!(
            "Separator must be a single character, got {:?}",
            s
        ))),
    }
}

/// Read the whole file
pub fn read_csv(path: &Path, options: &CsvOptions) -> Result<CsvData> {
    read(path, options, None)
}

/// Read at most `limit` data rows for display before an import
pub fn preview_csv(path: &Path, options: &CsvOptions, limit: usize) -> Result<CsvData> {
    read(path, options, Some(limit))
}

fn read(path: &Path, options: &CsvOptions, limit: Option<usize>) -> Result<CsvData> {
    let mut reader = ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(options.has_header)
        .flexible(true)
        .from_path(path)?;

    let file_headers = if options.has_header {
        Some(reader.headers()?.clone())
    } else {
        None
    };

    let mut rows: Vec<StringRecord> = Vec::new();
    for record in reader.records() {
        if limit.map_or(false, |limit| rows.len() >= limit) {
            break;
        }
        rows.push(record?);
    }

    let width = file_headers
        .as_ref()
        .map(StringRecord::len)
        .into_iter()
        .chain(rows.iter().map(StringRecord::len))
        .max()
        .unwrap_or(0);

    let headers = match &options.column_names {
        Some(names) if !names.is_empty() => names.clone(),
        _ => generated_headers(file_headers.as_ref(), width),
    };
    let headers = dedupe(headers);

    let rows = rows
        .iter()
        .map(|record| {
            (0..headers.len())
                .map(|i| record.get(i).unwrap_or("").to_string())
                .collect()
        })
        .collect();

    tracing::debug!(path = %path.display(), columns = headers.len(), "read csv");
    Ok(CsvData { headers, rows })
}

/// Header text where present and non-blank, `Column N` otherwise
fn generated_headers(file_headers: Option<&StringRecord>, width: usize) -> Vec<String> {
    (0..width)
        .map(|i| {
            file_headers
                .and_then(|h| h.get(i))
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("Column {}", i + 1))
        })
        .collect()
}

/// SQLite column names are case-insensitive; suffix repeats
fn dedupe(headers: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    headers
        .into_iter()
        .map(|header| {
            let mut candidate = header.clone();
            let mut n = 2;
            while !seen.insert(candidate.to_lowercase()) {
                candidate = format!("{} {}", header, n);
                n += 1;
            }
            candidate
        })
        .collect()
}
