//! Spreadsheet discovery and extraction.
//!
//! Every sheet of every workbook/CSV under the source tree becomes a
//! [`SheetTable`] tagged with its provenance and classification. Unreadable
//! files are logged and skipped.

use calamine::{open_workbook_auto, Data, Reader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

use crate::classifier;
use crate::columns::{detect_header_row, header_texts};
use crate::models::{CellValue, Classification};

pub const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods", "csv"];

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("failed to open workbook {path}: {message}")]
    Workbook { path: String, message: String },
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse CSV {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
}

/// One extracted sheet: provenance, header row and data rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SheetTable {
    pub source_file: String,
    pub sheet_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    pub classification: Classification,
}

impl SheetTable {
    /// File name component of `source_file`.
    pub fn file_name(&self) -> &str {
        Path::new(&self.source_file)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.source_file)
    }
}

/// Result of a full extraction pass.
#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub tables: Vec<SheetTable>,
    pub files_scanned: usize,
    pub files_skipped: usize,
}

/// Whether the path has a workbook or CSV extension.
pub fn is_spreadsheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SPREADSHEET_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Lock files and hidden files left behind by office suites.
fn is_ignored_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("~$") || n.starts_with('.'))
        .unwrap_or(true)
}

/// Recursively lists spreadsheet files in a stable order.
pub fn discover_spreadsheets(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable path during scan: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| is_spreadsheet(path) && !is_ignored_name(path))
        .collect()
}

/// Extracts every spreadsheet under `root`. File-level errors are logged and skipped.
pub fn extract_all(root: &Path) -> ExtractionOutcome {
    let mut outcome = ExtractionOutcome::default();

    for path in discover_spreadsheets(root) {
        outcome.files_scanned += 1;
        match extract_file(&path) {
            Ok(tables) => {
                tracing::debug!("Extracted {} table(s) from {}", tables.len(), path.display());
                outcome.tables.extend(tables);
            }
            Err(e) => {
                tracing::warn!("Skipping file: {}", e);
                outcome.files_skipped += 1;
            }
        }
    }

    tracing::info!(
        "Extracted {} tables from {} files ({} skipped)",
        outcome.tables.len(),
        outcome.files_scanned,
        outcome.files_skipped
    );
    outcome
}

/// Extracts all non-empty sheets of one file.
pub fn extract_file(path: &Path) -> Result<Vec<SheetTable>, ExtractError> {
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let sheets = if is_csv {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("csv")
            .to_string();
        vec![(name, read_csv(path)?)]
    } else {
        read_workbook(path)?
    };

    let source_file = path.display().to_string();
    Ok(sheets
        .into_iter()
        .filter_map(|(sheet_name, rows)| build_table(&source_file, &sheet_name, rows))
        .collect())
}

/// Splits raw rows into header and data; sheets with no data rows yield `None`.
pub fn build_table(source_file: &str, sheet_name: &str, raw_rows: Vec<Vec<CellValue>>) -> Option<SheetTable> {
    let header_idx = detect_header_row(&raw_rows)?;
    let headers = header_texts(&raw_rows[header_idx]);
    let rows: Vec<Vec<CellValue>> = raw_rows
        .into_iter()
        .skip(header_idx + 1)
        .filter(|row| row.iter().any(|c| !c.is_empty()))
        .collect();

    if rows.is_empty() {
        tracing::debug!("Skipping sheet '{}' in {}: no data rows", sheet_name, source_file);
        return None;
    }

    let file_name = Path::new(source_file)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source_file);

    Some(SheetTable {
        source_file: source_file.to_string(),
        sheet_name: sheet_name.to_string(),
        classification: classifier::classify(file_name, sheet_name),
        headers,
        rows,
    })
}

fn read_workbook(path: &Path) -> Result<Vec<(String, Vec<Vec<CellValue>>)>, ExtractError> {
    let mut workbook = open_workbook_auto(path).map_err(|e| ExtractError::Workbook {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    let sheet_names: Vec<String> = workbook.sheet_names().to_vec();
    let mut sheets = Vec::with_capacity(sheet_names.len());

    for sheet_name in sheet_names {
        let range = match workbook.worksheet_range(&sheet_name) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(
                    "Skipping sheet '{}' in {}: {}",
                    sheet_name,
                    path.display(),
                    e
                );
                continue;
            }
        };

        let rows = range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect();
        sheets.push((sheet_name, rows));
    }

    Ok(sheets)
}

fn cell_from_data(cell: &Data) -> CellValue {
    match cell {
        Data::Empty | Data::Error(_) => CellValue::Empty,
        Data::String(s) => CellValue::from(s.as_str()),
        Data::Float(n) => CellValue::Number(*n),
        Data::Int(n) => CellValue::Number(*n as f64),
        Data::Bool(b) => CellValue::Bool(*b),
        Data::DateTime(dt) => CellValue::Serial(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::from(s.as_str()),
    }
}

fn read_csv(path: &Path) -> Result<Vec<Vec<CellValue>>, ExtractError> {
    let content = read_file_as_utf8(path)?;
    let delimiter = sniff_delimiter(&content);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| ExtractError::Csv {
            path: path.display().to_string(),
            source,
        })?;
        rows.push(record.iter().map(CellValue::from).collect());
    }
    Ok(rows)
}

/// Reads a file as UTF-8, falling back to Windows-1252 (common for Excel-exported CSVs).
fn read_file_as_utf8(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;

    match String::from_utf8(bytes) {
        Ok(s) => Ok(s.trim_start_matches('\u{feff}').to_string()),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().filter(|l| !l.trim().is_empty()).take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let Some(&target) = counts.first() else {
            continue;
        };
        if target <= 1 {
            continue;
        }

        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn sniffs_semicolon_exports() {
        let content = "Nombre;Correo;Celular\nAna;a@b.co;3001234567\n";
        assert_eq!(sniff_delimiter(content), b';');
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3\n"), b',');
        assert_eq!(sniff_delimiter(""), b',');
    }

    #[test]
    fn csv_files_become_single_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads_marzo.csv");
        fs::write(
            &path,
            "Nombre;Correo;Celular\nAna Gómez;ana@example.com;3001234567\n;;\nLuis Pérez;;3109876543\n",
        )
        .unwrap();

        let tables = extract_file(&path).unwrap();
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.sheet_name, "leads_marzo");
        assert_eq!(table.classification, Classification::Lead);
        assert_eq!(table.headers, vec!["Nombre", "Correo", "Celular"]);
        assert_eq!(table.rows.len(), 2);
    }

    #[test]
    fn windows_1252_csv_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estudiantes.csv");
        // "Nombre,Dirección\nJosé,Bogotá" in Windows-1252
        let bytes: Vec<u8> = b"Nombre,Direcci\xf3n\nJos\xe9,Bogot\xe1\n".to_vec();
        fs::write(&path, bytes).unwrap();

        let tables = extract_file(&path).unwrap();
        assert_eq!(tables[0].headers[1], "Dirección");
        assert_eq!(tables[0].rows[0][0], CellValue::Text("José".to_string()));
    }

    #[test]
    fn header_only_sheets_are_skipped() {
        let rows = vec![vec![CellValue::from("Nombre"), CellValue::from("Email")]];
        assert!(build_table("x.xlsx", "Students", rows).is_none());
    }

    #[test]
    fn corrupt_workbooks_are_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("broken.xlsx"), b"not a zip file").unwrap();
        fs::write(dir.path().join("~$lock.xlsx"), b"lock").unwrap();
        fs::write(dir.path().join("ok.csv"), "Name,Email\nAna,ana@example.com\n").unwrap();

        let outcome = extract_all(dir.path());
        assert_eq!(outcome.files_scanned, 2);
        assert_eq!(outcome.files_skipped, 1);
        assert_eq!(outcome.tables.len(), 1);
    }
}
