//! Tabular input parsing.
//!
//! Every supported input (CSV text, a JSON array of objects, the first sheet of
//! an XLSX/XLS workbook) is normalized into a [`TableData`]: ordered headers
//! plus rows of string cells addressed by column index.

use std::{collections::HashSet, io::Cursor, path::Path};

use anyhow::{Context, Result};
use calamine::{Reader, open_workbook_auto_from_rs};
use encoding_rs::Encoding;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    error::{ImportError, ImportResult},
    io_utils::{self, InputFormat},
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableData {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TableData {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Returns the cell at `row`/`column`, treating missing cells as empty.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Returns a row keyed by header, the shape consumed by the import endpoint.
    pub fn record(&self, row: usize) -> Map<String, Value> {
        let mut record = Map::new();
        for (column, header) in self.headers.iter().enumerate() {
            record.insert(
                header.clone(),
                Value::String(self.cell(row, column).to_string()),
            );
        }
        record
    }

    pub fn records(&self) -> Vec<Map<String, Value>> {
        (0..self.rows.len()).map(|row| self.record(row)).collect()
    }

    fn validate(self) -> ImportResult<Self> {
        if self.headers.is_empty() {
            return Err(ImportError::MalformedData(
                "table has no column headers".to_string(),
            ));
        }
        Ok(self)
    }
}

pub fn parse_csv(text: &str) -> ImportResult<TableData> {
    let mut reader = io_utils::open_csv_reader(text.as_bytes());
    let mut lines = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.map_err(|err| {
            ImportError::parse(format!("Failed to read CSV record {}: {err}", idx + 1))
        })?;
        let cells = record.iter().map(clean_csv_cell).collect::<Vec<String>>();
        // whitespace-only line
        if cells.len() == 1 && cells[0].is_empty() {
            continue;
        }
        lines.push(cells);
    }

    let mut lines = lines.into_iter();
    let header_cells = lines
        .next()
        .ok_or_else(|| ImportError::parse("File is empty"))?;
    let blank_columns = header_cells
        .iter()
        .enumerate()
        .filter(|(_, header)| header.is_empty())
        .map(|(idx, _)| idx)
        .collect::<HashSet<_>>();
    let headers = header_cells
        .into_iter()
        .filter(|header| !header.is_empty())
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err(ImportError::parse("No column headers found"));
    }

    let rows = lines
        .map(|cells| {
            cells
                .into_iter()
                .enumerate()
                .filter(|(idx, _)| !blank_columns.contains(idx))
                .map(|(_, cell)| cell)
                .collect()
        })
        .collect();
    debug!("Parsed CSV with {} header(s)", headers.len());
    Ok(TableData { headers, rows })
}

fn clean_csv_cell(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

pub fn parse_json(text: &str) -> ImportResult<TableData> {
    let data: Value = serde_json::from_str(text)
        .map_err(|err| ImportError::parse(format!("Failed to parse JSON: {err}")))?;
    let items = match data {
        Value::Array(items) if !items.is_empty() => items,
        _ => {
            return Err(ImportError::parse(
                "JSON must contain a non-empty array of objects",
            ));
        }
    };
    let first = items
        .first()
        .and_then(Value::as_object)
        .ok_or_else(|| ImportError::parse("JSON must contain a non-empty array of objects"))?;

    let headers = first
        .keys()
        .filter(|key| !key.trim().is_empty())
        .cloned()
        .collect::<Vec<_>>();
    if headers.is_empty() {
        return Err(ImportError::parse("No field names found in the first object"));
    }

    let rows = items
        .iter()
        .map(|item| match item.as_object() {
            Some(object) => headers
                .iter()
                .map(|header| json_cell_to_string(object.get(header)))
                .collect(),
            None => vec![String::new(); headers.len()],
        })
        .collect();
    Ok(TableData { headers, rows })
}

fn json_cell_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(nested @ (Value::Object(_) | Value::Array(_))) => nested.to_string(),
        Some(other) => other.to_string(),
    }
}

/// Reads the first sheet of an XLSX/XLS workbook.
pub fn parse_spreadsheet(bytes: &[u8]) -> ImportResult<TableData> {
    let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|err| ImportError::parse(format!("Failed to open workbook: {err}")))?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| ImportError::parse("Workbook contains no sheets"))?
        .map_err(|err| ImportError::parse(format!("Failed to read first sheet: {err}")))?;

    let mut sheet_rows = range.rows();
    let header_cells = sheet_rows
        .next()
        .ok_or_else(|| ImportError::parse("Spreadsheet is empty"))?
        .iter()
        .map(|cell| cell.to_string().trim().to_string())
        .collect::<Vec<_>>();
    let kept_columns = header_cells
        .iter()
        .enumerate()
        .filter(|(_, header)| !header.is_empty())
        .map(|(idx, _)| idx)
        .collect::<Vec<_>>();
    let headers = kept_columns
        .iter()
        .map(|idx| header_cells[*idx].clone())
        .collect::<Vec<_>>();

    let rows = sheet_rows
        .map(|cells| {
            kept_columns
                .iter()
                .map(|idx| cells.get(*idx).map(|cell| cell.to_string()).unwrap_or_default())
                .collect()
        })
        .collect();
    Ok(TableData { headers, rows })
}

/// Parses `bytes` according to the extension of `file_name`.
pub fn parse_tabular(
    file_name: &str,
    bytes: &[u8],
    encoding: &'static Encoding,
) -> ImportResult<TableData> {
    let table = match io_utils::detect_format(file_name)? {
        InputFormat::Csv => parse_csv(&io_utils::decode_bytes(bytes, encoding)?)?,
        InputFormat::Json => parse_json(&io_utils::decode_bytes(bytes, encoding)?)?,
        InputFormat::Spreadsheet => parse_spreadsheet(bytes)?,
    };
    table.validate()
}

pub fn read_file(path: &Path, encoding: &'static Encoding) -> Result<TableData> {
    let bytes = io_utils::read_input(path).with_context(|| format!("Reading {path:?}"))?;
    let name = path.to_string_lossy();
    parse_tabular(&name, &bytes, encoding).with_context(|| format!("Parsing {path:?}"))
}
