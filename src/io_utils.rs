//! I/O utilities for input decoding, format detection, and CSV reader/writer setup.
//!
//! All file I/O in record-import flows through this module. It provides:
//!
//! - **Format detection**: extension-based dispatch (`.csv`, `.json`,
//!   `.xlsx`/`.xls`), case-insensitive.
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8, with
//!   a leading byte-order mark stripped.
//! - **Reader/writer construction**: flexible CSV readers (rows may be shorter
//!   or longer than the header) and always-quoting CSV writers.
//! - **stdin/stdout**: the `-` path convention routes through standard streams.

use std::{
    fs::File,
    io::{self, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};

use crate::error::{ImportError, ImportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    Csv,
    Json,
    Spreadsheet,
}

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn detect_format(file_name: &str) -> ImportResult<InputFormat> {
    let lowered = file_name.to_lowercase();
    if lowered.ends_with(".csv") {
        Ok(InputFormat::Csv)
    } else if lowered.ends_with(".json") {
        Ok(InputFormat::Json)
    } else if lowered.ends_with(".xlsx") || lowered.ends_with(".xls") {
        Ok(InputFormat::Spreadsheet)
    } else {
        Err(ImportError::UnsupportedFormat(file_name.to_string()))
    }
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> ImportResult<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        return Err(ImportError::parse(format!(
            "Failed to decode text with encoding {}",
            encoding.name()
        )));
    }
    let text = text.into_owned();
    Ok(match text.strip_prefix('\u{feff}') {
        Some(stripped) => stripped.to_string(),
        None => text,
    })
}

pub fn open_csv_reader<R>(reader: R) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(b',')
        .double_quote(true)
        .trim(csv::Trim::All)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn csv_writer<W>(writer: W) -> csv::Writer<W>
where
    W: Write,
{
    let mut builder = csv::WriterBuilder::new();
    builder
        .delimiter(b',')
        .quote_style(QuoteStyle::Always)
        .double_quote(true);
    builder.from_writer(writer)
}

/// Reads a whole input file, or stdin for `-`.
pub fn read_input(path: &Path) -> ImportResult<Vec<u8>> {
    let mut buf = Vec::new();
    if is_dash(path) {
        io::stdin().lock().read_to_end(&mut buf)?;
    } else {
        File::open(path)?.read_to_end(&mut buf)?;
    }
    Ok(buf)
}

pub fn write_output(path: Option<&Path>, contents: &str) -> Result<()> {
    let mut writer: Box<dyn Write> = match path {
        Some(p) if !is_dash(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("Creating output file {p:?}"))?,
        )),
        _ => Box::new(io::stdout()),
    };
    writer.write_all(contents.as_bytes())?;
    writer.flush()?;
    Ok(())
}
