//! Error taxonomy shared by the import pipeline.
//!
//! Whole-request failures ([`ImportError::Validation`], parse failures) stop an
//! import before any row is written. Per-row failures ([`ImportError::Mapping`],
//! [`ImportError::NotFound`], [`ImportError::StoreWrite`]) are stringified into
//! the import report and never abort the batch.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unsupported file format '{0}' (supported: CSV, JSON, XLSX, XLS)")]
    UnsupportedFormat(String),

    #[error("Malformed data: {0}")]
    MalformedData(String),

    #[error("Schema error: {0}")]
    Schema(String),

    #[error("mapping failed: {0}")]
    Mapping(String),

    #[error("missing comparison field \"{0}\"")]
    MissingCompareField(String),

    #[error("record with {field}=\"{value}\" not found")]
    NotFound { field: String, value: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    StoreWrite(#[from] StoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ImportError {
    pub fn parse(message: impl Into<String>) -> Self {
        ImportError::Parse(message.into())
    }

    pub fn mapping(message: impl Into<String>) -> Self {
        ImportError::Mapping(message.into())
    }

    /// True for the failures that only affect a single row.
    pub fn is_row_level(&self) -> bool {
        matches!(
            self,
            ImportError::Mapping(_)
                | ImportError::MissingCompareField(_)
                | ImportError::NotFound { .. }
                | ImportError::StoreWrite(_)
        )
    }
}

pub type ImportResult<T> = std::result::Result<T, ImportError>;
