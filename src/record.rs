//! Mapped row model and dotted-path access into nested JSON documents.

use serde_json::{Map, Value};

use crate::error::{ImportError, ImportResult};

/// An upload field whose raw URL value is resolved to asset ids at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub path: String,
    pub raw: Value,
    pub relation_to: String,
    pub has_many: bool,
}

/// One input row after coercion and backfill, consumed once by the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    pub source_index: usize,
    pub document: Map<String, Value>,
    pub original: Map<String, Value>,
    pub pending_uploads: Vec<PendingUpload>,
}

impl MappedRow {
    pub fn new(source_index: usize, original: Map<String, Value>) -> Self {
        MappedRow {
            source_index,
            original,
            ..Default::default()
        }
    }

    /// 1-based row number used in report messages.
    pub fn row_number(&self) -> usize {
        self.source_index + 1
    }

    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.document, path)
    }

    pub fn has_value(&self, path: &str) -> bool {
        self.get(path).is_some_and(is_present)
    }
}

/// True unless the value is null or an empty string.
pub fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

pub fn get_path<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

pub fn get_path_mut<'a>(document: &'a mut Map<String, Value>, path: &str) -> Option<&'a mut Value> {
    let mut segments = path.split('.');
    let mut current = document.get_mut(segments.next()?)?;
    for segment in segments {
        current = current.as_object_mut()?.get_mut(segment)?;
    }
    Some(current)
}

/// Writes `value` at `path`, creating intermediate objects.
///
/// Fails when an intermediate segment already holds a non-object value.
pub fn set_path(document: &mut Map<String, Value>, path: &str, value: Value) -> ImportResult<()> {
    let segments = path.split('.').collect::<Vec<_>>();
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| ImportError::mapping("empty field path"))?;
    let mut current = document;
    for (depth, segment) in parents.iter().enumerate() {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = entry.as_object_mut().ok_or_else(|| {
            ImportError::mapping(format!(
                "cannot write '{path}': '{}' already holds a non-object value",
                segments[..=depth].join(".")
            ))
        })?;
    }
    current.insert(last.to_string(), value);
    Ok(())
}
