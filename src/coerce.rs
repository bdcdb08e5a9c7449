//! Type-directed coercion of raw cell values into store-ready field values.
//!
//! Every mapped source cell is looked up in the collection [`Schema`] and
//! transformed according to the target [`FieldKind`]:
//!
//! - `richText` → a Lexical editor document built from plain-text paragraphs
//! - `relationship` → `{"id": …}` references (a list when `hasMany`)
//! - `number` → locale-tolerant numeric parsing with availability words
//! - `array` → decoded element objects with synthesized ids and re-coerced
//!   relationship sub-fields
//! - `upload` → deferred as a [`PendingUpload`] for asset resolution
//!
//! Targets that are not part of the schema are dropped, never reported.

use log::debug;
use serde_json::{Map, Value, json};
use uuid::Uuid;

use crate::{
    error::{ImportError, ImportResult},
    recommend::FieldMapping,
    record::{MappedRow, PendingUpload, is_present, set_path},
    schema::{FieldKind, ID_FIELD, Schema},
};

const NEGATIVE_TOKENS: &[&str] = &["нет", "отсутствует"];
const AFFIRMATIVE_TOKENS: &[&str] = &["есть", "наличии"];

/// Coerces one source record according to `mappings`.
///
/// Missing or empty source cells are skipped. The returned row still needs
/// backfill and upload resolution before it is written.
pub fn coerce_record(
    source_index: usize,
    record: &Map<String, Value>,
    mappings: &[FieldMapping],
    schema: &Schema,
) -> ImportResult<MappedRow> {
    let mut row = MappedRow::new(source_index, record.clone());
    for mapping in mappings {
        let Some(raw) = record.get(&mapping.csv_field).filter(|v| is_present(v)) else {
            continue;
        };
        let path = mapping.collection_field.as_str();
        if path == ID_FIELD {
            set_path(&mut row.document, path, raw.clone())?;
            continue;
        }
        let Some(field) = schema.field_at(path) else {
            debug!(
                "Dropping '{}' for row {}: '{path}' is not a collection field",
                mapping.csv_field,
                row.row_number()
            );
            continue;
        };
        let value = match &field.kind {
            FieldKind::RichText => rich_text_document(raw),
            FieldKind::Relationship(relation) => coerce_relationship(raw, relation.has_many),
            FieldKind::Number => coerce_number(raw),
            FieldKind::Array(_) => coerce_array(raw, path, schema),
            FieldKind::Upload(relation) => {
                let relation_to = relation
                    .relation_to
                    .first()
                    .cloned()
                    .ok_or_else(|| ImportError::mapping(format!("'{path}' has no upload target")))?;
                row.pending_uploads.push(PendingUpload {
                    path: path.to_string(),
                    raw: raw.clone(),
                    relation_to,
                    has_many: relation.has_many,
                });
                continue;
            }
            _ => raw.clone(),
        };
        set_path(&mut row.document, path, value)?;
    }
    Ok(row)
}

fn paragraph(children: Vec<Value>) -> Value {
    json!({
        "type": "paragraph",
        "children": children,
        "direction": null,
        "format": "",
        "indent": 0,
        "version": 1
    })
}

/// Wraps plain text into the Lexical document shape, one paragraph per line.
pub fn rich_text_document(raw: &Value) -> Value {
    let text = match raw {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    let mut children = text
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            paragraph(vec![json!({
                "type": "text",
                "detail": 0,
                "format": 0,
                "mode": "normal",
                "style": "",
                "text": line,
                "version": 1
            })])
        })
        .collect::<Vec<_>>();
    if children.is_empty() {
        children.push(paragraph(Vec::new()));
    }
    json!({
        "root": {
            "type": "root",
            "children": children,
            "direction": null,
            "format": "",
            "indent": 0,
            "version": 1
        }
    })
}

fn reference(id: Value) -> Value {
    json!({ "id": id })
}

pub fn coerce_relationship(raw: &Value, has_many: bool) -> Value {
    if !has_many {
        return match raw {
            Value::Object(_) => raw.clone(),
            other => reference(other.clone()),
        };
    }
    let references = match raw {
        Value::String(text) => text
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| reference(Value::String(token.to_string())))
            .collect(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.trim().is_empty() => {
                    Some(reference(Value::String(s.trim().to_string())))
                }
                Value::Number(_) => Some(reference(item.clone())),
                Value::Object(_) => Some(item.clone()),
                _ => None,
            })
            .collect(),
        other => vec![reference(other.clone())],
    };
    Value::Array(references)
}

pub fn coerce_number(raw: &Value) -> Value {
    match raw {
        Value::Number(_) => raw.clone(),
        Value::String(text) => parse_numeric_text(text),
        _ => Value::from(0),
    }
}

fn parse_numeric_text(text: &str) -> Value {
    let lowered = text.to_lowercase();
    if NEGATIVE_TOKENS.iter().any(|token| lowered.contains(token)) {
        return Value::from(0);
    }
    if AFFIRMATIVE_TOKENS.iter().any(|token| lowered.contains(token)) {
        return Value::from(1);
    }
    let normalized = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .map(|c| if c == ',' { '.' } else { c })
        .collect::<String>();
    match float_prefix(&normalized).parse::<f64>() {
        Ok(number) if number.is_finite() => number_value(number),
        _ => Value::from(0),
    }
}

/// Longest leading `-?digits(.digits)?` run, so trailing separators and ranges are ignored.
fn float_prefix(text: &str) -> &str {
    let bytes = text.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        let fraction = bytes[end + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if fraction > 0 {
            end += 1 + fraction;
        }
    }
    &text[..end]
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < 9.0e15 {
        Value::from(number as i64)
    } else {
        Value::from(number)
    }
}

/// Decodes an array field, assigning element ids and coercing relationship children.
pub fn coerce_array(raw: &Value, path: &str, schema: &Schema) -> Value {
    let decoded = match raw {
        Value::String(text) => serde_json::from_str(text).unwrap_or_else(|_| raw.clone()),
        other => other.clone(),
    };
    let Value::Array(elements) = decoded else {
        return Value::Array(Vec::new());
    };
    let elements = elements
        .into_iter()
        .map(|element| match element {
            Value::Object(object) => Value::Object(coerce_array_element(object, path, schema)),
            other => other,
        })
        .collect();
    Value::Array(elements)
}

fn coerce_array_element(
    mut object: Map<String, Value>,
    path: &str,
    schema: &Schema,
) -> Map<String, Value> {
    if !object.get(ID_FIELD).is_some_and(is_present) {
        object.insert(
            ID_FIELD.to_string(),
            Value::String(Uuid::new_v4().to_string()),
        );
    }
    for (key, value) in object.iter_mut() {
        if !is_present(value) {
            continue;
        }
        let child_path = format!("{path}.{key}");
        if let Some(FieldKind::Relationship(relation)) =
            schema.field_at(&child_path).map(|field| &field.kind)
        {
            *value = coerce_relationship(value, relation.has_many);
        }
    }
    object
}
