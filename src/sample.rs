//! Sample CSV/JSON files derived from a collection's flattened fields.

use chrono::{Days, NaiveDate};
use serde_json::{Map, Value};

use crate::{io_utils, schema::CollectionField};

const SELECT_SAMPLES: [&str; 3] = ["published", "draft", "archived"];

fn contains_any(name: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| name.contains(needle))
}

/// Sample value for the `index`-th generated record (1-based).
pub fn sample_value(field: &CollectionField, index: u32, today: NaiveDate) -> String {
    let name = field.name();
    let fallback = || {
        if field.example.is_empty() {
            format!("Value {index}")
        } else {
            field.example.clone()
        }
    };
    match field.field_type.as_str() {
        "checkbox" => (index % 2 == 0).to_string(),
        "date" => today
            .checked_add_days(Days::new(u64::from(index)))
            .unwrap_or(today)
            .format("%Y-%m-%d")
            .to_string(),
        "number" if contains_any(name, &["price", "cost"]) => (1000 * index).to_string(),
        "number" if contains_any(name, &["quantity", "stock"]) => (10 + index * 5).to_string(),
        "number" => index.to_string(),
        "select" => SELECT_SAMPLES[index as usize % SELECT_SAMPLES.len()].to_string(),
        "text" if contains_any(name, &["title", "name"]) => format!("Product {index}"),
        "text" if name.contains("slug") => format!("product-{index}"),
        "text" if name.contains("sku") => format!("SKU-{index:03}"),
        _ => fallback(),
    }
}

/// Header row of field paths, one example row, then two generated rows.
pub fn generate_sample_csv(fields: &[CollectionField], today: NaiveDate) -> anyhow::Result<String> {
    let mut writer = io_utils::csv_writer(Vec::new());
    writer.write_record(fields.iter().map(|field| field.path.as_str()))?;
    writer.write_record(fields.iter().map(|field| field.example.as_str()))?;
    for index in [2, 3] {
        writer.write_record(
            fields
                .iter()
                .map(|field| sample_value(field, index, today)),
        )?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| anyhow::anyhow!("Flushing sample CSV: {}", err.error()))?;
    Ok(String::from_utf8(bytes)?)
}

/// Three generated records keyed by field path.
pub fn generate_sample_json(fields: &[CollectionField], today: NaiveDate) -> anyhow::Result<String> {
    let records = (1..=3)
        .map(|index| {
            let record = fields
                .iter()
                .map(|field| {
                    (
                        field.path.clone(),
                        Value::String(sample_value(field, index, today)),
                    )
                })
                .collect::<Map<_, _>>();
            Value::Object(record)
        })
        .collect::<Vec<_>>();
    Ok(serde_json::to_string_pretty(&records)?)
}
