use std::fmt::Write as _;

use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use record_import::coerce::coerce_record;
use record_import::parse::{TableData, parse_csv};
use record_import::recommend::{FieldMapping, recommend};
use record_import::schema::Schema;
use serde_json::json;

fn generate_products(rows: usize) -> String {
    let mut csv = String::from("Title,SKU,Cost,Qty,Category,Tags,Description\n");
    for i in 0..rows {
        let stock = match i % 3 {
            0 => "в наличии".to_string(),
            1 => "нет".to_string(),
            _ => format!("{},{}", i % 90, i % 10),
        };
        writeln!(
            csv,
            "Product {i},SKU-{i:05},\"{}.{:02}\",\"{stock}\",cat-{},\"a, b, c\",\"Line one\nLine two\"",
            i % 1000,
            i % 100,
            i % 7
        )
        .expect("row");
    }
    csv
}

fn catalog() -> Schema {
    Schema::from_json(json!([
        {"name": "title", "type": "text", "required": true},
        {"name": "sku", "type": "text"},
        {"name": "price", "type": "number"},
        {"name": "quantity", "type": "number"},
        {"name": "category", "type": "relationship", "relationTo": "categories"},
        {"name": "tags", "type": "relationship", "relationTo": "tags", "hasMany": true},
        {"name": "description", "type": "richText"}
    ]))
    .expect("catalog schema")
}

fn mappings(table: &TableData, schema: &Schema) -> Vec<FieldMapping> {
    recommend(&table.headers, &schema.flatten())
        .into_iter()
        .map(|rec| FieldMapping::new(rec.csv_field, rec.recommended_field))
        .collect()
}

fn bench_coerce_rows(c: &mut Criterion) {
    let csv = generate_products(10_000);
    let schema = catalog();
    let table = parse_csv(&csv).expect("parse products");
    let records = table.records();
    let mappings = mappings(&table, &schema);

    let mut group = c.benchmark_group("import_pipeline");

    group.bench_function("parse_csv", |b| {
        b.iter(|| parse_csv(&csv).expect("parse products"));
    });

    group.bench_function("coerce_records", |b| {
        b.iter_batched(
            || (),
            |_| {
                for (index, record) in records.iter().enumerate() {
                    coerce_record(index, record, &mappings, &schema).expect("coerce row");
                }
            },
            BatchSize::SmallInput,
        );
    });

    group.finish();
}

criterion_group!(benches, bench_coerce_rows);
criterion_main!(benches);
