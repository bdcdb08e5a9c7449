//! Row-by-row create/update/upsert against a [`RecordStore`].
//!
//! Every input record is coerced and backfilled up front; records that fail
//! mapping are reported and excluded. The remaining rows are written strictly
//! in source order, each one isolated so a failing row only adds a
//! `"Row N: …"` entry to the report.

use std::fmt;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    assets::AssetResolver,
    backfill::{DefaultContext, backfill},
    coerce::coerce_record,
    error::{ImportError, ImportResult},
    record::{MappedRow, get_path, is_present, set_path},
    recommend::MappingSet,
    schema::Schema,
    store::{Document, Filter, RecordStore, StoreError, document_id},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    #[default]
    Create,
    Update,
    Upsert,
}

impl fmt::Display for ImportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ImportMode::Create => "create",
            ImportMode::Update => "update",
            ImportMode::Upsert => "upsert",
        };
        f.write_str(label)
    }
}

impl ImportMode {
    pub fn needs_compare_field(self) -> bool {
        matches!(self, ImportMode::Update | ImportMode::Upsert)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSettings {
    pub mode: ImportMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compare_field: Option<String>,
    #[serde(default)]
    pub field_mappings: MappingSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

impl ImportSettings {
    /// The compare field, ignoring blank values.
    pub fn compare_field(&self) -> Option<&str> {
        self.compare_field
            .as_deref()
            .map(str::trim)
            .filter(|field| !field.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub total: usize,
    pub processed: usize,
    pub success: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ImportProgress {
    pub fn new(total: usize) -> Self {
        ImportProgress {
            total,
            ..Default::default()
        }
    }

    fn record_success(&mut self) {
        self.processed += 1;
        self.success += 1;
    }

    fn record_failure(&mut self, message: String) {
        self.processed += 1;
        self.failed += 1;
        self.errors.push(message);
    }

    pub fn is_complete(&self) -> bool {
        self.processed >= self.total
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    Created,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDetail {
    pub row: usize,
    pub id: String,
    pub action: RowAction,
    pub data: Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportResponse {
    pub success: bool,
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<RowDetail>>,
}

impl ImportResponse {
    /// A whole-request failure; nothing was written.
    pub fn rejected(message: impl Into<String>, errors: Vec<String>) -> Self {
        ImportResponse {
            success: false,
            message: message.into(),
            errors,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorOptions {
    /// Include per-row details in the response.
    pub verbose: bool,
}

pub struct Executor<'a> {
    store: &'a dyn RecordStore,
    assets: &'a AssetResolver,
    context: DefaultContext,
    options: ExecutorOptions,
}

impl<'a> Executor<'a> {
    pub fn new(store: &'a dyn RecordStore, assets: &'a AssetResolver) -> Self {
        Executor {
            store,
            assets,
            context: DefaultContext::default(),
            options: ExecutorOptions::default(),
        }
    }

    pub fn with_context(mut self, context: DefaultContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_options(mut self, options: ExecutorOptions) -> Self {
        self.options = options;
        self
    }

    pub async fn execute(
        &self,
        collection: &str,
        schema: &Schema,
        records: &[Map<String, Value>],
        settings: &ImportSettings,
    ) -> ImportResponse {
        self.execute_with_progress(collection, schema, records, settings, |_| {})
            .await
    }

    pub async fn execute_with_progress<F>(
        &self,
        collection: &str,
        schema: &Schema,
        records: &[Map<String, Value>],
        settings: &ImportSettings,
        mut on_progress: F,
    ) -> ImportResponse
    where
        F: FnMut(&ImportProgress),
    {
        info!(
            "Importing {} record(s) into '{collection}' ({} mode)",
            records.len(),
            settings.mode
        );
        let mut progress = ImportProgress::new(records.len());
        let locale = settings
            .locale
            .clone()
            .or_else(|| self.context.locale.clone());
        let context = match &locale {
            Some(locale) => self.context.clone().with_locale(locale.clone()),
            None => self.context.clone(),
        };

        let mut rows = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            match coerce_record(index, record, settings.field_mappings.as_slice(), schema) {
                Ok(mut row) => {
                    backfill(&mut row.document, schema, &context);
                    rows.push(row);
                }
                Err(err) => {
                    let message = format!("Row {}: {err}", index + 1);
                    warn!("{message}");
                    progress.record_failure(message);
                    on_progress(&progress);
                }
            }
        }

        let mut created = 0;
        let mut updated = 0;
        let mut details = Vec::new();
        for row in rows {
            let row_number = row.row_number();
            match self
                .write_row(collection, settings, locale.as_deref(), row)
                .await
            {
                Ok(detail) => {
                    match detail.action {
                        RowAction::Created => created += 1,
                        RowAction::Updated => updated += 1,
                    }
                    debug!("Row {row_number}: {:?} {}", detail.action, detail.id);
                    progress.record_success();
                    if self.options.verbose {
                        details.push(detail);
                    }
                }
                Err(err) => {
                    let message = format!("Row {row_number}: {err}");
                    if err.is_row_level() {
                        warn!("{message}");
                    } else {
                        error!("{message}");
                    }
                    progress.record_failure(message);
                }
            }
            on_progress(&progress);
        }

        info!(
            "Import into '{collection}' finished: created {created}, updated {updated}, {} error(s)",
            progress.errors.len()
        );
        ImportResponse {
            success: true,
            created,
            updated,
            message: format!("Import completed: created {created}, updated {updated}"),
            errors: progress.errors,
            details: self.options.verbose.then_some(details),
        }
    }

    async fn resolve_uploads(&self, row: &mut MappedRow) -> ImportResult<()> {
        for pending in std::mem::take(&mut row.pending_uploads) {
            match self
                .assets
                .resolve(self.store, &pending.raw, &pending.relation_to, pending.has_many)
                .await
            {
                Some(asset) => set_path(&mut row.document, &pending.path, asset.into_value())?,
                None => debug!(
                    "Row {}: no asset resolved for '{}'; field omitted",
                    row.row_number(),
                    pending.path
                ),
            }
        }
        Ok(())
    }

    async fn write_row(
        &self,
        collection: &str,
        settings: &ImportSettings,
        locale: Option<&str>,
        mut row: MappedRow,
    ) -> ImportResult<RowDetail> {
        let row_number = row.row_number();
        let existing = self
            .match_existing(collection, settings, locale, &row.document)
            .await?;
        self.resolve_uploads(&mut row).await?;
        let document = row.document;

        let data = Value::Object(document.clone());
        match existing {
            Some(id) => {
                self.store.update(&id, collection, document, locale).await?;
                Ok(RowDetail {
                    row: row_number,
                    id,
                    action: RowAction::Updated,
                    data,
                })
            }
            None => {
                let created = self.store.create(collection, document, locale, None).await?;
                let id = document_id(&created).ok_or_else(|| {
                    StoreError::Backend(format!("record created in '{collection}' has no id"))
                })?;
                Ok(RowDetail {
                    row: row_number,
                    id,
                    action: RowAction::Created,
                    data,
                })
            }
        }
    }

    /// Decides between create and update before anything is written for the row.
    async fn match_existing(
        &self,
        collection: &str,
        settings: &ImportSettings,
        locale: Option<&str>,
        document: &Document,
    ) -> ImportResult<Option<String>> {
        let existing = match settings.mode {
            ImportMode::Create => None,
            ImportMode::Update => {
                let field = settings
                    .compare_field()
                    .ok_or_else(|| ImportError::MissingCompareField(String::new()))?;
                let value = compare_value(document, field)
                    .ok_or_else(|| ImportError::MissingCompareField(field.to_string()))?;
                let found = self.find_existing(collection, field, value, locale).await?;
                Some(found.ok_or_else(|| ImportError::NotFound {
                    field: field.to_string(),
                    value: display_value(value),
                })?)
            }
            ImportMode::Upsert => match settings
                .compare_field()
                .and_then(|field| compare_value(document, field).map(|value| (field, value)))
            {
                Some((field, value)) => self.find_existing(collection, field, value, locale).await?,
                None => None,
            },
        };
        Ok(existing)
    }

    async fn find_existing(
        &self,
        collection: &str,
        field: &str,
        value: &Value,
        locale: Option<&str>,
    ) -> ImportResult<Option<String>> {
        let found = self
            .store
            .find(collection, &Filter::equals(field, value.clone()), 1, locale)
            .await?;
        match found.docs.first() {
            Some(doc) => document_id(doc).map(Some).ok_or_else(|| {
                ImportError::from(StoreError::Backend(format!(
                    "record matched in '{collection}' has no id"
                )))
            }),
            None => Ok(None),
        }
    }
}

fn compare_value<'d>(document: &'d Document, field: &str) -> Option<&'d Value> {
    get_path(document, field).filter(|value| is_present(value))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{AssetFetcher, FetchError, FetchedAsset, RetryPolicy},
        recommend::FieldMapping,
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    struct NoFetch;

    #[async_trait]
    impl AssetFetcher for NoFetch {
        async fn fetch(&self, _url: &Url) -> Result<FetchedAsset, FetchError> {
            Err(FetchError::Other("offline".into()))
        }
    }

    fn resolver() -> AssetResolver {
        AssetResolver::new(Arc::new(NoFetch)).with_policy(RetryPolicy::instant())
    }

    #[derive(Default)]
    struct CountingFetch {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AssetFetcher for CountingFetch {
        async fn fetch(&self, _url: &Url) -> Result<FetchedAsset, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedAsset {
                status: 200,
                content_type: "image/png".into(),
                bytes: vec![1],
            })
        }
    }

    fn schema() -> Schema {
        Schema::from_json(json!([
            {"name": "sku", "type": "text", "required": true},
            {"name": "title", "type": "text"},
            {"name": "price", "type": "number"},
            {"name": "status", "type": "select", "required": true, "defaultValue": "draft"}
        ]))
        .unwrap()
    }

    fn records(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn settings(mode: ImportMode, compare: Option<&str>) -> ImportSettings {
        ImportSettings {
            mode,
            compare_field: compare.map(str::to_string),
            field_mappings: MappingSet::from(vec![
                FieldMapping::new("SKU", "sku"),
                FieldMapping::new("Name", "title"),
                FieldMapping::new("Price", "price"),
            ]),
            locale: None,
        }
    }

    async fn seeded_store() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .create(
                "products",
                json!({"id": "p-1", "sku": "A-1", "title": "Old", "price": 5})
                    .as_object()
                    .cloned()
                    .unwrap(),
                None,
                None,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn create_mode_inserts_every_row_with_defaults() {
        let store = MemoryStore::new();
        let assets = resolver();
        let response = Executor::new(&store, &assets)
            .with_options(ExecutorOptions { verbose: true })
            .execute(
                "products",
                &schema(),
                &records(json!([
                    {"SKU": "A-1", "Name": "Widget", "Price": "10"},
                    {"SKU": "A-2", "Name": "Gadget", "Price": "abc"}
                ])),
                &settings(ImportMode::Create, None),
            )
            .await;
        assert!(response.success);
        assert_eq!(response.created, 2);
        assert_eq!(response.message, "Import completed: created 2, updated 0");
        let docs = store.documents("products").await;
        assert_eq!(docs[1]["price"], json!(0));
        assert_eq!(docs[0]["status"], json!("draft"));
        let details = response.details.unwrap();
        assert_eq!(details[1].row, 2);
        assert_eq!(details[1].action, RowAction::Created);
    }

    #[tokio::test]
    async fn update_mode_reports_missing_and_unmatched_rows() {
        let store = seeded_store().await;
        let assets = resolver();
        let mut snapshots = Vec::new();
        let response = Executor::new(&store, &assets)
            .execute_with_progress(
                "products",
                &schema(),
                &records(json!([
                    {"SKU": "A-1", "Name": "New"},
                    {"SKU": "", "Name": "Nameless"},
                    {"SKU": "Z-9", "Name": "Ghost"}
                ])),
                &settings(ImportMode::Update, Some("sku")),
                |progress| snapshots.push(progress.processed),
            )
            .await;
        assert_eq!(response.updated, 1);
        assert_eq!(response.created, 0);
        assert_eq!(
            response.errors,
            vec![
                "Row 2: missing comparison field \"sku\"".to_string(),
                "Row 3: record with sku=\"Z-9\" not found".to_string(),
            ]
        );
        assert_eq!(snapshots, vec![1, 2, 3]);
        assert!(response.details.is_none());
        let docs = store.documents("products").await;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["title"], json!("New"));
        assert_eq!(docs[0]["price"], json!(5));
    }

    #[tokio::test]
    async fn upsert_mode_updates_matches_and_creates_the_rest() {
        let store = seeded_store().await;
        let assets = resolver();
        let response = Executor::new(&store, &assets)
            .execute(
                "products",
                &schema(),
                &records(json!([
                    {"SKU": "A-1", "Name": "Renamed"},
                    {"SKU": "B-2", "Name": "Fresh"},
                    {"Name": "No sku"}
                ])),
                &settings(ImportMode::Upsert, Some("sku")),
            )
            .await;
        assert_eq!((response.created, response.updated), (2, 1));
        assert!(response.errors.is_empty());
        assert_eq!(store.documents("products").await.len(), 3);
    }

    #[tokio::test]
    async fn mapping_failures_are_reported_and_excluded() {
        let store = MemoryStore::new();
        let assets = resolver();
        let mut settings = settings(ImportMode::Create, None);
        settings.field_mappings = MappingSet::from(vec![
            FieldMapping::new("Flat", "title"),
            FieldMapping::new("Nested", "title.extra"),
        ]);
        let schema = Schema::from_json(json!([
            {"name": "title", "type": "group", "fields": [{"name": "extra", "type": "text"}]}
        ]))
        .unwrap();
        let response = Executor::new(&store, &assets)
            .execute(
                "products",
                &schema,
                &records(json!([{"Flat": "x", "Nested": "y"}, {"Nested": "ok"}])),
                &settings,
            )
            .await;
        assert_eq!(response.created, 1);
        assert_eq!(response.errors.len(), 1);
        assert!(response.errors[0].starts_with("Row 1: mapping failed:"));
    }

    #[tokio::test]
    async fn unresolved_single_uploads_are_omitted() {
        let store = MemoryStore::new();
        let assets = resolver();
        let schema = Schema::from_json(json!([
            {"name": "title", "type": "text"},
            {"name": "cover", "type": "upload", "relationTo": "media"}
        ]))
        .unwrap();
        let settings = ImportSettings {
            field_mappings: MappingSet::from(vec![
                FieldMapping::new("title", "title"),
                FieldMapping::new("image", "cover"),
            ]),
            ..Default::default()
        };
        let response = Executor::new(&store, &assets)
            .execute(
                "products",
                &schema,
                &records(json!([{"title": "Lamp", "image": "https://cdn.test/x.png"}])),
                &settings,
            )
            .await;
        assert_eq!(response.created, 1);
        let docs = store.documents("products").await;
        assert!(!docs[0].contains_key("cover"));
    }

    #[tokio::test]
    async fn failed_update_rows_fetch_and_store_no_assets() {
        let store = seeded_store().await;
        let fetcher = Arc::new(CountingFetch::default());
        let assets = AssetResolver::new(fetcher.clone()).with_policy(RetryPolicy::instant());
        let schema = Schema::from_json(json!([
            {"name": "sku", "type": "text", "required": true},
            {"name": "cover", "type": "upload", "relationTo": "media"}
        ]))
        .unwrap();
        let settings = ImportSettings {
            mode: ImportMode::Update,
            compare_field: Some("sku".into()),
            field_mappings: MappingSet::from(vec![
                FieldMapping::new("SKU", "sku"),
                FieldMapping::new("Image", "cover"),
            ]),
            locale: None,
        };
        let response = Executor::new(&store, &assets)
            .execute(
                "products",
                &schema,
                &records(json!([
                    {"SKU": "GHOST", "Image": "https://cdn.test/ghost.png"},
                    {"SKU": "", "Image": "https://cdn.test/blank.png"},
                    {"SKU": "A-1", "Image": "https://cdn.test/a.png"}
                ])),
                &settings,
            )
            .await;
        assert_eq!(response.updated, 1);
        assert_eq!(
            response.errors,
            vec![
                "Row 1: record with sku=\"GHOST\" not found".to_string(),
                "Row 2: missing comparison field \"sku\"".to_string(),
            ]
        );
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.documents("media").await.len(), 1);
    }
}
