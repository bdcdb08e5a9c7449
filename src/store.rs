//! Record-store contract and the JSON-file backed in-memory implementation.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::Path,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::record::get_path;

pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("write conflict: {0}")]
    WriteConflict(String),

    #[error("record '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    #[error("store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::WriteConflict(_))
    }
}

/// Equality filter on a (possibly dotted) field path.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub equals: Value,
}

impl Filter {
    pub fn equals(field: impl Into<String>, value: Value) -> Self {
        Filter {
            field: field.into(),
            equals: value,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FindResult {
    pub docs: Vec<Document>,
}

/// File bytes attached to a `create` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub data: Vec<u8>,
    pub mimetype: String,
    pub name: String,
    pub size: usize,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        locale: Option<&str>,
    ) -> Result<FindResult, StoreError>;

    async fn create(
        &self,
        collection: &str,
        data: Document,
        locale: Option<&str>,
        file: Option<FileUpload>,
    ) -> Result<Document, StoreError>;

    async fn update(
        &self,
        id: &str,
        collection: &str,
        data: Document,
        locale: Option<&str>,
    ) -> Result<Document, StoreError>;
}

/// Renders a document id (string or number) as text.
pub fn document_id(document: &Document) -> Option<String> {
    match document.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Equality with string/number leniency for scalars.
fn values_match(stored: &Value, wanted: &Value) -> bool {
    if stored == wanted {
        return true;
    }
    match (scalar_text(stored), scalar_text(wanted)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: Mutex<BTreeMap<String, Vec<Document>>>,
    attachments: Mutex<HashMap<String, FileUpload>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_collections(collections: BTreeMap<String, Vec<Document>>) -> Self {
        MemoryStore {
            collections: Mutex::new(collections),
            attachments: Mutex::default(),
        }
    }

    /// Loads a store persisted by [`MemoryStore::save`]; a missing file yields an empty store.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("Store file {path:?} does not exist; starting empty");
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("Reading store {path:?}"))?;
        if raw.trim().is_empty() {
            return Ok(Self::new());
        }
        let collections = serde_json::from_str(&raw)
            .with_context(|| format!("Decoding store {path:?}"))?;
        Ok(Self::from_collections(collections))
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let snapshot = self.snapshot().await;
        let serialized = serde_json::to_string_pretty(&snapshot)?;
        fs::write(path, serialized).with_context(|| format!("Writing store {path:?}"))
    }

    pub async fn snapshot(&self) -> BTreeMap<String, Vec<Document>> {
        self.collections.lock().await.clone()
    }

    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .lock()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn attachment(&self, id: &str) -> Option<FileUpload> {
        self.attachments.lock().await.get(id).cloned()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        _locale: Option<&str>,
    ) -> Result<FindResult, StoreError> {
        let collections = self.collections.lock().await;
        let docs = collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| {
                        get_path(doc, &filter.field)
                            .is_some_and(|value| values_match(value, &filter.equals))
                    })
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(FindResult { docs })
    }

    async fn create(
        &self,
        collection: &str,
        mut data: Document,
        _locale: Option<&str>,
        file: Option<FileUpload>,
    ) -> Result<Document, StoreError> {
        let mut collections = self.collections.lock().await;
        let docs = collections.entry(collection.to_string()).or_default();
        let id = match document_id(&data) {
            Some(id) => {
                if docs.iter().any(|doc| document_id(doc).as_deref() == Some(id.as_str())) {
                    return Err(StoreError::WriteConflict(format!(
                        "'{collection}' already contains a record with id '{id}'"
                    )));
                }
                id
            }
            None => {
                let id = Uuid::new_v4().to_string();
                data.insert("id".to_string(), Value::String(id.clone()));
                id
            }
        };
        docs.push(data.clone());
        drop(collections);
        if let Some(file) = file {
            self.attachments.lock().await.insert(id, file);
        }
        Ok(data)
    }

    async fn update(
        &self,
        id: &str,
        collection: &str,
        data: Document,
        _locale: Option<&str>,
    ) -> Result<Document, StoreError> {
        let mut collections = self.collections.lock().await;
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| {
                docs.iter_mut()
                    .find(|doc| document_id(doc).as_deref() == Some(id))
            })
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        for (key, value) in data {
            if key != "id" {
                existing.insert(key, value);
            }
        }
        Ok(existing.clone())
    }
}
