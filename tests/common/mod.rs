#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use record_import::assets::{
    AssetFetcher, AssetResolver, FetchError, FetchedAsset, RetryPolicy,
};
use record_import::schema::Schema;
use serde_json::{Map, Value, json};
use tempfile::{TempDir, tempdir};
use url::Url;

/// Configuration shared by the CLI tests: a products collection with
/// required, defaulted, numeric, select and relationship fields.
pub const PRODUCTS_CONFIG: &str = r#"locale: en
collections:
  - slug: products
    fields:
      - { name: title, type: text, required: true }
      - { name: sku, type: text, required: true }
      - { name: price, type: number }
      - name: status
        type: select
        required: true
        defaultValue: draft
        options: [published, draft, archived]
      - { name: featured, type: checkbox }
"#;

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn write_config(&self) -> PathBuf {
        self.write("config.yaml", PRODUCTS_CONFIG)
    }

    pub fn read_json(&self, name: &str) -> Value {
        let contents = fs::read_to_string(self.path().join(name)).expect("read json file");
        serde_json::from_str(&contents).expect("parse json file")
    }
}

pub fn products_schema() -> Schema {
    Schema::from_json(json!([
        {"name": "title", "type": "text", "required": true},
        {"name": "sku", "type": "text", "required": true},
        {"name": "price", "type": "number"},
        {"name": "status", "type": "select", "required": true, "defaultValue": "draft",
         "options": ["published", "draft", "archived"]},
        {"name": "featured", "type": "checkbox"}
    ]))
    .expect("products schema")
}

pub fn records(value: Value) -> Vec<Map<String, Value>> {
    value
        .as_array()
        .expect("array of records")
        .iter()
        .map(|row| row.as_object().cloned().expect("record object"))
        .collect()
}

/// Serves a tiny PNG for every URL and counts the requests.
pub struct ImageFetcher {
    pub calls: AtomicUsize,
}

impl ImageFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(ImageFetcher {
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AssetFetcher for ImageFetcher {
    async fn fetch(&self, _url: &Url) -> Result<FetchedAsset, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FetchedAsset {
            status: 200,
            content_type: "image/png".to_string(),
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
        })
    }
}

/// Fails every request as if the host were unreachable.
pub struct OfflineFetcher;

#[async_trait]
impl AssetFetcher for OfflineFetcher {
    async fn fetch(&self, _url: &Url) -> Result<FetchedAsset, FetchError> {
        Err(FetchError::Other("offline".to_string()))
    }
}

pub fn resolver_with(fetcher: Arc<dyn AssetFetcher>) -> AssetResolver {
    AssetResolver::new(fetcher)
        .with_policy(RetryPolicy::instant())
        .with_batching(3, std::time::Duration::ZERO)
}

pub fn offline_resolver() -> AssetResolver {
    resolver_with(Arc::new(OfflineFetcher))
}
