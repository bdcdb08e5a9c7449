//! JSON request handler in front of the executor.
//!
//! Accepts `{ "collection": …, "data": [ … ], "settings": { … } }` and answers
//! with a status code plus an [`ImportResponse`]: 400 when the request is
//! structurally invalid or names an unknown collection, 500 when processing
//! fails unexpectedly, 200 otherwise (row errors included).

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use log::{error, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    assets::AssetResolver,
    backfill::DefaultContext,
    config::AppConfig,
    executor::{Executor, ExecutorOptions, ImportResponse, ImportSettings},
    store::RecordStore,
};

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Debug, Deserialize)]
struct RawRequest {
    collection: Option<String>,
    data: Option<Value>,
    settings: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EndpointResponse {
    pub status: u16,
    pub body: ImportResponse,
}

impl EndpointResponse {
    fn bad_request(errors: Vec<String>) -> Self {
        warn!("Rejected import request: {}", errors.join("; "));
        EndpointResponse {
            status: STATUS_BAD_REQUEST,
            body: ImportResponse::rejected("Invalid import data", errors),
        }
    }
}

/// Everything the handler needs besides the request body.
pub struct ImportEndpoint<'a> {
    pub config: &'a AppConfig,
    pub store: &'a dyn RecordStore,
    pub assets: &'a AssetResolver,
    pub context: DefaultContext,
    pub options: ExecutorOptions,
}

impl ImportEndpoint<'_> {
    pub async fn handle(&self, body: &str) -> EndpointResponse {
        let request: RawRequest = match serde_json::from_str(body) {
            Ok(request) => request,
            Err(err) => {
                return EndpointResponse::bad_request(vec![format!(
                    "Request body is not valid JSON: {err}"
                )]);
            }
        };

        let (collection, data) = match (request.collection, request.data) {
            (Some(collection), Some(Value::Array(data))) if !collection.trim().is_empty() => {
                (collection, data)
            }
            _ => {
                return EndpointResponse::bad_request(vec![
                    "Missing required fields: collection, data".to_string(),
                ]);
            }
        };
        let settings: ImportSettings = match request.settings.map(serde_json::from_value) {
            Some(Ok(settings)) => settings,
            Some(Err(err)) => {
                return EndpointResponse::bad_request(vec![format!("Invalid settings: {err}")]);
            }
            None => {
                return EndpointResponse::bad_request(vec![
                    "Missing required field: settings".to_string(),
                ]);
            }
        };
        let Some(schema) = self.config.schema_for(&collection) else {
            return EndpointResponse::bad_request(vec![format!(
                "Unknown collection '{collection}'"
            )]);
        };

        let records = data
            .into_iter()
            .map(|row| match row {
                Value::Object(object) => object,
                _ => Map::new(),
            })
            .collect::<Vec<_>>();

        let executor = Executor::new(self.store, self.assets)
            .with_context(self.context.clone())
            .with_options(self.options);
        let outcome = AssertUnwindSafe(executor.execute(&collection, schema, &records, &settings))
            .catch_unwind()
            .await;
        match outcome {
            Ok(body) => EndpointResponse {
                status: STATUS_OK,
                body,
            },
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<String>()
                    .cloned()
                    .or_else(|| panic.downcast_ref::<&str>().map(|s| s.to_string()))
                    .unwrap_or_else(|| "Unknown error".to_string());
                error!("Import into '{collection}' failed: {reason}");
                EndpointResponse {
                    status: STATUS_INTERNAL_ERROR,
                    body: ImportResponse::rejected("Internal server error", vec![reason]),
                }
            }
        }
    }
}

/// Convenience wrapper around [`ImportEndpoint::handle`].
pub async fn handle_import_request(
    body: &str,
    config: &AppConfig,
    store: &dyn RecordStore,
    assets: &AssetResolver,
    context: DefaultContext,
    options: ExecutorOptions,
) -> EndpointResponse {
    ImportEndpoint {
        config,
        store,
        assets,
        context,
        options,
    }
    .handle(body)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        assets::{AssetFetcher, FetchError, FetchedAsset},
        store::{Document, FileUpload, Filter, FindResult, MemoryStore, StoreError},
    };
    use async_trait::async_trait;
    use std::sync::Arc;
    use url::Url;

    struct NoFetch;

    #[async_trait]
    impl AssetFetcher for NoFetch {
        async fn fetch(&self, _url: &Url) -> Result<FetchedAsset, FetchError> {
            Err(FetchError::Other("offline".into()))
        }
    }

    struct ExplodingStore;

    #[async_trait]
    impl RecordStore for ExplodingStore {
        async fn find(
            &self,
            _collection: &str,
            _filter: &Filter,
            _limit: usize,
            _locale: Option<&str>,
        ) -> Result<FindResult, StoreError> {
            panic!("store unavailable")
        }

        async fn create(
            &self,
            _collection: &str,
            _data: Document,
            _locale: Option<&str>,
            _file: Option<FileUpload>,
        ) -> Result<Document, StoreError> {
            panic!("store unavailable")
        }

        async fn update(
            &self,
            _id: &str,
            _collection: &str,
            _data: Document,
            _locale: Option<&str>,
        ) -> Result<Document, StoreError> {
            panic!("store unavailable")
        }
    }

    fn config() -> AppConfig {
        AppConfig::from_yaml(
            "collections:\n  - slug: products\n    fields:\n      - { name: title, type: text }\n      - { name: status, type: relationship, relationTo: statuses }\n",
        )
        .unwrap()
    }

    async fn call(store: &dyn RecordStore, body: &str) -> EndpointResponse {
        let assets = AssetResolver::new(Arc::new(NoFetch));
        handle_import_request(
            body,
            &config(),
            store,
            &assets,
            DefaultContext::default(),
            ExecutorOptions::default(),
        )
        .await
    }

    #[tokio::test]
    async fn structural_problems_are_bad_requests() {
        let store = MemoryStore::new();
        for body in [
            "nope",
            r#"{"data": []}"#,
            r#"{"collection": "products", "data": {}}"#,
            r#"{"collection": "products", "data": []}"#,
            r#"{"collection": "products", "data": [], "settings": {"mode": "merge"}}"#,
            r#"{"collection": "orders", "data": [], "settings": {"mode": "create"}}"#,
        ] {
            let response = call(&store, body).await;
            assert_eq!(response.status, STATUS_BAD_REQUEST, "{body}");
            assert!(!response.body.success);
            assert_eq!(response.body.created, 0);
        }
    }

    #[tokio::test]
    async fn valid_requests_import_rows() {
        let store = MemoryStore::new();
        let body = r#"{
            "collection": "products",
            "data": [{"Name": "Lamp", "State": "published"}],
            "settings": {
                "mode": "create",
                "fieldMappings": [
                    {"csvField": "Name", "collectionField": "title"},
                    {"csvField": "State", "collectionField": "status"}
                ]
            }
        }"#;
        let response = call(&store, body).await;
        assert_eq!(response.status, STATUS_OK);
        assert!(response.body.success);
        assert_eq!(response.body.message, "Import completed: created 1, updated 0");
        let docs = store.documents("products").await;
        assert_eq!(docs[0]["status"], serde_json::json!({"id": "published"}));
    }

    #[tokio::test]
    async fn unexpected_failures_are_internal_errors() {
        let body = r#"{"collection": "products", "data": [{"Name": "Lamp"}],
            "settings": {"mode": "create", "fieldMappings": [{"csvField": "Name", "collectionField": "title"}]}}"#;
        let response = call(&ExplodingStore, body).await;
        assert_eq!(response.status, STATUS_INTERNAL_ERROR);
        assert_eq!(response.body.errors, vec!["store unavailable".to_string()]);
    }
}
