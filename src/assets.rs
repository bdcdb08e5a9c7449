//! Resolution of upload-field URLs into stored asset ids.
//!
//! Each URL is looked up in the target media collection first; unknown URLs
//! are downloaded, checked to be images, and stored as new asset records with
//! the bytes attached. Failures are classified and retried per
//! [`RetryPolicy`]; an asset that still fails is dropped and never fails the
//! row that referenced it.

use std::{collections::HashMap, error::Error as _, fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, warn};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use url::Url;

use crate::{
    config::AssetConfig,
    store::{FileUpload, Filter, RecordStore, StoreError, document_id},
};

pub const FALLBACK_FILENAME: &str = "image.jpg";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Dns,
    ConnectionRefused,
    Timeout,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NetworkErrorKind::Dns => "dns lookup failed",
            NetworkErrorKind::ConnectionRefused => "connection refused",
            NetworkErrorKind::Timeout => "timed out",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },
    #[error("HTTP error: {0}")]
    Other(String),
}

/// Raw download result; status and content type are judged by the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedAsset {
    pub status: u16,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl FetchedAsset {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_image(&self) -> bool {
        self.content_type.starts_with("image/")
    }
}

#[async_trait]
pub trait AssetFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedAsset, FetchError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &AssetConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .user_agent(&config.user_agent)
            .build()
            .map_err(|err| FetchError::Other(err.to_string()))?;
        Ok(Self { client })
    }
}

fn classify(err: reqwest::Error) -> FetchError {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    let kind = if err.is_timeout() {
        Some(NetworkErrorKind::Timeout)
    } else if err.is_connect() {
        let lowered = message.to_lowercase();
        if lowered.contains("dns") || lowered.contains("resolve") {
            Some(NetworkErrorKind::Dns)
        } else {
            Some(NetworkErrorKind::ConnectionRefused)
        }
    } else {
        None
    };
    match kind {
        Some(kind) => FetchError::Network { kind, message },
        None => FetchError::Other(message),
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedAsset, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(classify)?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let mut asset = FetchedAsset {
            status,
            content_type,
            bytes: Vec::new(),
        };
        if asset.is_success() && asset.is_image() {
            asset.bytes = response.bytes().await.map_err(classify)?.to_vec();
        }
        Ok(asset)
    }
}

/// Delays between attempts, chosen by failure class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub network_base: Duration,
    pub conflict_base: Duration,
    pub conflict_cap: Duration,
    pub other_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            network_base: Duration::from_millis(1000),
            conflict_base: Duration::from_millis(1000),
            conflict_cap: Duration::from_millis(10_000),
            other_base: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts.
    pub fn instant() -> Self {
        RetryPolicy {
            max_attempts: 3,
            network_base: Duration::ZERO,
            conflict_base: Duration::ZERO,
            conflict_cap: Duration::ZERO,
            other_base: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Delay after failed `attempt` (1-based).
    pub fn delay_for(&self, class: FailureClass, attempt: u32) -> Duration {
        match class {
            FailureClass::Network => self.network_base * attempt,
            FailureClass::Conflict => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                self.conflict_base
                    .saturating_mul(factor)
                    .min(self.conflict_cap)
            }
            FailureClass::Other => self.other_base * attempt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Network,
    Conflict,
    Other,
}

#[derive(Debug, Error)]
enum AttemptError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AttemptError {
    fn class(&self) -> FailureClass {
        match self {
            AttemptError::Fetch(FetchError::Network { .. }) => FailureClass::Network,
            AttemptError::Store(err) if err.is_conflict() => FailureClass::Conflict,
            _ => FailureClass::Other,
        }
    }
}

enum Attempt {
    Resolved(String),
    Rejected(String),
}

#[derive(Debug)]
struct Unresolved;

/// Asset ids produced for an upload field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetRef {
    One(String),
    Many(Vec<String>),
}

impl AssetRef {
    pub fn into_value(self) -> Value {
        match self {
            AssetRef::One(id) => Value::String(id),
            AssetRef::Many(ids) => Value::Array(ids.into_iter().map(Value::String).collect()),
        }
    }
}

type CacheKey = (String, String);

pub struct AssetResolver {
    fetcher: Arc<dyn AssetFetcher>,
    policy: RetryPolicy,
    batch_size: usize,
    batch_pause: Duration,
    cache: Mutex<HashMap<CacheKey, Arc<OnceCell<String>>>>,
}

impl AssetResolver {
    pub fn new(fetcher: Arc<dyn AssetFetcher>) -> Self {
        AssetResolver {
            fetcher,
            policy: RetryPolicy::default(),
            batch_size: 3,
            batch_pause: Duration::from_millis(100),
            cache: Mutex::default(),
        }
    }

    pub fn from_config(config: &AssetConfig) -> Result<Self, FetchError> {
        let fetcher = HttpFetcher::new(config)?;
        Ok(AssetResolver::new(Arc::new(fetcher))
            .with_policy(RetryPolicy::default().with_max_attempts(config.max_attempts))
            .with_batching(config.batch_size, config.batch_pause()))
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batching(mut self, batch_size: usize, batch_pause: Duration) -> Self {
        self.batch_size = batch_size.max(1);
        self.batch_pause = batch_pause;
        self
    }

    /// Resolves a raw upload cell. `None` means nothing could be resolved for a single upload.
    pub async fn resolve(
        &self,
        store: &dyn RecordStore,
        raw: &Value,
        relation_to: &str,
        has_many: bool,
    ) -> Option<AssetRef> {
        if has_many {
            let urls = candidate_urls(raw);
            let mut ids = Vec::with_capacity(urls.len());
            for (idx, chunk) in urls.chunks(self.batch_size).enumerate() {
                if idx > 0 && !self.batch_pause.is_zero() {
                    tokio::time::sleep(self.batch_pause).await;
                }
                let results = join_all(
                    chunk
                        .iter()
                        .map(|url| self.resolve_one(store, url, relation_to)),
                )
                .await;
                ids.extend(results.into_iter().flatten());
            }
            debug!("Resolved {}/{} asset URL(s)", ids.len(), urls.len());
            Some(AssetRef::Many(ids))
        } else {
            let url = single_url(raw)?;
            self.resolve_one(store, &url, relation_to)
                .await
                .map(AssetRef::One)
        }
    }

    /// Resolves one URL to an asset id, reusing earlier results for the same URL.
    pub async fn resolve_one(
        &self,
        store: &dyn RecordStore,
        raw_url: &str,
        relation_to: &str,
    ) -> Option<String> {
        let raw_url = raw_url.trim();
        let url = match Url::parse(raw_url) {
            Ok(url) => url,
            Err(err) => {
                warn!("Skipping invalid asset URL '{raw_url}': {err}");
                return None;
            }
        };
        let cell = {
            let mut cache = self.cache.lock().await;
            cache
                .entry((relation_to.to_string(), raw_url.to_string()))
                .or_default()
                .clone()
        };
        cell.get_or_try_init(|| self.resolve_with_retry(store, &url, raw_url, relation_to))
            .await
            .ok()
            .cloned()
    }

    async fn resolve_with_retry(
        &self,
        store: &dyn RecordStore,
        url: &Url,
        raw_url: &str,
        relation_to: &str,
    ) -> Result<String, Unresolved> {
        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.attempt(store, url, raw_url, relation_to).await {
                Ok(Attempt::Resolved(id)) => return Ok(id),
                Ok(Attempt::Rejected(reason)) => {
                    warn!("Skipping asset '{raw_url}': {reason}");
                    return Err(Unresolved);
                }
                Err(err) if attempt == max_attempts => {
                    warn!("Giving up on asset '{raw_url}' after {attempt} attempt(s): {err}");
                    return Err(Unresolved);
                }
                Err(err) => {
                    let delay = self.policy.delay_for(err.class(), attempt);
                    debug!(
                        "Attempt {attempt}/{max_attempts} for '{raw_url}' failed ({err}); retrying in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        Err(Unresolved)
    }

    async fn attempt(
        &self,
        store: &dyn RecordStore,
        url: &Url,
        raw_url: &str,
        relation_to: &str,
    ) -> Result<Attempt, AttemptError> {
        let existing = store
            .find(
                relation_to,
                &Filter::equals("url", Value::String(raw_url.to_string())),
                1,
                None,
            )
            .await?;
        if let Some(id) = existing.docs.first().and_then(document_id) {
            debug!("Reusing stored asset {id} for '{raw_url}'");
            return Ok(Attempt::Resolved(id));
        }

        let asset = self.fetcher.fetch(url).await?;
        if !asset.is_success() {
            return Ok(Attempt::Rejected(format!("status {}", asset.status)));
        }
        if !asset.is_image() {
            return Ok(Attempt::Rejected(format!(
                "content type '{}' is not an image",
                asset.content_type
            )));
        }

        let filename = filename_from_url(url);
        let size = asset.bytes.len();
        let mut data = Map::new();
        data.insert("alt".into(), json!(filename));
        data.insert("filename".into(), json!(filename));
        data.insert("url".into(), json!(raw_url));
        data.insert("mimeType".into(), json!(asset.content_type));
        data.insert("filesize".into(), json!(size));
        let file = FileUpload {
            data: asset.bytes,
            mimetype: asset.content_type,
            name: filename,
            size,
        };
        let created = store.create(relation_to, data, None, Some(file)).await?;
        let id = document_id(&created).ok_or_else(|| {
            StoreError::Backend(format!("asset created in '{relation_to}' has no id"))
        })?;
        debug!("Stored asset {id} for '{raw_url}'");
        Ok(Attempt::Resolved(id))
    }
}

fn url_strings(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(Value::as_str)
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect()
}

/// Candidate URLs of a multi upload: an array, a JSON array string, or comma-separated text.
pub fn candidate_urls(raw: &Value) -> Vec<String> {
    match raw {
        Value::Array(items) => url_strings(items),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) => url_strings(&items),
            _ => text
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(str::to_string)
                .collect(),
        },
        _ => Vec::new(),
    }
}

/// URL of a single upload: first element of a JSON array, a JSON string, or the trimmed text.
pub fn single_url(raw: &Value) -> Option<String> {
    let url = match raw {
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Array(items)) if !items.is_empty() => items[0].as_str()?.to_string(),
            Ok(Value::String(inner)) => inner,
            _ => text.to_string(),
        },
        Value::Array(items) => items.first()?.as_str()?.to_string(),
        _ => return None,
    };
    let url = url.trim();
    (!url.is_empty()).then(|| url.to_string())
}

pub fn filename_from_url(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}
