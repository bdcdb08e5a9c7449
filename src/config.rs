//! Application configuration loaded from YAML.
//!
//! ```yaml
//! locale: en
//! verbose: false
//! collections:
//!   - slug: products
//!     fields:
//!       - { name: title, type: text, required: true }
//!       - { name: price, type: number }
//! assets:
//!   batch_size: 3
//!   batch_pause_ms: 100
//! ```

use std::{collections::HashSet, path::Path, time::Duration};

use anyhow::{Context, Result, bail};
use itertools::Itertools;
use serde::Deserialize;

use crate::{schema::Schema, yaml_provider};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub locale: Option<String>,
    pub verbose: bool,
    pub collections: Vec<CollectionConfig>,
    pub assets: AssetConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectionConfig {
    pub slug: String,
    #[serde(default)]
    pub fields: Schema,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    pub batch_size: usize,
    pub batch_pause_ms: u64,
    pub max_attempts: u32,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

impl Default for AssetConfig {
    fn default() -> Self {
        AssetConfig {
            batch_size: 3,
            batch_pause_ms: 100,
            max_attempts: 3,
            request_timeout_secs: 30,
            user_agent: concat!("record-import/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl AssetConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let config: AppConfig = yaml_provider::load_from_path(path)
            .with_context(|| format!("Loading configuration from {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(input: &str) -> Result<Self> {
        let config: AppConfig = yaml_provider::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for collection in &self.collections {
            if collection.slug.trim().is_empty() {
                bail!("Collection slug must not be empty");
            }
            if !seen.insert(collection.slug.as_str()) {
                bail!("Collection '{}' is declared more than once", collection.slug);
            }
        }
        if self.assets.batch_size == 0 {
            bail!("assets.batch_size must be at least 1");
        }
        if self.assets.max_attempts == 0 {
            bail!("assets.max_attempts must be at least 1");
        }
        Ok(())
    }

    pub fn schema_for(&self, slug: &str) -> Option<&Schema> {
        self.collections
            .iter()
            .find(|collection| collection.slug == slug)
            .map(|collection| &collection.fields)
    }

    pub fn require_schema(&self, slug: &str) -> Result<&Schema> {
        match self.schema_for(slug) {
            Some(schema) => Ok(schema),
            None => bail!(
                "Unknown collection '{slug}' (configured: {})",
                self.collections.iter().map(|c| c.slug.as_str()).join(", ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_missing_sections() {
        let config = AppConfig::from_yaml(
            "collections:\n  - slug: products\n    fields:\n      - { name: title, type: text }\n",
        )
        .unwrap();
        assert_eq!(config.assets, AssetConfig::default());
        assert!(!config.verbose);
        assert_eq!(config.schema_for("products").unwrap().fields.len(), 1);
        assert!(config.schema_for("orders").is_none());
        assert!(config.require_schema("orders").is_err());
    }

    #[test]
    fn partial_asset_settings_keep_other_defaults() {
        let config = AppConfig::from_yaml("assets:\n  batch_size: 5\n").unwrap();
        assert_eq!(config.assets.batch_size, 5);
        assert_eq!(config.assets.batch_pause(), Duration::from_millis(100));
    }

    #[test]
    fn duplicate_slugs_and_invalid_fields_are_rejected() {
        assert!(AppConfig::from_yaml("collections:\n  - slug: a\n  - slug: a\n").is_err());
        assert!(
            AppConfig::from_yaml(
                "collections:\n  - slug: a\n    fields:\n      - { name: x, type: nope }\n"
            )
            .is_err()
        );
        assert!(AppConfig::from_yaml("assets:\n  batch_size: 0\n").is_err());
    }
}
