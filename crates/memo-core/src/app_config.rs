//! Client-facing app settings kept as one JSON object in the blob store.

use serde_json::{Map, Value};

use crate::config::ServerConfig;
use crate::error::{validate_params, MemoError, Result};
use crate::model::ConfigField;
use crate::storage::{BlobStore, Metadata};

/// Settings every client sees unless overridden.
pub const DEFAULT_APP_CONFIG: [(&str, &str); 2] =
    [("code_hightlight", "0"), ("autosave_timeout", "2000")];

/// Defaults first, then stored entries (stored values win, keeping the
/// default's position).
pub fn merge_with_defaults(stored: &Map<String, Value>) -> Vec<ConfigField> {
    let mut merged = Map::new();
    for (name, value) in DEFAULT_APP_CONFIG {
        merged.insert(name.to_string(), Value::String(value.to_string()));
    }
    for (name, value) in stored {
        merged.insert(name.clone(), value.clone());
    }

    merged
        .into_iter()
        .map(|(name, value)| ConfigField {
            name,
            value: Some(value),
        })
        .collect()
}

pub struct AppConfigStore<'a> {
    store: &'a dyn BlobStore,
    config: &'a ServerConfig,
}

impl<'a> AppConfigStore<'a> {
    pub fn new(store: &'a dyn BlobStore, config: &'a ServerConfig) -> Self {
        Self { store, config }
    }

    /// Read the stored settings.
    ///
    /// Any failure, including a missing object or a body that is not a JSON
    /// object, reads as an empty config.
    pub async fn load(&self) -> Map<String, Value> {
        if self.config.bucket.is_empty() || self.config.config_key.is_empty() {
            tracing::debug!("App config location not configured, using defaults");
            return Map::new();
        }

        let object = match self
            .store
            .get_object(&self.config.bucket, &self.config.config_key)
            .await
        {
            Ok(object) => object,
            Err(e) => {
                tracing::debug!("No stored app config ({}), using defaults", e);
                return Map::new();
            }
        };

        match serde_json::from_slice::<Value>(&object.body) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                tracing::warn!("Stored app config is not a JSON object, ignoring it");
                Map::new()
            }
        }
    }

    pub async fn get(&self) -> Vec<ConfigField> {
        merge_with_defaults(&self.load().await)
    }

    /// Apply `fields` to the stored settings and persist the result.
    ///
    /// A field without a value removes the entry.
    pub async fn set(&self, fields: Vec<ConfigField>) -> Result<Vec<ConfigField>> {
        if fields.is_empty() {
            return Err(MemoError::EmptyConfigUpdate);
        }

        let mut stored = self.load().await;
        for field in fields {
            match field.value {
                Some(Value::Null) | None => {
                    stored.shift_remove(&field.name);
                }
                Some(value) => {
                    stored.insert(field.name, value);
                }
            }
        }

        validate_params(&[
            ("Bucket", self.config.bucket.as_str()),
            ("Key", self.config.config_key.as_str()),
        ])?;

        let body = serde_json::to_vec(&stored)?;
        self.store
            .put_object(&self.config.bucket, &self.config.config_key, body, Metadata::new())
            .await?;
        tracing::debug!("Stored app config with {} entries", stored.len());

        Ok(merge_with_defaults(&stored))
    }
}
