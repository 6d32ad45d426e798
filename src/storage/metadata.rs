use std::collections::BTreeMap;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::asset::AssetMetadata;
use crate::storage::backends::{KeyValueSelector, MetadataBackendConfigs};
use crate::storage::template::KeyValueBackend;

/// The metadata half of the cache, JSON records keyed by string.
///
/// Values that fail to parse are treated as absent so one foreign or
/// corrupt entry never breaks a scan. Without a backend every operation
/// is a successful no-op.
pub struct MetadataStore {
    backend: Option<KeyValueSelector>,
}

impl MetadataStore {
    pub fn new(backend: impl Into<KeyValueSelector>) -> Self {
        Self {
            backend: Some(backend.into()),
        }
    }

    pub fn unavailable() -> Self {
        Self { backend: None }
    }

    pub fn from_config(cfg: &MetadataBackendConfigs) -> anyhow::Result<Self> {
        let backend = cfg.connect().context("failed to open metadata store")?;
        Ok(Self { backend })
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    /// Bytes currently counted against the store's quota.
    pub fn used_bytes(&self) -> usize {
        self.backend.as_ref().map(KeyValueBackend::used_bytes).unwrap_or_default()
    }

    pub fn save(&self, key: &str, record: &AssetMetadata) -> anyhow::Result<()> {
        self.save_value(key, record)
    }

    pub fn get(&self, key: &str) -> anyhow::Result<Option<AssetMetadata>> {
        self.get_value(key)
    }

    pub fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self.backend.as_ref() {
            None => Ok(()),
            Some(backend) => {
                debug!("Removing metadata @ {:?}", key);
                backend
                    .remove_item(key)
                    .with_context(|| format!("failed to delete metadata {:?}", key))
            },
        }
    }

    /// Every record whose key starts with `prefix`.
    ///
    /// This walks the whole store, not just the matching keys.
    pub fn list_all_with_prefix(&self, prefix: &str) -> anyhow::Result<BTreeMap<String, AssetMetadata>> {
        self.scan(prefix)
    }

    /// Keys starting with `prefix`, whether or not their values parse.
    pub fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let backend = match self.backend.as_ref() {
            None => return Ok(vec![]),
            Some(backend) => backend,
        };

        let keys = backend
            .keys()
            .context("failed to list metadata keys")?
            .into_iter()
            .filter(|key| key.starts_with(prefix))
            .collect();

        Ok(keys)
    }

    pub(crate) fn save_value<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let backend = match self.backend.as_ref() {
            None => return Ok(()),
            Some(backend) => backend,
        };

        let data = serde_json::to_string(value)?;

        debug!("Storing metadata @ {:?}", key);
        backend
            .set_item(key, &data)
            .with_context(|| format!("failed to store metadata {:?}", key))
    }

    pub(crate) fn get_value<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        let backend = match self.backend.as_ref() {
            None => return Ok(None),
            Some(backend) => backend,
        };

        let raw = backend
            .get_item(key)
            .with_context(|| format!("failed to read metadata {:?}", key))?;

        Ok(raw.and_then(|data| parse(key, &data)))
    }

    pub(crate) fn scan<T: DeserializeOwned>(&self, prefix: &str) -> anyhow::Result<BTreeMap<String, T>> {
        let backend = match self.backend.as_ref() {
            None => return Ok(BTreeMap::new()),
            Some(backend) => backend,
        };

        let mut found = BTreeMap::new();
        for key in backend.keys().context("failed to list metadata keys")? {
            if !key.starts_with(prefix) {
                continue;
            }

            let raw = backend
                .get_item(&key)
                .with_context(|| format!("failed to read metadata {:?}", &key))?;

            if let Some(value) = raw.and_then(|data| parse(&key, &data)) {
                found.insert(key, value);
            }
        }

        Ok(found)
    }
}

fn parse<T: DeserializeOwned>(key: &str, data: &str) -> Option<T> {
    match serde_json::from_str(data) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring unreadable metadata @ {:?}: {}", key, e);
            None
        },
    }
}
