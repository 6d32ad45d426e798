use async_trait::async_trait;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::asset::BinaryAsset;
use crate::storage::template::{BinaryBackend, KeyValueBackend};

use super::check_quota;

/// An in-memory binary table, nothing survives the process.
#[derive(Default)]
pub struct MemoryBinaryBackend {
    objects: RwLock<HashMap<String, BinaryAsset>>,
}

impl MemoryBinaryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BinaryBackend for MemoryBinaryBackend {
    async fn open(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn put(&self, key: &str, asset: BinaryAsset) -> anyhow::Result<()> {
        self.objects.write().insert(key.to_string(), asset);
        Ok(())
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<BinaryAsset>> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.objects.read().keys().cloned().collect())
    }

    async fn all(&self) -> anyhow::Result<Vec<(String, BinaryAsset)>> {
        Ok(self
            .objects
            .read()
            .iter()
            .map(|(key, asset)| (key.clone(), asset.clone()))
            .collect())
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.objects.write().clear();
        Ok(())
    }
}

#[derive(Default)]
struct Table {
    entries: HashMap<String, String>,
    used: usize,
}

/// An in-memory key value table with a byte quota.
pub struct MemoryKeyValue {
    table: RwLock<Table>,
    max_size: usize,
}

impl MemoryKeyValue {
    pub fn new(max_size: usize) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            max_size,
        }
    }
}

impl KeyValueBackend for MemoryKeyValue {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>> {
        Ok(self.table.read().entries.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let mut table = self.table.write();
        let replaced = table
            .entries
            .get(key)
            .map(|old| key.len() + old.len())
            .unwrap_or_default();

        let used = check_quota(table.used, replaced, key.len() + value.len(), self.max_size)?;
        table.entries.insert(key.to_string(), value.to_string());
        table.used = used;

        Ok(())
    }

    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let mut table = self.table.write();
        if let Some(old) = table.entries.remove(key) {
            table.used -= key.len() + old.len();
        }

        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.table.read().entries.keys().cloned().collect())
    }

    fn used_bytes(&self) -> usize {
        self.table.read().used
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_quota_counts_keys_and_values() -> anyhow::Result<()> {
        let store = MemoryKeyValue::new(16);

        store.set_item("abc", "12345")?;
        assert_eq!(store.used_bytes(), 8);

        // Replacing a value only counts the difference.
        store.set_item("abc", "123456789")?;
        assert_eq!(store.used_bytes(), 12);

        let err = store.set_item("xyz", "too long").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::QuotaExceeded { needed: 23, limit: 16 }),
        ));
        assert_eq!(store.get_item("xyz")?, None);

        store.remove_item("abc")?;
        store.remove_item("abc")?;
        assert_eq!(store.used_bytes(), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_binary_overwrite() -> anyhow::Result<()> {
        let backend = MemoryBinaryBackend::new();

        backend.put("a", BinaryAsset::new(mime::IMAGE_PNG, &b"first"[..])).await?;
        backend.put("a", BinaryAsset::new(mime::IMAGE_PNG, &b"second"[..])).await?;

        let stored = backend.get("a").await?.map(|v| v.data().clone());
        assert_eq!(stored.as_deref(), Some(&b"second"[..]));
        assert_eq!(backend.keys().await?.len(), 1);

        Ok(())
    }
}
