use std::collections::BTreeMap;

use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;

use crate::asset::AssetMetadata;

type OwnerKey = (String, String);

/// An in-memory secondary index of `(owner field, owner id) -> metadata keys`.
///
/// The index only covers the configured fields. It is built from a single
/// scan the first time it is needed and kept current by the cache's own
/// metadata writes after that.
pub struct OwnerIndex {
    fields: Vec<String>,
    entries: Mutex<Option<HashMap<OwnerKey, HashSet<String>>>>,
}

impl OwnerIndex {
    pub fn new(fields: Vec<String>) -> Self {
        Self {
            fields,
            entries: Mutex::new(None),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        !self.fields.is_empty()
    }

    pub fn is_indexed(&self, field: &str) -> bool {
        self.fields.iter().any(|f| f == field)
    }

    /// The metadata keys owned by `owner` under `field`.
    ///
    /// `load` provides the full prefixed metadata scan if the index has not
    /// been built yet. Returns `None` if the field is not indexed.
    pub fn lookup<F>(&self, field: &str, owner: &str, load: F) -> anyhow::Result<Option<Vec<String>>>
    where
        F: FnOnce() -> anyhow::Result<BTreeMap<String, AssetMetadata>>,
    {
        if !self.is_indexed(field) {
            return Ok(None);
        }

        let mut entries = self.entries.lock();
        if entries.is_none() {
            let records = load()?;
            *entries = Some(self.build(&records));
            info!("Built owner index over {} metadata records", records.len());
        }

        let keys = entries
            .as_ref()
            .and_then(|map| map.get(&(field.to_string(), owner.to_string())))
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default();

        Ok(Some(keys))
    }

    /// Moves `key` from the owners in `old` to the owners in `new`.
    pub fn record(&self, key: &str, old: Option<&AssetMetadata>, new: &AssetMetadata) {
        let mut entries = self.entries.lock();
        let map = match entries.as_mut() {
            None => return,
            Some(map) => map,
        };

        if let Some(old) = old {
            self.remove_from(map, key, old);
        }

        for field in self.fields.iter() {
            if let Some(owner) = new.owner(field) {
                map.entry((field.clone(), owner))
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    /// Drops `key` from the owners in `old`.
    pub fn forget(&self, key: &str, old: &AssetMetadata) {
        let mut entries = self.entries.lock();
        if let Some(map) = entries.as_mut() {
            self.remove_from(map, key, old);
        }
    }

    /// Throws the index away, it is rebuilt on next use.
    pub fn reset(&self) {
        *self.entries.lock() = None;
    }

    fn build(&self, records: &BTreeMap<String, AssetMetadata>) -> HashMap<OwnerKey, HashSet<String>> {
        let mut map: HashMap<OwnerKey, HashSet<String>> = HashMap::new();

        for (key, record) in records {
            for field in self.fields.iter() {
                if let Some(owner) = record.owner(field) {
                    map.entry((field.clone(), owner))
                        .or_default()
                        .insert(key.clone());
                }
            }
        }

        map
    }

    fn remove_from(&self, map: &mut HashMap<OwnerKey, HashSet<String>>, key: &str, old: &AssetMetadata) {
        for field in self.fields.iter() {
            let owner = match old.owner(field) {
                None => continue,
                Some(owner) => owner,
            };

            let owner_key = (field.clone(), owner);
            if let Some(keys) = map.get_mut(&owner_key) {
                keys.remove(key);
                if keys.is_empty() {
                    map.remove(&owner_key);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records() -> BTreeMap<String, AssetMetadata> {
        let mut records = BTreeMap::new();
        records.insert("m-a".to_string(), AssetMetadata::new("a").with("cardId", 1));
        records.insert("m-b".to_string(), AssetMetadata::new("b").with("cardId", 1));
        records.insert("m-c".to_string(), AssetMetadata::new("c").with("cardId", "2"));
        records
    }

    fn sorted(keys: Option<Vec<String>>) -> Vec<String> {
        let mut keys = keys.unwrap_or_default();
        keys.sort();
        keys
    }

    #[test]
    fn test_lookup_builds_once() -> anyhow::Result<()> {
        let index = OwnerIndex::new(vec!["cardId".to_string()]);

        let mut loads = 0;
        let found = index.lookup("cardId", "1", || {
            loads += 1;
            Ok(records())
        })?;
        assert_eq!(sorted(found), vec!["m-a", "m-b"]);

        let found = index.lookup("cardId", "2", || {
            loads += 1;
            Ok(records())
        })?;
        assert_eq!(sorted(found), vec!["m-c"]);
        assert_eq!(loads, 1);

        Ok(())
    }

    #[test]
    fn test_unindexed_field_is_none() -> anyhow::Result<()> {
        let index = OwnerIndex::new(vec!["cardId".to_string()]);
        assert_eq!(index.lookup("sectionId", "1", || Ok(records()))?, None);
        Ok(())
    }

    #[test]
    fn test_record_moves_key_between_owners() -> anyhow::Result<()> {
        let index = OwnerIndex::new(vec!["cardId".to_string()]);
        index.lookup("cardId", "1", || Ok(records()))?;

        let old = AssetMetadata::new("a").with("cardId", 1);
        let new = AssetMetadata::new("a").with("cardId", 2);
        index.record("m-a", Some(&old), &new);

        assert_eq!(sorted(index.lookup("cardId", "1", || Ok(BTreeMap::new()))?), vec!["m-b"]);
        assert_eq!(
            sorted(index.lookup("cardId", "2", || Ok(BTreeMap::new()))?),
            vec!["m-a", "m-c"],
        );

        index.forget("m-c", &AssetMetadata::new("c").with("cardId", 2));
        assert_eq!(sorted(index.lookup("cardId", "2", || Ok(BTreeMap::new()))?), vec!["m-a"]);

        Ok(())
    }
}
