use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::RwLock;

use crate::storage::template::KeyValueBackend;

use super::check_quota;

struct Table {
    entries: BTreeMap<String, String>,
    used: usize,
}

/// A key value table persisted as one JSON object on disk.
///
/// The whole table is held in memory and the file is rewritten
/// (temp file + rename) on every change, a write is only visible
/// once it has hit the disk.
pub struct JsonFileKeyValue {
    path: PathBuf,
    table: RwLock<Table>,
    max_size: usize,
}

impl JsonFileKeyValue {
    /// Loads the table from `path`, a missing file is an empty table.
    pub fn open(path: PathBuf, max_size: usize) -> anyhow::Result<Self> {
        let entries: BTreeMap<String, String> = match std::fs::read(&path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("metadata file {:?} is not a JSON string map", &path))?,
            Err(ref e) if e.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(other) => return Err(other.into()),
        };

        let used = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
        info!("Loaded {} metadata entries from {:?}", entries.len(), &path);

        Ok(Self {
            path,
            table: RwLock::new(Table { entries, used }),
            max_size,
        })
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> anyhow::Result<()> {
        let data = serde_json::to_vec(entries)?;
        let tmp = self.path.with_extension("tmp");

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        write_then_rename(&tmp, &self.path, &data)
            .with_context(|| format!("failed to persist metadata file {:?}", &self.path))
    }
}

fn write_then_rename(tmp: &Path, target: &Path, data: &[u8]) -> std::io::Result<()> {
    std::fs::write(tmp, data)?;
    std::fs::rename(tmp, target)
}

impl KeyValueBackend for JsonFileKeyValue {
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

        let mut entries = table.entries.clone();
        entries.insert(key.to_string(), value.to_string());
        self.flush(&entries)?;

        table.entries = entries;
        table.used = used;

        Ok(())
    }

    fn remove_item(&self, key: &str) -> anyhow::Result<()> {
        let mut table = self.table.write();
        let removed = match table.entries.get(key) {
            None => return Ok(()),
            Some(old) => key.len() + old.len(),
        };

        let mut entries = table.entries.clone();
        entries.remove(key);
        self.flush(&entries)?;

        table.entries = entries;
        table.used -= removed;

        Ok(())
    }

    fn keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.table.read().entries.keys().cloned().collect())
    }

    fn used_bytes(&self) -> usize {
        self.table.read().used
    }
}
