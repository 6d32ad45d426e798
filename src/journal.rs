use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::MetadataStore;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// A binary and its metadata are being written.
    Writing,
    /// A binary and its metadata are being removed.
    Deleting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub file_name: String,
    pub stage: Stage,
}

/// Markers for in-flight two store operations.
///
/// An entry is written before the first store is touched and removed once
/// both are done, any entry left behind marks an interrupted operation.
/// Entries live in the metadata store next to, but outside of, the
/// asset namespace.
pub struct Journal {
    prefix: String,
}

impl Journal {
    pub fn new(asset_prefix: &str) -> Self {
        Self {
            prefix: format!("{}~journal-", asset_prefix),
        }
    }

    #[inline]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn key(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    pub fn begin(&self, store: &MetadataStore, file_name: &str, stage: Stage) -> anyhow::Result<()> {
        let entry = JournalEntry {
            file_name: file_name.to_string(),
            stage,
        };

        store.save_value(&self.key(file_name), &entry)
    }

    pub fn finish(&self, store: &MetadataStore, file_name: &str) -> anyhow::Result<()> {
        store.delete(&self.key(file_name))
    }

    /// Every unfinished entry, keyed by journal key.
    pub fn pending(&self, store: &MetadataStore) -> anyhow::Result<BTreeMap<String, JournalEntry>> {
        store.scan(&self.prefix)
    }
}

/// What a reconciliation pass found and did.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    /// Interrupted writes where both halves had landed, only the marker was removed.
    pub completed: Vec<String>,

    /// Interrupted writes whose partial halves were removed.
    pub rolled_back: Vec<String>,

    /// Interrupted deletes that were finished.
    pub finished_deletes: Vec<String>,

    /// Binaries with no metadata record.
    pub orphan_binaries: Vec<String>,

    /// Metadata records (by file name) with no binary.
    pub orphan_metadata: Vec<String>,

    /// Whether the orphans above were removed.
    pub purged: bool,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.completed.is_empty()
            && self.rolled_back.is_empty()
            && self.finished_deletes.is_empty()
            && self.orphan_binaries.is_empty()
            && self.orphan_metadata.is_empty()
    }
}
