use std::collections::{BTreeMap, BTreeSet};

use once_cell::sync::OnceCell;
use serde::Serialize;
use tracing::instrument;

use crate::asset::{AssetMetadata, BinaryAsset};
use crate::cache::HotCache;
use crate::config::CacheConfig;
use crate::error::StoreError;
use crate::eviction::SizeLedger;
use crate::index::OwnerIndex;
use crate::journal::{Journal, ReconcileReport, Stage};
use crate::storage::{BinaryStore, MetadataStore};

static CACHE: OnceCell<AssetCache> = OnceCell::new();

/// Installs the process wide cache, later calls are ignored.
pub fn init_cache(cache: AssetCache) {
    if CACHE.set(cache).is_err() {
        warn!("Asset cache already initialised, ignoring");
    }
}

/// The process wide cache, if one has been installed.
#[inline]
pub fn get_cache() -> Option<&'static AssetCache> {
    CACHE.get()
}

/// Tuning options for an `AssetCache`.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub key_prefix: String,
    pub owner_fields: Vec<String>,
    pub memory_cache_size: u64,
    pub max_total_size: Option<u64>,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            key_prefix: "asset-meta".to_string(),
            owner_fields: vec![],
            memory_cache_size: 0,
            max_total_size: None,
        }
    }
}

impl From<&CacheConfig> for CacheOptions {
    fn from(cfg: &CacheConfig) -> Self {
        Self {
            key_prefix: cfg.key_prefix.clone(),
            owner_fields: cfg.owner_fields.clone(),
            memory_cache_size: cfg.memory_cache_size,
            max_total_size: cfg.max_total_size,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_images: usize,
    pub total_size: u64,

    #[serde(rename = "totalSizeMB")]
    pub total_size_mb: f64,

    pub images: Vec<ImageStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImageStats {
    pub key: String,
    pub size: u64,
    pub checksum: u32,
    pub metadata: Option<AssetMetadata>,
}

/// The one entry point for everything that stores or reads assets.
///
/// An asset is a binary in the binary store plus a metadata record stored
/// under `<prefix>-<file name>` in the metadata store. The primitive
/// operations touch one store each, `save_asset` and `delete_asset`
/// cover both and are journaled so `reconcile` can repair them.
///
/// If either store is unavailable its half of every operation is a
/// successful no-op.
pub struct AssetCache {
    binaries: BinaryStore,
    metadata: MetadataStore,
    prefix: String,
    journal: Journal,
    hot: HotCache,
    owners: OwnerIndex,
    ledger: SizeLedger,
}

impl AssetCache {
    pub fn new(binaries: BinaryStore, metadata: MetadataStore, options: CacheOptions) -> Self {
        Self {
            binaries,
            metadata,
            prefix: format!("{}-", options.key_prefix),
            journal: Journal::new(&options.key_prefix),
            hot: HotCache::new(options.memory_cache_size),
            owners: OwnerIndex::new(options.owner_fields),
            ledger: SizeLedger::new(options.max_total_size),
        }
    }

    /// Connects the configured stores and, if enabled, repairs anything
    /// left over from an interrupted run.
    pub async fn start(cfg: &CacheConfig) -> anyhow::Result<Self> {
        let binaries = BinaryStore::from_config(&cfg.binary_store);
        let metadata = MetadataStore::from_config(&cfg.metadata_store)?;
        let cache = Self::new(binaries, metadata, cfg.into());

        if !cache.is_available() {
            warn!("Persistent storage is unavailable, the asset cache will not persist anything");
        } else if cfg.reconcile_on_open {
            let report = cache.reconcile(cfg.purge_orphans).await?;
            if !report.is_clean() {
                warn!("Startup reconciliation repaired the cache: {:?}", report);
            }
        }

        Ok(cache)
    }

    /// Whether both persistent stores exist on this host.
    pub fn is_available(&self) -> bool {
        self.binaries.is_available() && self.metadata.is_available()
    }

    /// The prefixed metadata key for `file_name`.
    pub fn metadata_key(&self, file_name: &str) -> String {
        format!("{}{}", self.prefix, file_name)
    }

    /// The file name a prefixed metadata key belongs to.
    pub fn file_name_of<'a>(&self, key: &'a str) -> Option<&'a str> {
        key.strip_prefix(self.prefix.as_str())
    }

    #[inline]
    pub fn metadata_store(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Stores a binary, replacing any existing one.
    ///
    /// No metadata is written, see `save_asset`.
    #[instrument(skip(self, asset), level = "debug")]
    pub async fn save_image(&self, file_name: &str, asset: BinaryAsset) -> anyhow::Result<()> {
        if !self.binaries.is_available() {
            return Ok(());
        }

        self.ledger.ensure_loaded(&self.binaries).await?;

        let size = asset.size() as u64;
        self.binaries.put(file_name, asset.clone()).await?;
        self.hot.set(file_name, asset);

        if self.ledger.is_enabled() {
            self.ledger.record(file_name, size);
            self.enforce_budget(file_name).await?;
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get_image(&self, file_name: &str) -> anyhow::Result<Option<BinaryAsset>> {
        if let Some(asset) = self.hot.get(file_name) {
            self.ledger.touch(file_name);
            return Ok(Some(asset));
        }

        let seen = self.hot.generation();
        let asset = self.binaries.get(file_name).await?;
        if let Some(ref asset) = asset {
            self.hot.fill(file_name, asset.clone(), seen);
            self.ledger.touch(file_name);
        }

        Ok(asset)
    }

    /// Removes the binary only, its metadata record is left in place.
    ///
    /// Use `delete_asset` to remove both.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_image(&self, file_name: &str) -> anyhow::Result<()> {
        self.binaries.delete(file_name).await?;
        self.hot.invalidate(file_name);
        self.ledger.remove(file_name);
        Ok(())
    }

    /// Stores a metadata record under an already prefixed key.
    pub fn save_metadata(&self, key: &str, record: &AssetMetadata) -> anyhow::Result<()> {
        let old = if self.is_indexed_key(key) {
            self.metadata.get(key)?
        } else {
            None
        };

        self.metadata.save(key, record)?;

        if self.is_indexed_key(key) {
            self.owners.record(key, old.as_ref(), record);
        }

        Ok(())
    }

    pub fn get_metadata(&self, key: &str) -> anyhow::Result<Option<AssetMetadata>> {
        self.metadata.get(key)
    }

    pub fn delete_metadata(&self, key: &str) -> anyhow::Result<()> {
        let old = if self.is_indexed_key(key) {
            self.metadata.get(key)?
        } else {
            None
        };

        self.metadata.delete(key)?;

        if let Some(old) = old {
            self.owners.forget(key, &old);
        }

        Ok(())
    }

    pub async fn get_all_image_keys(&self) -> anyhow::Result<Vec<String>> {
        self.binaries.list_keys().await
    }

    /// Every metadata record of this cache keyed by its prefixed key.
    ///
    /// This scans the whole metadata store.
    pub fn get_all_metadata(&self) -> anyhow::Result<BTreeMap<String, AssetMetadata>> {
        self.metadata.list_all_with_prefix(&self.prefix)
    }

    /// Reads every binary to total up the cache's size.
    pub async fn get_cache_stats(&self) -> anyhow::Result<CacheStats> {
        let mut stored = self.binaries.list_all().await?;
        stored.sort_by(|a, b| a.0.cmp(&b.0));

        let mut images = Vec::with_capacity(stored.len());
        for (key, asset) in stored {
            let metadata = self.metadata.get(&self.metadata_key(&key))?;
            images.push(ImageStats {
                key,
                size: asset.size() as u64,
                checksum: asset.checksum(),
                metadata,
            });
        }

        let total_size: u64 = images.iter().map(|v| v.size).sum();
        let total_size_mb = (total_size as f64 / (1024.0 * 1024.0) * 100.0).round() / 100.0;

        Ok(CacheStats {
            total_images: images.len(),
            total_size,
            total_size_mb,
            images,
        })
    }

    /// Removes every binary and every metadata record of this cache.
    ///
    /// Keys outside of the cache's prefix are left alone.
    pub async fn clear_all(&self) -> anyhow::Result<()> {
        self.binaries.clear().await?;
        self.hot.clear();
        self.ledger.reset();

        let mut keys = self.metadata.keys_with_prefix(&self.prefix)?;
        keys.extend(self.metadata.keys_with_prefix(self.journal.prefix())?);
        for key in keys.iter() {
            self.metadata.delete(key)?;
        }
        self.owners.reset();

        info!("Cleared asset cache, removed {} metadata entries", keys.len());
        Ok(())
    }

    /// Stores a binary and its metadata as one journaled operation.
    ///
    /// If either write fails `file_name` is put back the way it was before
    /// the call, the previous asset if there was one and nothing otherwise.
    #[instrument(skip(self, asset, metadata), level = "debug")]
    pub async fn save_asset(
        &self,
        file_name: &str,
        asset: BinaryAsset,
        metadata: &AssetMetadata,
    ) -> anyhow::Result<()> {
        let key = self.metadata_key(file_name);
        let previous_binary = self.read_intact(file_name).await?;
        let previous_metadata = self.metadata.get(&key)?;

        self.journal.begin(&self.metadata, file_name, Stage::Writing)?;

        let result = async {
            self.save_image(file_name, asset).await?;
            self.save_metadata(&key, metadata)
        }
        .await;

        if let Err(e) = result {
            warn!("Failed to save asset {:?}, rolling back: {:?}", file_name, e);
            let restored = self
                .restore(file_name, previous_binary, previous_metadata.as_ref())
                .await;

            if let Err(rollback) = restored {
                error!("Rollback of {:?} failed, left for reconciliation: {:?}", file_name, rollback);
                return Err(e);
            }

            self.journal.finish(&self.metadata, file_name)?;
            return Err(e);
        }

        self.journal.finish(&self.metadata, file_name)
    }

    /// Removes a binary and its metadata as one journaled operation.
    #[instrument(skip(self), level = "debug")]
    pub async fn delete_asset(&self, file_name: &str) -> anyhow::Result<()> {
        self.journal.begin(&self.metadata, file_name, Stage::Deleting)?;
        self.remove_both(file_name).await?;
        self.journal.finish(&self.metadata, file_name)
    }

    /// Every metadata record whose `field` holds `owner`.
    ///
    /// Numbers match by their decimal form, so `"42"` finds `cardId: 42`.
    pub fn metadata_for_owner(
        &self,
        field: &str,
        owner: &str,
    ) -> anyhow::Result<BTreeMap<String, AssetMetadata>> {
        let indexed = self
            .owners
            .lookup(field, owner, || self.get_all_metadata())?;

        let candidates = match indexed {
            None => self.get_all_metadata()?,
            Some(keys) => {
                let mut found = BTreeMap::new();
                for key in keys {
                    if let Some(record) = self.metadata.get(&key)? {
                        found.insert(key, record);
                    }
                }
                found
            },
        };

        Ok(candidates
            .into_iter()
            .filter(|(_, record)| record.owner(field).as_deref() == Some(owner))
            .collect())
    }

    /// Deletes every asset owned by `owner`, returns how many were removed.
    pub async fn clear_for_owner(&self, field: &str, owner: &str) -> anyhow::Result<usize> {
        let owned = self.metadata_for_owner(field, owner)?;

        let mut removed = 0;
        for key in owned.keys() {
            if let Some(file_name) = self.file_name_of(key) {
                self.delete_asset(file_name).await?;
                removed += 1;
            }
        }

        info!("Cleared {} assets owned by {}={}", removed, field, owner);
        Ok(removed)
    }

    /// Repairs interrupted journaled operations and reports orphans,
    /// removing them if `purge_orphans` is set.
    pub async fn reconcile(&self, purge_orphans: bool) -> anyhow::Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for (_, entry) in self.journal.pending(&self.metadata)? {
            let file_name = entry.file_name.as_str();

            match entry.stage {
                Stage::Writing => {
                    let has_binary = self.read_intact(file_name).await?.is_some();
                    let has_metadata = self.metadata.get(&self.metadata_key(file_name))?.is_some();

                    if has_binary && has_metadata {
                        report.completed.push(entry.file_name.clone());
                    } else {
                        self.remove_both(file_name).await?;
                        report.rolled_back.push(entry.file_name.clone());
                    }
                },
                Stage::Deleting => {
                    self.remove_both(file_name).await?;
                    report.finished_deletes.push(entry.file_name.clone());
                },
            }

            self.journal.finish(&self.metadata, file_name)?;
        }

        if self.is_available() {
            self.find_orphans(&mut report).await?;

            if purge_orphans {
                for file_name in report.orphan_binaries.iter() {
                    self.delete_image(file_name).await?;
                }
                for file_name in report.orphan_metadata.iter() {
                    self.delete_metadata(&self.metadata_key(file_name))?;
                }
                report.purged = true;
            }
        }

        info!(
            "Reconciled asset cache: {} completed, {} rolled back, {} deletes finished, \
            {} orphan binaries, {} orphan records",
            report.completed.len(),
            report.rolled_back.len(),
            report.finished_deletes.len(),
            report.orphan_binaries.len(),
            report.orphan_metadata.len(),
        );

        Ok(report)
    }

    async fn find_orphans(&self, report: &mut ReconcileReport) -> anyhow::Result<()> {
        let binaries: BTreeSet<String> = self.binaries.list_keys().await?.into_iter().collect();
        let records: BTreeSet<String> = self
            .get_all_metadata()?
            .keys()
            .filter_map(|key| self.file_name_of(key))
            .map(ToString::to_string)
            .collect();

        report.orphan_binaries = binaries.difference(&records).cloned().collect();
        report.orphan_metadata = records.difference(&binaries).cloned().collect();

        Ok(())
    }

    /// Reads a binary, treating a corrupt frame as no binary at all.
    async fn read_intact(&self, file_name: &str) -> anyhow::Result<Option<BinaryAsset>> {
        match self.binaries.get(file_name).await {
            Ok(asset) => Ok(asset),
            Err(e) if is_corrupt_frame(&e) => {
                warn!("Binary {:?} is corrupt, treating it as missing: {:?}", file_name, e);
                Ok(None)
            },
            Err(e) => Err(e),
        }
    }

    /// Puts both halves of `file_name` back to a previous state,
    /// `None` means the half did not exist.
    async fn restore(
        &self,
        file_name: &str,
        binary: Option<BinaryAsset>,
        metadata: Option<&AssetMetadata>,
    ) -> anyhow::Result<()> {
        let key = self.metadata_key(file_name);
        match metadata {
            Some(record) => self.save_metadata(&key, record)?,
            None => self.delete_metadata(&key)?,
        }

        match binary {
            None => self.delete_image(file_name).await,
            Some(asset) => {
                let size = asset.size() as u64;
                self.binaries.put(file_name, asset.clone()).await?;
                self.hot.set(file_name, asset);
                if self.ledger.is_enabled() {
                    self.ledger.record(file_name, size);
                }
                Ok(())
            },
        }
    }

    async fn remove_both(&self, file_name: &str) -> anyhow::Result<()> {
        self.delete_metadata(&self.metadata_key(file_name))?;
        self.delete_image(file_name).await
    }

    async fn enforce_budget(&self, protect: &str) -> anyhow::Result<()> {
        for victim in self.ledger.victims(protect) {
            info!("Evicting least recently used asset {:?}", &victim);
            self.delete_asset(&victim).await?;
        }

        Ok(())
    }

    #[inline]
    fn is_indexed_key(&self, key: &str) -> bool {
        self.owners.is_enabled() && key.starts_with(self.prefix.as_str())
    }
}

fn is_corrupt_frame(e: &anyhow::Error) -> bool {
    matches!(
        e.root_cause().downcast_ref::<StoreError>(),
        Some(StoreError::CorruptFrame { .. }),
    )
}
