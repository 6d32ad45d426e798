use std::path::{Path, PathBuf};

use anyhow::Context;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

use crate::storage::backends::{BinaryBackendConfigs, MetadataBackendConfigs, DEFAULT_METADATA_QUOTA};

static CONFIG: OnceCell<CacheConfig> = OnceCell::new();

/// The global config, panics if `init` has not been called.
pub fn config() -> &'static CacheConfig {
    CONFIG.get().expect("config not initialised")
}

/// Loads the config file at `path` as the global config.
///
/// Calling this more than once keeps the first config.
pub fn init(path: &Path) -> anyhow::Result<()> {
    let cfg = CacheConfig::from_file(path)?;
    let _ = CONFIG.set(cfg);
    Ok(())
}

#[cfg(test)]
pub fn init_test(data: &str) -> anyhow::Result<()> {
    let cfg = CacheConfig::from_yaml(data)?;
    let _ = CONFIG.set(cfg);
    Ok(())
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
}

impl Default for LogLevel {
    fn default() -> Self {
        Self::Info
    }
}

impl LogLevel {
    pub fn as_filter(&self) -> LevelFilter {
        match self {
            Self::Off => LevelFilter::OFF,
            Self::Error => LevelFilter::ERROR,
            Self::Warn => LevelFilter::WARN,
            Self::Info => LevelFilter::INFO,
            Self::Debug => LevelFilter::DEBUG,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    /// The log level of the admin tool.
    ///
    /// Defaults to `info`.
    pub log_level: LogLevel,

    #[serde(default = "default_prefix")]
    /// The prefix all metadata keys of this cache share.
    ///
    /// Records are stored under `<prefix>-<file name>`, anything else in
    /// the metadata store is left alone.
    ///
    /// Defaults to `asset-meta`.
    pub key_prefix: String,

    #[serde(default)]
    /// The ownership fields (`cardId`, `sectionId`, ...) to keep an
    /// in-memory index for.
    ///
    /// Owner queries on fields not listed here scan every record.
    pub owner_fields: Vec<String>,

    #[serde(default = "default_memory_cache_size")]
    /// The number of payload bytes to keep in the in-memory read cache.
    ///
    /// This can be set to `0` to disable the read cache.
    ///
    /// Defaults to 32 MiB.
    pub memory_cache_size: u64,

    #[serde(default)]
    /// The maximum number of binary bytes to keep.
    ///
    /// When set, the least recently used assets are removed after
    /// a write goes over the limit. Unlimited if not set.
    pub max_total_size: Option<u64>,

    #[serde(default = "default_true")]
    /// Repair interrupted writes and deletes when the cache starts.
    ///
    /// Defaults to `true`.
    pub reconcile_on_open: bool,

    #[serde(default)]
    /// Remove orphaned binaries and metadata during the startup repair.
    ///
    /// Defaults to `false`.
    pub purge_orphans: bool,

    /// Where image binaries are kept.
    pub binary_store: BinaryBackendConfigs,

    /// Where metadata records are kept.
    pub metadata_store: MetadataBackendConfigs,
}

impl CacheConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        Self::from_yaml(&data)
    }

    pub fn from_yaml(data: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str::<Self>(data)?)
    }

    /// An example config backed by the local filesystem.
    pub fn template() -> Self {
        Self {
            log_level: LogLevel::Info,
            key_prefix: default_prefix(),
            owner_fields: vec!["cardId".to_string(), "sectionId".to_string()],
            memory_cache_size: default_memory_cache_size(),
            max_total_size: Some(512 * 1024 * 1024),
            reconcile_on_open: true,
            purge_orphans: false,
            binary_store: BinaryBackendConfigs::FileSystem {
                directory: PathBuf::from("data/images"),
            },
            metadata_store: MetadataBackendConfigs::JsonFile {
                path: PathBuf::from("data/metadata.json"),
                max_size: DEFAULT_METADATA_QUOTA,
            },
        }
    }
}

fn default_prefix() -> String {
    "asset-meta".to_string()
}

const fn default_memory_cache_size() -> u64 {
    32 * 1024 * 1024
}

const fn default_true() -> bool {
    true
}
