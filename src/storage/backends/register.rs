use std::path::PathBuf;
use std::sync::Arc;

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

use super::filesystem::FileSystemBackend;
use super::json_file::JsonFileKeyValue;
use super::memory::{MemoryBinaryBackend, MemoryKeyValue};
use crate::storage::template::{BinaryBackend, KeyValueBackend};

/// The default metadata quota, the common local storage limit.
pub const DEFAULT_METADATA_QUOTA: usize = 5 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryBackendConfigs {
    /// No binary store exists on this host, every operation is a no-op.
    Disabled,
    Memory,
    FileSystem {
        directory: PathBuf,
    },
}

impl BinaryBackendConfigs {
    /// Builds the configured backend, `None` when the store is disabled.
    ///
    /// Nothing is touched on disk until the store is opened.
    pub fn connect(&self) -> Option<Arc<dyn BinaryBackend>> {
        match self {
            Self::Disabled => None,
            Self::Memory => Some(Arc::new(MemoryBinaryBackend::new())),
            Self::FileSystem { directory } => {
                Some(Arc::new(FileSystemBackend::new(directory.clone())))
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataBackendConfigs {
    /// No metadata store exists on this host, every operation is a no-op.
    Disabled,
    Memory {
        #[serde(default = "default_quota")]
        max_size: usize,
    },
    JsonFile {
        path: PathBuf,

        #[serde(default = "default_quota")]
        max_size: usize,
    },
}

impl MetadataBackendConfigs {
    /// Builds the configured backend, `None` when the store is disabled.
    pub fn connect(&self) -> anyhow::Result<Option<KeyValueSelector>> {
        let backend: KeyValueSelector = match self {
            Self::Disabled => return Ok(None),
            Self::Memory { max_size } => MemoryKeyValue::new(*max_size).into(),
            Self::JsonFile { path, max_size } => {
                JsonFileKeyValue::open(path.clone(), *max_size)?.into()
            },
        };

        Ok(Some(backend))
    }
}

/// Metadata backends are selected here.
///
/// Every metadata read is synchronous and sits on the scan path
/// so these are dispatched statically rather than boxed.
#[enum_dispatch(KeyValueBackend)]
pub enum KeyValueSelector {
    MemoryKeyValue,
    JsonFileKeyValue,
}

const fn default_quota() -> usize {
    DEFAULT_METADATA_QUOTA
}
