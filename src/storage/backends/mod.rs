pub mod filesystem;
pub mod json_file;
pub mod memory;
mod register;

pub use register::{
    BinaryBackendConfigs,
    KeyValueSelector,
    MetadataBackendConfigs,
    DEFAULT_METADATA_QUOTA,
};

use crate::error::StoreError;

/// Works out the bytes in use after replacing `replaced` bytes with `added`,
/// failing if that would go over `limit`.
pub(crate) fn check_quota(
    used: usize,
    replaced: usize,
    added: usize,
    limit: usize,
) -> anyhow::Result<usize> {
    let needed = used - replaced + added;
    if needed > limit {
        return Err(StoreError::QuotaExceeded { needed, limit }.into());
    }

    Ok(needed)
}
