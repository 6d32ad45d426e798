use async_trait::async_trait;
use enum_dispatch::enum_dispatch;

use crate::asset::BinaryAsset;

/// A durable key to binary table.
///
/// Writes overwrite and absent keys are never an error.
#[async_trait]
pub trait BinaryBackend: Sync + Send + 'static {
    /// Performs any one-time setup the backend needs, this is only
    /// ever called once per successful open.
    async fn open(&self) -> anyhow::Result<()>;

    async fn put(&self, key: &str, asset: BinaryAsset) -> anyhow::Result<()>;

    async fn get(&self, key: &str) -> anyhow::Result<Option<BinaryAsset>>;

    async fn delete(&self, key: &str) -> anyhow::Result<()>;

    async fn keys(&self) -> anyhow::Result<Vec<String>>;

    /// Every stored binary along with its key.
    async fn all(&self) -> anyhow::Result<Vec<(String, BinaryAsset)>>;

    /// Removes every binary this backend owns.
    async fn clear(&self) -> anyhow::Result<()>;
}

/// A small synchronous string to string table, the equivalent of
/// a browser's local storage.
#[enum_dispatch]
pub trait KeyValueBackend: Sync + Send {
    fn get_item(&self, key: &str) -> anyhow::Result<Option<String>>;

    fn set_item(&self, key: &str, value: &str) -> anyhow::Result<()>;

    fn remove_item(&self, key: &str) -> anyhow::Result<()>;

    fn keys(&self) -> anyhow::Result<Vec<String>>;

    /// The bytes currently counted against the quota.
    fn used_bytes(&self) -> usize;
}
