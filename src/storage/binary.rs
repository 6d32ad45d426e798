use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::asset::BinaryAsset;
use crate::storage::backends::BinaryBackendConfigs;
use crate::storage::template::BinaryBackend;

/// The initialisation state of a store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreState {
    Uninitialized,
    Opening,
    Ready,
    /// The host has no such store, this is terminal.
    Unavailable,
}

/// The binary half of the cache.
///
/// The backend is opened lazily by the first operation and exactly once,
/// concurrent callers all wait on the same in-flight open. A failed open
/// leaves the store uninitialised so the next call tries again.
///
/// Without a backend every operation is a successful no-op.
pub struct BinaryStore {
    backend: Option<Arc<dyn BinaryBackend>>,
    opened: OnceCell<()>,
    opening: AtomicBool,
}

impl BinaryStore {
    pub fn new(backend: Arc<dyn BinaryBackend>) -> Self {
        Self {
            backend: Some(backend),
            opened: OnceCell::new(),
            opening: AtomicBool::new(false),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            backend: None,
            opened: OnceCell::new(),
            opening: AtomicBool::new(false),
        }
    }

    pub fn from_config(cfg: &BinaryBackendConfigs) -> Self {
        match cfg.connect() {
            Some(backend) => Self::new(backend),
            None => Self::unavailable(),
        }
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.backend.is_some()
    }

    pub fn state(&self) -> StoreState {
        if self.backend.is_none() {
            StoreState::Unavailable
        } else if self.opened.initialized() {
            StoreState::Ready
        } else if self.opening.load(Ordering::Acquire) {
            StoreState::Opening
        } else {
            StoreState::Uninitialized
        }
    }

    /// Opens the backend if needed, `None` means the store is unavailable.
    pub async fn open(&self) -> anyhow::Result<Option<&dyn BinaryBackend>> {
        let backend = match self.backend.as_ref() {
            None => return Ok(None),
            Some(backend) => backend,
        };

        self.opened
            .get_or_try_init(|| async {
                self.opening.store(true, Ordering::Release);
                let result = backend.open().await;
                self.opening.store(false, Ordering::Release);

                match result {
                    Ok(()) => info!("Binary store opened"),
                    Err(ref e) => error!("Failed to open binary store: {:?}", e),
                }

                result
            })
            .await
            .context("failed to open binary store")?;

        Ok(Some(&**backend))
    }

    #[instrument(skip(self, asset), level = "debug")]
    pub async fn put(&self, key: &str, asset: BinaryAsset) -> anyhow::Result<()> {
        match self.open().await? {
            None => Ok(()),
            Some(backend) => backend
                .put(key, asset)
                .await
                .with_context(|| format!("failed to store binary {:?}", key)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn get(&self, key: &str) -> anyhow::Result<Option<BinaryAsset>> {
        match self.open().await? {
            None => Ok(None),
            Some(backend) => backend
                .get(key)
                .await
                .with_context(|| format!("failed to read binary {:?}", key)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    pub async fn delete(&self, key: &str) -> anyhow::Result<()> {
        match self.open().await? {
            None => Ok(()),
            Some(backend) => backend
                .delete(key)
                .await
                .with_context(|| format!("failed to delete binary {:?}", key)),
        }
    }

    pub async fn list_keys(&self) -> anyhow::Result<Vec<String>> {
        match self.open().await? {
            None => Ok(vec![]),
            Some(backend) => backend.keys().await.context("failed to list binary keys"),
        }
    }

    /// Every stored binary along with its key, in no particular order.
    pub async fn list_all(&self) -> anyhow::Result<Vec<(String, BinaryAsset)>> {
        match self.open().await? {
            None => Ok(vec![]),
            Some(backend) => backend.all().await.context("failed to list binaries"),
        }
    }

    pub async fn clear(&self) -> anyhow::Result<()> {
        match self.open().await? {
            None => Ok(()),
            Some(backend) => backend.clear().await.context("failed to clear binary store"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::storage::backends::memory::MemoryBinaryBackend;

    /// Counts opens and can be told to fail the first one.
    #[derive(Default)]
    struct CountingBackend {
        inner: MemoryBinaryBackend,
        opens: AtomicUsize,
        fail_first: bool,
    }

    #[async_trait]
    impl BinaryBackend for CountingBackend {
        async fn open(&self) -> anyhow::Result<()> {
            let attempt = self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;

            if self.fail_first && attempt == 0 {
                anyhow::bail!("disk not mounted yet");
            }
            Ok(())
        }

        async fn put(&self, key: &str, asset: BinaryAsset) -> anyhow::Result<()> {
            self.inner.put(key, asset).await
        }

        async fn get(&self, key: &str) -> anyhow::Result<Option<BinaryAsset>> {
            self.inner.get(key).await
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.inner.delete(key).await
        }

        async fn keys(&self) -> anyhow::Result<Vec<String>> {
            self.inner.keys().await
        }

        async fn all(&self) -> anyhow::Result<Vec<(String, BinaryAsset)>> {
            self.inner.all().await
        }

        async fn clear(&self) -> anyhow::Result<()> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_open() -> anyhow::Result<()> {
        let backend = Arc::new(CountingBackend::default());
        let store = Arc::new(BinaryStore::new(backend.clone()));
        assert_eq!(store.state(), StoreState::Uninitialized);

        let mut handles = vec![];
        for i in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store.get(&format!("{}.jpg", i)).await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await??, None);
        }

        assert_eq!(backend.opens.load(Ordering::SeqCst), 1);
        assert_eq!(store.state(), StoreState::Ready);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_open_is_retried() -> anyhow::Result<()> {
        let backend = Arc::new(CountingBackend {
            fail_first: true,
            ..Default::default()
        });
        let store = BinaryStore::new(backend.clone());

        assert!(store.list_keys().await.is_err());
        assert_eq!(store.state(), StoreState::Uninitialized);

        assert!(store.list_keys().await?.is_empty());
        assert_eq!(store.state(), StoreState::Ready);
        assert_eq!(backend.opens.load(Ordering::SeqCst), 2);

        Ok(())
    }

    #[tokio::test]
    async fn test_unavailable_store_is_a_no_op() -> anyhow::Result<()> {
        let store = BinaryStore::unavailable();
        assert_eq!(store.state(), StoreState::Unavailable);

        store
            .put("a.jpg", BinaryAsset::new(mime::IMAGE_JPEG, &b"abc"[..]))
            .await?;
        assert_eq!(store.get("a.jpg").await?, None);
        store.delete("a.jpg").await?;
        assert!(store.list_keys().await?.is_empty());
        assert!(store.list_all().await?.is_empty());
        store.clear().await?;

        Ok(())
    }
}
