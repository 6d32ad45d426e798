use std::sync::Arc;

use moka::sync::Cache;
use parking_lot::Mutex;

use crate::asset::BinaryAsset;

/// A weighted LRU cache of recently used binaries kept in front of the
/// binary store.
///
/// Writers update the store first and the cache second. Readers filling
/// the cache after a store read go through `fill`, which drops the insert
/// if any write landed since the read began, so a slow read can never put
/// an older binary back over a newer one (or over a delete).
///
/// The cache is cheaply cloneable, a size of `0` disables it.
#[derive(Clone)]
pub struct HotCache {
    state: Option<Cache<String, BinaryAsset>>,
    generation: Arc<Mutex<u64>>,
}

impl HotCache {
    /// Creates a new cache holding at most `max_bytes` of payload.
    pub fn new(max_bytes: u64) -> Self {
        let generation = Arc::new(Mutex::new(0));
        if max_bytes == 0 {
            return Self {
                state: None,
                generation,
            };
        }

        let cache = Cache::builder()
            .weigher(|_key: &String, asset: &BinaryAsset| -> u32 {
                asset.size().try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_bytes)
            .build();

        Self {
            state: Some(cache),
            generation,
        }
    }

    /// Get a item from the cache if it exists otherwise returns None.
    pub fn get(&self, key: &str) -> Option<BinaryAsset> {
        let state = self.state.as_ref()?;
        state.get(&key.to_string())
    }

    /// The write generation, take this before reading from the store
    /// and hand it back to `fill`.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Adds a binary read from the store, unless a write has happened
    /// since `seen` was taken.
    pub fn fill(&self, key: &str, asset: BinaryAsset, seen: u64) {
        let generation = self.generation.lock();
        if *generation != seen {
            return;
        }

        if let Some(state) = self.state.as_ref() {
            state.insert(key.to_string(), asset);
        }
    }

    /// Adds a freshly written binary, evicting the least recently used
    /// entries if the cache is over capacity.
    pub fn set(&self, key: &str, asset: BinaryAsset) {
        let mut generation = self.generation.lock();
        *generation += 1;

        if let Some(state) = self.state.as_ref() {
            state.insert(key.to_string(), asset);
        }
    }

    pub fn invalidate(&self, key: &str) {
        let mut generation = self.generation.lock();
        *generation += 1;

        if let Some(state) = self.state.as_ref() {
            state.invalidate(&key.to_string());
        }
    }

    pub fn clear(&self) {
        let mut generation = self.generation.lock();
        *generation += 1;

        if let Some(state) = self.state.as_ref() {
            state.invalidate_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_cache_holds_nothing() {
        let cache = HotCache::new(0);
        cache.set("a.jpg", BinaryAsset::new(mime::IMAGE_JPEG, &b"abc"[..]));
        assert_eq!(cache.get("a.jpg"), None);
    }

    #[test]
    fn test_set_get_invalidate() {
        let cache = HotCache::new(1024);
        let asset = BinaryAsset::new(mime::IMAGE_JPEG, &b"abc"[..]);

        cache.set("a.jpg", asset.clone());
        assert_eq!(cache.get("a.jpg"), Some(asset));

        cache.invalidate("a.jpg");
        assert_eq!(cache.get("a.jpg"), None);
    }

    #[test]
    fn test_fill_after_write_is_dropped() {
        let cache = HotCache::new(1024);
        let old = BinaryAsset::new(mime::IMAGE_JPEG, &b"old"[..]);
        let new = BinaryAsset::new(mime::IMAGE_JPEG, &b"new"[..]);

        let seen = cache.generation();
        cache.set("a.jpg", new.clone());
        cache.fill("a.jpg", old.clone(), seen);
        assert_eq!(cache.get("a.jpg"), Some(new));

        let seen = cache.generation();
        cache.invalidate("a.jpg");
        cache.fill("a.jpg", old.clone(), seen);
        assert_eq!(cache.get("a.jpg"), None);

        let seen = cache.generation();
        cache.fill("a.jpg", old.clone(), seen);
        assert_eq!(cache.get("a.jpg"), Some(old));
    }
}
