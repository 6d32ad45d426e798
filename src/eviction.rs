use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::storage::BinaryStore;

#[derive(Debug, Copy, Clone)]
struct Entry {
    size: u64,
    last_access: u64,
}

/// Tracks the size and last access of every stored binary so the cache can
/// stay under a total size budget.
///
/// Access times come from a logical clock rather than the wall clock.
/// Binaries found on disk when the ledger is first loaded are treated as
/// older than anything touched since, in key order.
pub struct SizeLedger {
    max_total: Option<u64>,
    clock: AtomicU64,
    loaded: OnceCell<()>,
    entries: Mutex<HashMap<String, Entry>>,
}

impl SizeLedger {
    pub fn new(max_total: Option<u64>) -> Self {
        Self {
            max_total,
            clock: AtomicU64::new(0),
            loaded: OnceCell::new(),
            entries: Mutex::new(HashMap::new()),
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.max_total.is_some()
    }

    /// Fills the ledger from the binary store the first time it is called.
    pub async fn ensure_loaded(&self, store: &BinaryStore) -> anyhow::Result<()> {
        if !self.is_enabled() {
            return Ok(());
        }

        self.loaded
            .get_or_try_init(|| async {
                let mut found: Vec<(String, u64)> = store
                    .list_all()
                    .await?
                    .into_iter()
                    .map(|(key, asset)| (key, asset.size() as u64))
                    .collect();
                found.sort();

                let mut entries = self.entries.lock();
                for (key, size) in found {
                    let last_access = self.tick();
                    entries.entry(key).or_insert(Entry { size, last_access });
                }

                info!("Loaded size ledger with {} binaries", entries.len());
                Ok::<_, anyhow::Error>(())
            })
            .await?;

        Ok(())
    }

    /// Records a newly written binary as the most recently used.
    pub fn record(&self, key: &str, size: u64) {
        let last_access = self.tick();
        self.entries
            .lock()
            .insert(key.to_string(), Entry { size, last_access });
    }

    /// Marks a binary as just used.
    pub fn touch(&self, key: &str) {
        let last_access = self.tick();
        if let Some(entry) = self.entries.lock().get_mut(key) {
            entry.last_access = last_access;
        }
    }

    pub fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    pub fn total_size(&self) -> u64 {
        self.entries.lock().values().map(|e| e.size).sum()
    }

    /// The least recently used keys, excluding `protect`, that must go for
    /// the ledger to fit the budget again.
    pub fn victims(&self, protect: &str) -> Vec<String> {
        let max_total = match self.max_total {
            None => return vec![],
            Some(max) => max,
        };

        let entries = self.entries.lock();
        let mut total: u64 = entries.values().map(|e| e.size).sum();
        if total <= max_total {
            return vec![];
        }

        let mut candidates: Vec<(&String, &Entry)> = entries
            .iter()
            .filter(|(key, _)| key.as_str() != protect)
            .collect();
        candidates.sort_by_key(|(_, entry)| entry.last_access);

        let mut victims = vec![];
        for (key, entry) in candidates {
            if total <= max_total {
                break;
            }

            total -= entry.size;
            victims.push(key.clone());
        }

        if total > max_total {
            warn!(
                "Binary {:?} alone exceeds the cache size budget of {} bytes",
                protect, max_total,
            );
        }

        victims
    }

    #[inline]
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}
