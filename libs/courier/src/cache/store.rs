use super::{CacheEntry, Fingerprint};
use dashmap::DashMap;

/// Storage backend for [`CacheSubscriber`](super::CacheSubscriber).
pub trait CacheStore: Send + Sync {
    fn get(&self, key: Fingerprint) -> Option<CacheEntry>;

    fn put(&self, key: Fingerprint, entry: CacheEntry);

    /// Remove an entry. Returns `false` if there was none.
    fn delete(&self, key: Fingerprint) -> bool;
}

/// Process-local store backed by a concurrent map.
///
/// Once `max_entries` is reached, storing a new key evicts an arbitrary
/// existing entry.
#[derive(Debug)]
pub struct InMemoryCacheStore {
    entries: DashMap<Fingerprint, CacheEntry>,
    max_entries: usize,
}

impl Default for InMemoryCacheStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryCacheStore {
    #[must_use]
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            max_entries: max_entries.max(1),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: Fingerprint) -> Option<CacheEntry> {
        self.entries.get(&key).map(|entry| entry.value().clone())
    }

    fn put(&self, key: Fingerprint, entry: CacheEntry) {
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            let victim = self.entries.iter().next().map(|e| *e.key());
            if let Some(victim) = victim {
                tracing::debug!(fingerprint = %victim, "Evicting cache entry");
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, entry);
    }

    fn delete(&self, key: Fingerprint) -> bool {
        self.entries.remove(&key).is_some()
    }
}
