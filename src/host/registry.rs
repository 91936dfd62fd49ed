//! Thread-safe map from browser ids to local proxies.
//!
//! Ids are assigned atomically, start at 1 and are never reused for the
//! lifetime of a registry. The registry is the one structure mutated
//! concurrently by UI code (create/close) and the notification dispatcher
//! (lookups), so every access goes through a `parking_lot::RwLock`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::BrowserId;

/// Registry of live browser proxies.
pub struct BrowserRegistry<T> {
    /// Next id to hand out.
    next_id: AtomicI32,

    /// Live entries by id.
    entries: RwLock<HashMap<BrowserId, Arc<T>>>,
}

impl<T> Default for BrowserRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> BrowserRegistry<T> {
    /// Creates an empty registry whose first id is 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicI32::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Assigns the next id, builds the entry and inserts it.
    ///
    /// `make` runs outside the lock, so it may itself look up other entries.
    pub fn create<F>(&self, make: F) -> Arc<T>
    where
        F: FnOnce(BrowserId) -> Arc<T>,
    {
        let id = BrowserId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = make(id);
        self.entries.write().insert(id, entry.clone());
        entry
    }

    /// Returns the entry for `id`, if it is still registered.
    pub fn lookup(&self, id: BrowserId) -> Option<Arc<T>> {
        self.entries.read().get(&id).cloned()
    }

    /// Removes and returns the entry for `id`.
    pub fn remove(&self, id: BrowserId) -> Option<Arc<T>> {
        self.entries.write().remove(&id)
    }

    pub fn contains(&self, id: BrowserId) -> bool {
        self.entries.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<BrowserId> {
        let mut ids: Vec<BrowserId> = self.entries.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Clones every registered entry.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries.read().values().cloned().collect()
    }

    /// Removes and returns every entry. Ids keep counting up afterwards.
    pub fn drain(&self) -> Vec<Arc<T>> {
        self.entries.write().drain().map(|(_, entry)| entry).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_start_at_one() {
        let registry: BrowserRegistry<String> = BrowserRegistry::new();
        let first = registry.create(|id| Arc::new(format!("browser-{}", id)));
        let second = registry.create(|id| Arc::new(format!("browser-{}", id)));

        assert_eq!(*first, "browser-1");
        assert_eq!(*second, "browser-2");
        assert_eq!(registry.ids(), vec![BrowserId(1), BrowserId(2)]);
    }

    #[test]
    fn test_concurrent_creates_get_unique_ids() {
        let registry: Arc<BrowserRegistry<BrowserId>> = Arc::new(BrowserRegistry::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || (0..250).map(|_| *registry.create(Arc::new)).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "duplicate id {}", id);
            }
        }

        assert_eq!(seen.len(), 2000);
        assert_eq!(registry.len(), 2000);
        assert!(seen.iter().all(|id| id.get() >= 1));
    }

    #[test]
    fn test_remove_does_not_resurrect() {
        let registry: BrowserRegistry<u8> = BrowserRegistry::new();
        let _ = registry.create(|_| Arc::new(1));

        assert!(registry.remove(BrowserId(1)).is_some());
        assert!(registry.remove(BrowserId(1)).is_none());
        assert!(registry.lookup(BrowserId(1)).is_none());

        let next = registry.create(|_| Arc::new(2));
        assert_eq!(*next, 2);
        assert_eq!(registry.ids(), vec![BrowserId(2)]);
    }

    #[test]
    fn test_drain() {
        let registry: BrowserRegistry<u8> = BrowserRegistry::new();
        for i in 0..3 {
            registry.create(|_| Arc::new(i));
        }

        assert_eq!(registry.drain().len(), 3);
        assert!(registry.is_empty());
    }
}
