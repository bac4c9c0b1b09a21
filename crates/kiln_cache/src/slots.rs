//! Per-key locked slots.
//!
//! The outer map is only locked long enough to find or insert a slot; all
//! real work happens under the slot's own mutex, so two keys never contend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

pub(crate) struct Slots<K, V> {
    map: RwLock<HashMap<K, Arc<Mutex<V>>>>,
}

impl<K: Eq + Hash + Clone, V: Default> Slots<K, V> {
    pub(crate) fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the slot for `key`, creating a default one if needed.
    pub(crate) fn slot(&self, key: &K) -> Arc<Mutex<V>> {
        if let Some(slot) = self.get(key) {
            return slot;
        }
        let mut map = self.map.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(map.entry(key.clone()).or_default())
    }

    /// Returns the slot for `key` without creating it.
    pub(crate) fn get(&self, key: &K) -> Option<Arc<Mutex<V>>> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        map.get(key).map(Arc::clone)
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        let map = self.map.read().unwrap_or_else(PoisonError::into_inner);
        map.keys().cloned().collect()
    }
}

/// Locks a slot, recovering from poisoning. Slot values are plain state that
/// every writer leaves consistent before it can panic.
pub(crate) fn lock<V>(slot: &Mutex<V>) -> MutexGuard<'_, V> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}
