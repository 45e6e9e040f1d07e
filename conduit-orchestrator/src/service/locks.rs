//! Keyed lock tables
//!
//! Lazily created async locks, one per key: a mutex per run to serialize
//! transitions, a read/write guard per workspace to order credential
//! deletion against run creation.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError};

pub struct LockTable<K, L> {
    locks: Mutex<HashMap<K, Arc<L>>>,
}

impl<K, L> Default for LockTable<K, L> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, L: Default> LockTable<K, L> {
    /// The lock for `key`, created on first use
    pub fn get(&self, key: &K) -> Arc<L> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(key.clone()).or_default().clone()
    }

    /// Forgets the lock for a key that will never be used again
    pub fn remove(&self, key: &K) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.remove(key);
    }

    /// Drops the lock for `key` unless someone still holds or awaits it
    ///
    /// A later `get` creates a fresh lock, which is safe only because no
    /// other copy of the old one is left.
    pub fn release(&self, key: &K) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_shares_lock() {
        let table: LockTable<u32, tokio::sync::Mutex<()>> = LockTable::default();
        let a = table.get(&1);
        let b = table.get(&1);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &table.get(&2)));

        let _held = a.lock().await;
        assert!(b.try_lock().is_err());
        assert!(table.get(&2).try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_release_keeps_locks_in_use() {
        let table: LockTable<u32, tokio::sync::Mutex<()>> = LockTable::default();
        let held = table.get(&1).lock_owned().await;
        drop(table.get(&2));
        assert_eq!(table.len(), 2);

        table.release(&1);
        table.release(&2);
        assert_eq!(table.len(), 1);

        drop(held);
        table.release(&1);
        assert_eq!(table.len(), 0);
    }
}
