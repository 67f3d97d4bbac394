//! Per-key async locks, keyed by Application or by checkout path.

use crate::crd::AppKey;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;

/// One async mutex per key, created on first use
#[derive(Debug)]
pub struct KeyedLocks<K = AppKey> {
    locks: Mutex<HashMap<K, Arc<AsyncMutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock handle for `key`; hold its guard for the critical section
    pub fn lock_for(&self, key: &K) -> Arc<AsyncMutex<()>> {
        match self.locks.lock() {
            Ok(mut locks) => Arc::clone(
                locks
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            ),
            // A poisoned map only loses sharing, never exclusivity of held guards
            Err(poisoned) => Arc::clone(
                poisoned
                    .into_inner()
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            ),
        }
    }

    /// Drop the lock of a key that is gone
    pub fn forget(&self, key: &K) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_shares_lock() {
        let locks = KeyedLocks::new();
        let a = AppKey::new("web", "default");
        let first = locks.lock_for(&a);
        let second = locks.lock_for(&a);
        assert!(Arc::ptr_eq(&first, &second));

        let _guard = first.lock().await;
        assert!(second.try_lock().is_err());
        let other = locks.lock_for(&AppKey::new("api", "default"));
        assert!(other.try_lock().is_ok());
    }

    #[test]
    fn test_forget_releases_entry() {
        let locks = KeyedLocks::new();
        let key = AppKey::new("web", "default");
        let first = locks.lock_for(&key);
        locks.forget(&key);
        assert!(!Arc::ptr_eq(&first, &locks.lock_for(&key)));
    }
}
