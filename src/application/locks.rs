//! Keyed async lock tables.
//!
//! One table serializes limit mutation per account, one serializes the
//! state re-read per resource and one serializes provider calls per external
//! id. Entries are created on first use and removed when the last guard for
//! the key is released. Clones of a table see the same locks.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type Slots<K> = DashMap<K, Arc<Mutex<()>>>;

/// Exclusive access to one key of a [`LockTable`].
///
/// Dropping the guard releases the key and removes its slot when nobody else
/// holds or waits for it.
pub struct LockGuard<K>
where
    K: Eq + Hash + Clone,
{
    guard: Option<OwnedMutexGuard<()>>,
    key: K,
    locks: Arc<Slots<K>>,
}

impl<K> Drop for LockGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters and pending `slot()` callers hold their own clone of the Arc.
        self.locks
            .remove_if(&self.key, |_, slot| Arc::strong_count(slot) == 1);
    }
}

impl<K> fmt::Debug for LockGuard<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard").finish_non_exhaustive()
    }
}

/// Table of per-key async mutexes.
pub struct LockTable<K>
where
    K: Eq + Hash + Clone,
{
    locks: Arc<Slots<K>>,
}

impl<K> LockTable<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    fn slot(&self, key: K) -> Arc<Mutex<()>> {
        // The map guard is released before awaiting the mutex.
        Arc::clone(self.locks.entry(key).or_default().value())
    }

    fn guard(&self, key: K, guard: OwnedMutexGuard<()>) -> LockGuard<K> {
        LockGuard {
            guard: Some(guard),
            key,
            locks: Arc::clone(&self.locks),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> LockGuard<K> {
        let guard = self.slot(key.clone()).lock_owned().await;
        self.guard(key, guard)
    }

    /// Take exclusive access to `key` only if nobody holds it.
    pub fn try_lock(&self, key: K) -> Option<LockGuard<K>> {
        let slot = self.slot(key.clone());
        match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => Some(self.guard(key, guard)),
            Err(_) => {
                // The holder may have released while we held `slot`.
                drop(slot);
                self.locks
                    .remove_if(&key, |_, slot| Arc::strong_count(slot) == 1);
                None
            }
        }
    }

    /// Whether `key` is currently held.
    pub fn is_locked(&self, key: &K) -> bool {
        self.locks
            .get(key)
            .map(|slot| slot.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn clone(&self) -> Self {
        Self {
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<K> fmt::Debug for LockTable<K>
where
    K: Eq + Hash + Clone,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockTable")
            .field("keys", &self.locks.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_serializes() {
        let table = LockTable::new();
        let guard = table.lock("a").await;

        assert!(table.is_locked(&"a"));
        assert!(table.try_lock("a").is_none());
        assert!(table.try_lock("b").is_some());

        drop(guard);
        assert!(table.try_lock("a").is_some());
    }

    #[tokio::test]
    async fn test_clones_share_locks() {
        let table = LockTable::new();
        let clone = table.clone();
        let _guard = table.lock(1u32).await;

        assert!(clone.is_locked(&1));
        assert_eq!(clone.len(), 1);
    }

    #[tokio::test]
    async fn test_released_keys_are_removed() {
        let table = LockTable::new();
        let first = table.lock("a").await;
        let second = table.try_lock("b").unwrap();
        assert_eq!(table.len(), 2);

        drop(first);
        drop(second);
        assert!(table.is_empty());
        assert!(!table.is_locked(&"a"));
    }

    #[tokio::test]
    async fn test_slot_survives_while_a_waiter_remains() {
        let table = LockTable::new();
        let guard = table.lock("k").await;

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _g = table.lock("k").await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        drop(guard);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(table.is_locked(&"k"));
        assert!(table.try_lock("k").is_none());

        waiter.await.unwrap();
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let table = LockTable::new();
        let guard = table.lock("k").await;

        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _g = table.lock("k").await;
            })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
    }
}
