//! Per-key mutual exclusion

use super::registry::{KeyRegistry, Lease};
use std::hash::Hash;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// One async mutex per key, created on first use and dropped with the last
/// holder or waiter
///
/// Waiters on the same key are served in FIFO order. Unrelated keys never
/// contend with each other.
#[derive(Debug)]
pub struct KeyedMutex<K = String>
where
    K: Eq + Hash,
{
    locks: KeyRegistry<K, Mutex<()>>,
}

impl<K> Default for KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self {
            locks: KeyRegistry::default(),
        }
    }
}

impl<K> KeyedMutex<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    ///
    /// Cancelling the returned future while it waits releases its claim on
    /// the key entry.
    pub async fn lock(&self, key: &K) -> KeyedMutexGuard<K> {
        let lease = self.locks.checkout(key, || Mutex::new(()));
        let guard = lease.shared().lock_owned().await;
        trace!("Keyed lock acquired");
        KeyedMutexGuard {
            _guard: guard,
            _lease: lease,
        }
    }

    /// Number of keys currently held or awaited
    pub fn contended_keys(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key; unlocks on drop
#[derive(Debug)]
pub struct KeyedMutexGuard<K>
where
    K: Eq + Hash,
{
    // Field order matters: unlock before giving up the entry.
    _guard: OwnedMutexGuard<()>,
    _lease: Lease<K, Mutex<()>>,
}
