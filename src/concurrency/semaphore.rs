//! Per-key counting semaphore with bounded waits

use super::registry::{KeyRegistry, Lease};
use std::fmt;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

/// Caps the number of concurrent holders per key
///
/// Each key gets `capacity` permits on first use; the entry is evicted once
/// no holder or waiter remains.
pub struct KeyedSemaphore<K = String>
where
    K: Eq + Hash,
{
    capacity: usize,
    permits: KeyRegistry<K, Semaphore>,
}

impl<K> KeyedSemaphore<K>
where
    K: Eq + Hash + Clone + fmt::Debug,
{
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            permits: KeyRegistry::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Wait up to `timeout` for a permit on `key`
    ///
    /// `None` means the wait timed out and the caller should reject.
    pub async fn acquire(&self, key: &K, timeout: Duration) -> Option<SemaphoreGuard<K>> {
        let capacity = self.capacity;
        let lease = self.permits.checkout(key, || Semaphore::new(capacity));

        match tokio::time::timeout(timeout, lease.shared().acquire_owned()).await {
            Ok(Ok(permit)) => Some(SemaphoreGuard {
                _permit: permit,
                _lease: lease,
            }),
            Ok(Err(_closed)) => None,
            Err(_elapsed) => {
                debug!(
                    key = ?key,
                    capacity,
                    timeout_ms = timeout.as_millis() as u64,
                    "Semaphore acquire timed out"
                );
                None
            }
        }
    }

    /// Take a permit only if one is free right now
    pub fn try_acquire(&self, key: &K) -> Option<SemaphoreGuard<K>> {
        let capacity = self.capacity;
        let lease = self.permits.checkout(key, || Semaphore::new(capacity));
        let permit = lease.shared().try_acquire_owned().ok()?;
        Some(SemaphoreGuard {
            _permit: permit,
            _lease: lease,
        })
    }

    /// Permits currently held on `key`
    pub fn active_count(&self, key: &K) -> usize {
        self.permits
            .get(key)
            .map_or(0, |sem| self.capacity.saturating_sub(sem.available_permits()))
    }

    /// Keys with at least one holder or waiter
    pub fn tracked_keys(&self) -> usize {
        self.permits.len()
    }
}

impl<K> fmt::Debug for KeyedSemaphore<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedSemaphore")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

/// One held permit; returned to the key on drop
#[derive(Debug)]
pub struct SemaphoreGuard<K>
where
    K: Eq + Hash,
{
    // Return the permit before releasing the entry lease.
    _permit: OwnedSemaphorePermit,
    _lease: Lease<K, Semaphore>,
}

impl<K> SemaphoreGuard<K>
where
    K: Eq + Hash,
{
    /// Give the permit back explicitly
    pub fn release(self) {
        drop(self);
    }
}
