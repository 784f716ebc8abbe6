//! Reference-counted per-key entries that vanish with their last user

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug)]
struct Slot<V> {
    value: Arc<V>,
    refs: usize,
}

type Slots<K, V> = Arc<Mutex<HashMap<K, Slot<V>>>>;

/// Map from key to a shared value, evicting entries nobody holds
///
/// Every holder or waiter of a key owns a [`Lease`]; dropping the last lease
/// removes the entry, so idle keys never accumulate.
#[derive(Debug)]
pub(crate) struct KeyRegistry<K, V> {
    slots: Slots<K, V>,
}

impl<K, V> Default for KeyRegistry<K, V> {
    fn default() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> KeyRegistry<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Take a lease on `key`, creating its value with `init` if absent
    pub(crate) fn checkout(&self, key: &K, init: impl FnOnce() -> V) -> Lease<K, V> {
        let mut slots = self.slots.lock();
        let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
            value: Arc::new(init()),
            refs: 0,
        });
        slot.refs += 1;

        Lease {
            key: key.clone(),
            value: Arc::clone(&slot.value),
            slots: Arc::clone(&self.slots),
        }
    }

    pub(crate) fn get(&self, key: &K) -> Option<Arc<V>> {
        self.slots
            .lock()
            .get(key)
            .map(|slot| Arc::clone(&slot.value))
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.lock().len()
    }
}

/// Claim on a registry entry, released on drop
pub(crate) struct Lease<K, V>
where
    K: Eq + Hash,
{
    key: K,
    value: Arc<V>,
    slots: Slots<K, V>,
}

impl<K, V> Lease<K, V>
where
    K: Eq + Hash,
{
    pub(crate) fn shared(&self) -> Arc<V> {
        Arc::clone(&self.value)
    }
}

impl<K, V> Deref for Lease<K, V>
where
    K: Eq + Hash,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.value
    }
}

impl<K, V> Drop for Lease<K, V>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        let mut slots = self.slots.lock();
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

impl<K, V> std::fmt::Debug for Lease<K, V>
where
    K: Eq + Hash + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease").field("key", &self.key).finish()
    }
}
