use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free monotonic counter for statistics
///
/// Uses relaxed ordering: values are independent tallies, never used to
/// synchronize other memory.
#[derive(Debug, Default)]
pub struct AtomicCounter(AtomicU64);

impl AtomicCounter {
    pub const fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Returns the new value
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Returns the new value
    pub fn add(&self, amount: u64) -> u64 {
        self.0.fetch_add(amount, Ordering::Relaxed).wrapping_add(amount)
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Zero the counter, returning the value it held
    pub fn reset(&self) -> u64 {
        self.0.swap(0, Ordering::Relaxed)
    }
}
