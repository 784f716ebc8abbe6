//! Keyed concurrency primitives for request admission
//!
//! Every primitive hands out an RAII guard, so cancelling or timing out the
//! owning future releases whatever it held. Per-key state is created on
//! first use and evicted once the last holder or waiter is gone.

mod counter;
mod dedup;
mod keyed_mutex;
mod registry;
mod semaphore;

pub use counter::AtomicCounter;
pub use dedup::{DedupEntry, DedupError, DedupTicket, DedupWaiter, Deduplicator, Fingerprint};
pub use keyed_mutex::{KeyedMutex, KeyedMutexGuard};
pub use semaphore::{KeyedSemaphore, SemaphoreGuard};
