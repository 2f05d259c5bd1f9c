//! Request-id allocation.

use std::sync::atomic::{AtomicU64, Ordering};

/// Hands out positive, strictly increasing request ids.
///
/// Ids are unique for the lifetime of a connection and never reused, so a
/// reply can only ever match the one caller that sent its id. Allocation is
/// a single atomic increment; each value is observed by exactly one caller.
#[derive(Debug)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// Start allocating at 1; zero is reserved as "no id" on the wire.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Return a fresh id.
    ///
    /// # Panics
    /// Panics if the 64-bit id space is exhausted. Unreachable in practice:
    /// at one call per nanosecond that takes five centuries.
    pub fn next_id(&self) -> u64 {
        let id = self.next.fetch_add(1, Ordering::Relaxed);
        assert_ne!(id, u64::MAX, "request id space exhausted");
        id
    }
}
