//! Accounting counters for the static allocator
//!
//! Three process-facing figures: live allocation count (exact in every
//! configuration), current usage and peak usage (meaningful only while
//! usage tracking is enabled). Counter updates are individually atomic;
//! cross-counter consistency under concurrent mutation is a documented
//! caller responsibility, not something this module enforces.

use core::sync::atomic::{AtomicUsize, Ordering};

/// Atomic counters backing the static allocator's usage queries.
#[derive(Debug)]
pub struct StaticStats {
    /// Live allocations (allocate minus release)
    alloc_count: AtomicUsize,
    /// Bytes currently allocated, as requested by callers (headers excluded)
    mem_usage: AtomicUsize,
    /// Historical peak of `mem_usage`
    max_usage: AtomicUsize,
}

impl StaticStats {
    /// Creates zeroed counters.
    pub const fn new() -> Self {
        Self {
            alloc_count: AtomicUsize::new(0),
            mem_usage: AtomicUsize::new(0),
            max_usage: AtomicUsize::new(0),
        }
    }

    /// Records one new live allocation.
    #[inline]
    pub fn increment_count(&self) {
        self.alloc_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one released allocation.
    #[inline]
    pub fn decrement_count(&self) {
        self.alloc_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Adds `bytes` to current usage and folds the result into the peak.
    pub fn add_usage(&self, bytes: usize) {
        let new_usage = self.mem_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;

        // compare_exchange loop so a stale peak from another thread is never
        // overwritten with a smaller value
        let mut peak = self.max_usage.load(Ordering::Relaxed);
        while new_usage > peak {
            match self.max_usage.compare_exchange_weak(
                peak,
                new_usage,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => peak = current,
            }
        }
    }

    /// Subtracts `bytes` from current usage.
    #[inline]
    pub fn sub_usage(&self, bytes: usize) {
        self.mem_usage.fetch_sub(bytes, Ordering::Relaxed);
    }

    /// Live allocation count.
    #[inline]
    pub fn alloc_count(&self) -> usize {
        self.alloc_count.load(Ordering::Relaxed)
    }

    /// Bytes currently allocated.
    #[inline]
    pub fn mem_usage(&self) -> usize {
        self.mem_usage.load(Ordering::Relaxed)
    }

    /// Peak of `mem_usage` since construction or the last reset.
    #[inline]
    pub fn max_usage(&self) -> usize {
        self.max_usage.load(Ordering::Relaxed)
    }

    /// Zeroes every counter. Intended for test isolation only: resetting
    /// while allocations are live makes later releases underflow the
    /// figures.
    pub fn reset(&self) {
        self.alloc_count.store(0, Ordering::Relaxed);
        self.mem_usage.store(0, Ordering::Relaxed);
        self.max_usage.store(0, Ordering::Relaxed);
    }

    /// Copies the counters into a plain snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            alloc_count: self.alloc_count(),
            mem_usage: self.mem_usage(),
            max_usage: self.max_usage(),
        }
    }
}

impl Default for StaticStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of [`StaticStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Live allocations at snapshot time
    pub alloc_count: usize,
    /// Bytes allocated at snapshot time
    pub mem_usage: usize,
    /// Peak bytes allocated up to snapshot time
    pub max_usage: usize,
}

impl core::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "allocations: {}, usage: {} bytes, peak: {} bytes",
            self.alloc_count, self.mem_usage, self.max_usage
        )
    }
}
