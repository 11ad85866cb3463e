//! Dynamic pool interface and the refcounted handle over it
//!
//! The pool itself lives outside this crate: some engine subsystem owns a
//! variable-size memory region and hands out opaque ids. This module defines
//! the trait that subsystem implements, a process-wide registry for the one
//! installed pool, and [`PoolHandle`], the shared-ownership value type the
//! rest of the codebase actually touches.

mod handle;

use std::sync::OnceLock;

use tracing::debug;

pub use handle::PoolHandle;

/// Opaque identifier of a dynamic-pool entry.
///
/// Minted by the pool; this crate never inspects the payload beyond
/// comparing against [`PoolId::INVALID`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId(u64);

impl PoolId {
    /// The distinguished "no backing entry" value.
    pub const INVALID: PoolId = PoolId(u64::MAX);

    /// Wraps a raw id minted by a pool implementation.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        PoolId(raw)
    }

    /// The raw id value.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Whether this id refers to a backing entry.
    #[inline]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

/// Variable-size pool allocator addressed by opaque ids.
///
/// Consumed only: placement, compaction and growth strategy are entirely
/// the implementor's business. All methods must be callable from any thread.
pub trait DynamicPool: Send + Sync {
    /// Allocates `size` bytes, returning [`PoolId::INVALID`] on failure.
    /// `label` is a diagnostic tag for the pool's own bookkeeping.
    fn alloc(&self, size: usize, label: &str) -> PoolId;

    /// Resizes an entry in place where possible. Returns the entry's
    /// (possibly new) id, or [`PoolId::INVALID`] on failure, in which case
    /// the original entry is untouched.
    fn realloc(&self, id: PoolId, size: usize) -> PoolId;

    /// Releases an entry.
    fn free(&self, id: PoolId);

    /// Bytes the pool could still hand out.
    fn available_memory(&self) -> usize;

    /// Bytes currently allocated across all entries.
    fn total_usage(&self) -> usize;
}

static GLOBAL_POOL: OnceLock<&'static dyn DynamicPool> = OnceLock::new();

/// Installs the process-wide pool. May be called at most once, before any
/// handle needs the pool.
pub fn install(pool: &'static dyn DynamicPool) -> Result<(), &'static str> {
    GLOBAL_POOL
        .set(pool)
        .map_err(|_| "dynamic pool already installed")?;
    debug!("dynamic pool installed");
    Ok(())
}

/// The installed pool.
///
/// # Panics
/// Panics if no pool was installed; constructing pool handles before the
/// owning subsystem is up is a startup-ordering bug, not a recoverable
/// condition.
pub fn global() -> &'static dyn DynamicPool {
    *GLOBAL_POOL
        .get()
        .expect("no dynamic pool installed; call cairn_memory::pool::install at startup")
}

/// The installed pool, if any.
pub fn try_global() -> Option<&'static dyn DynamicPool> {
    GLOBAL_POOL.get().copied()
}

/// Bytes the installed pool could still hand out.
pub fn available_memory() -> usize {
    global().available_memory()
}

/// Bytes currently allocated across all entries of the installed pool.
pub fn total_usage() -> usize {
    global().total_usage()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_id_is_not_valid() {
        assert!(!PoolId::INVALID.is_valid());
        assert!(PoolId::from_raw(0).is_valid());
        assert!(PoolId::from_raw(42).is_valid());
        assert_eq!(PoolId::from_raw(7).to_raw(), 7);
    }

    #[test]
    fn ids_compare_by_value() {
        assert_eq!(PoolId::from_raw(3), PoolId::from_raw(3));
        assert_ne!(PoolId::from_raw(3), PoolId::from_raw(4));
        assert_eq!(PoolId::INVALID, PoolId::from_raw(u64::MAX));
    }
}
