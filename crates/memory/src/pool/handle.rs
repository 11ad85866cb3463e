//! Reference-counted handle over a dynamic-pool entry
//!
//! A [`PoolHandle`] is a lightweight value granting shared ownership of one
//! pool entry. Cloning shares a small heap control block; the last owner to
//! let go frees the pool entry and the block. The control block is
//! deliberately not an `Arc`: it is allocated through the crate's own static
//! allocator so that handle bookkeeping shows up in the allocator's
//! accounting like every other in-process allocation.
//!
//! # Safety
//!
//! All unsafe code in this module operates on the control block pointer. The
//! invariants are the classic refcount ones: the block stays live while any
//! handle points at it, the counter is only decremented by owners, and the
//! owner that observes the count hit zero is the only one that frees.

use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{self, AtomicU64, AtomicUsize, Ordering};

use tracing::error;

use super::{DynamicPool, PoolId};
use crate::allocator::StaticAllocator;
use crate::error::{MemoryError, MemoryResult};

/// Shared state of every clone of one handle.
struct ControlBlock {
    refcount: AtomicUsize,
    /// Raw [`PoolId`]; atomic so a resize through one clone is visible to
    /// all of them.
    id: AtomicU64,
    /// The pool owning the backing entry. Captured once at creation.
    pool: &'static dyn DynamicPool,
}

impl ControlBlock {
    /// Allocates a block with refcount 1.
    ///
    /// There is no layer to fall back to below the static allocator, so an
    /// allocation failure here is fatal.
    fn create(pool: &'static dyn DynamicPool, id: PoolId) -> NonNull<ControlBlock> {
        let block = ControlBlock {
            refcount: AtomicUsize::new(1),
            id: AtomicU64::new(id.to_raw()),
            pool,
        };
        match StaticAllocator::global().alloc_init(block) {
            Ok(ptr) => ptr,
            Err(err) => {
                error!(%err, "pool handle control block allocation failed");
                panic!("out of memory allocating a pool handle control block");
            }
        }
    }
}

/// Reference-counted shared access to a variable-length pool entry.
///
/// Copies made through [`Clone`] all observe the same backing id: a
/// [`resize`] performed through any copy is visible to every copy. That
/// shared mutability is the point; callers needing exclusive mutation must
/// coordinate among themselves.
///
/// Dropping a handle is equivalent to [`unref`]; the backing entry is freed
/// exactly once, by whichever owner happens to be last.
///
/// [`resize`]: PoolHandle::resize
/// [`unref`]: PoolHandle::unref
pub struct PoolHandle {
    data: Option<NonNull<ControlBlock>>,
}

// SAFETY: the control block is only touched through atomics, and the pool
// reference is Sync by the DynamicPool bound.
unsafe impl Send for PoolHandle {}
// SAFETY: every access through a shared handle goes via the block's atomics.
unsafe impl Sync for PoolHandle {}

impl PoolHandle {
    /// Wraps an id minted by the installed global pool. The id may be
    /// [`PoolId::INVALID`], producing a bookkept-but-unbacked handle.
    pub fn new(id: PoolId) -> Self {
        Self::new_in(super::global(), id)
    }

    /// Wraps an id belonging to a specific pool.
    pub fn new_in(pool: &'static dyn DynamicPool, id: PoolId) -> Self {
        Self {
            data: Some(ControlBlock::create(pool, id)),
        }
    }

    /// A handle with no control block at all.
    ///
    /// Cheaper than [`new`] with an invalid id: nothing is allocated until
    /// the first non-empty [`resize`].
    ///
    /// [`new`]: PoolHandle::new
    /// [`resize`]: PoolHandle::resize
    pub const fn empty() -> Self {
        Self { data: None }
    }

    /// Allocates `size` bytes from the installed global pool and wraps the
    /// result. A pool failure yields an unbacked handle; check
    /// [`is_valid`] before use.
    ///
    /// [`is_valid`]: PoolHandle::is_valid
    pub fn allocate(size: usize, label: &str) -> Self {
        Self::allocate_in(super::global(), size, label)
    }

    /// Allocates from a specific pool. See [`allocate`].
    ///
    /// [`allocate`]: PoolHandle::allocate
    pub fn allocate_in(pool: &'static dyn DynamicPool, size: usize, label: &str) -> Self {
        let id = pool.alloc(size, label);
        Self::new_in(pool, id)
    }

    #[inline]
    fn block(&self) -> Option<&ControlBlock> {
        // SAFETY: self holds a reference, so the block outlives this borrow.
        self.data.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// The current backing id; [`PoolId::INVALID`] for unbacked handles.
    pub fn id(&self) -> PoolId {
        self.block()
            .map_or(PoolId::INVALID, |cb| PoolId::from_raw(cb.id.load(Ordering::Relaxed)))
    }

    /// Whether the handle currently has a backing pool entry.
    pub fn is_valid(&self) -> bool {
        self.id().is_valid()
    }

    /// Number of live clones sharing this handle's control block, or zero
    /// for an empty handle. Diagnostic aid; racy by nature.
    pub fn ref_count(&self) -> usize {
        self.block()
            .map_or(0, |cb| cb.refcount.load(Ordering::Relaxed))
    }

    /// Resizes the backing entry.
    ///
    /// - `new_size == 0` on an unbacked handle: silent no-op.
    /// - `new_size == 0` on a backed handle: the pool entry is freed and the
    ///   id becomes invalid. The control block is kept; the handle stays
    ///   reusable, and the block is reclaimed by the last [`unref`]/drop as
    ///   usual.
    /// - `new_size > 0`: the entry is grown/shrunk in the pool, allocating
    ///   a fresh entry (and, lazily, the control block itself) if the handle
    ///   had none.
    ///
    /// Reports `OutOfMemory` if the pool cannot produce a valid id; the
    /// previous backing entry, if any, is untouched in that case.
    ///
    /// [`unref`]: PoolHandle::unref
    pub fn resize(&mut self, new_size: usize) -> MemoryResult<()> {
        if new_size == 0 && !self.is_valid() {
            return Ok(());
        }

        if self.data.is_none() {
            // new_size > 0 here: bookkeeping is needed from now on
            self.data = Some(ControlBlock::create(super::global(), PoolId::INVALID));
        }
        let cb = self.block().expect("control block just ensured");

        if new_size == 0 {
            let old = PoolId::from_raw(cb.id.swap(PoolId::INVALID.to_raw(), Ordering::Relaxed));
            if old.is_valid() {
                cb.pool.free(old);
            }
            return Ok(());
        }

        let current = PoolId::from_raw(cb.id.load(Ordering::Relaxed));
        let new_id = if current.is_valid() {
            cb.pool.realloc(current, new_size)
        } else {
            cb.pool.alloc(new_size, "unnamed handle")
        };

        if !new_id.is_valid() {
            return Err(MemoryError::out_of_memory_with_available(
                new_size,
                cb.pool.available_memory(),
            ));
        }
        cb.id.store(new_id.to_raw(), Ordering::Relaxed);
        Ok(())
    }

    /// Resizes an already-backed entry, erroring on unbacked handles
    /// instead of lazily allocating the way [`resize`] does.
    ///
    /// [`resize`]: PoolHandle::resize
    pub fn realloc(&self, new_size: usize) -> MemoryResult<()> {
        let Some(cb) = self.block() else {
            return Err(MemoryError::invalid_parameter(
                "reallocating an unbacked handle",
            ));
        };

        let current = PoolId::from_raw(cb.id.load(Ordering::Relaxed));
        if !current.is_valid() {
            return Err(MemoryError::invalid_parameter(
                "reallocating an unbacked handle",
            ));
        }

        let new_id = cb.pool.realloc(current, new_size);
        if !new_id.is_valid() {
            return Err(MemoryError::out_of_memory_with_available(
                new_size,
                cb.pool.available_memory(),
            ));
        }
        cb.id.store(new_id.to_raw(), Ordering::Relaxed);
        Ok(())
    }

    /// Gives up this handle's reference.
    ///
    /// Safe no-op on an empty handle, and the handle is empty afterwards
    /// either way. When the last reference goes, the backing pool entry (if
    /// valid) is freed and the control block is returned to the static
    /// allocator.
    pub fn unref(&mut self) {
        let Some(ptr) = self.data.take() else {
            return;
        };

        // SAFETY: we held a reference until this point.
        let cb = unsafe { ptr.as_ref() };

        // Release so our earlier writes are visible to whichever owner
        // frees; the winner re-synchronizes with Acquire below. Same
        // protocol as std::sync::Arc.
        if cb.refcount.fetch_sub(1, Ordering::Release) == 1 {
            atomic::fence(Ordering::Acquire);

            let id = PoolId::from_raw(cb.id.load(Ordering::Relaxed));
            if id.is_valid() {
                cb.pool.free(id);
            }
            // SAFETY: refcount hit zero, so this is the only remaining
            // pointer to a block created by alloc_init on the global
            // allocator.
            unsafe { StaticAllocator::global().release_typed(ptr) };
        }
    }
}

impl Clone for PoolHandle {
    fn clone(&self) -> Self {
        if let Some(ptr) = self.data {
            // SAFETY: self keeps the block live for the duration.
            // Relaxed is enough for an increment from an existing owner;
            // see std::sync::Arc::clone.
            unsafe { ptr.as_ref() }.refcount.fetch_add(1, Ordering::Relaxed);
        }
        Self { data: self.data }
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.unref();
    }
}

impl Default for PoolHandle {
    fn default() -> Self {
        Self::empty()
    }
}

// Not derived: the control block pointer is noise, the id is what matters.
impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("id", &self.id())
            .field("refs", &self.ref_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_handle_is_inert() {
        let mut handle = PoolHandle::empty();
        assert!(!handle.is_valid());
        assert_eq!(handle.id(), PoolId::INVALID);
        assert_eq!(handle.ref_count(), 0);

        // unref on empty is a safe no-op, any number of times
        handle.unref();
        handle.unref();
        assert!(!handle.is_valid());
    }

    #[test]
    fn resize_zero_on_empty_allocates_nothing() {
        let before = StaticAllocator::global().alloc_count();
        let mut handle = PoolHandle::empty();
        handle.resize(0).unwrap();
        handle.resize(0).unwrap();
        assert_eq!(StaticAllocator::global().alloc_count(), before);
    }

    #[test]
    fn realloc_on_empty_is_invalid_parameter() {
        let handle = PoolHandle::empty();
        let err = handle.realloc(64).unwrap_err();
        assert_eq!(
            err,
            MemoryError::invalid_parameter("reallocating an unbacked handle")
        );
    }

    #[test]
    fn debug_format_shows_id() {
        let handle = PoolHandle::empty();
        let rendered = format!("{handle:?}");
        assert!(rendered.contains("PoolHandle"));
        assert!(rendered.contains("id"));
    }
}
