//! Static allocator with hidden size bookkeeping
//!
//! Wraps a [`RawAllocator`] and optionally prefixes every allocation with a
//! hidden header recording the requested size. The header is what makes the
//! O(1) "how big was this allocation" lookup possible at release and
//! reallocation time, which in turn feeds the process-wide usage counters.
//!
//! Two strategies, selected at construction:
//! - [`TrackingMode::Tracked`]: every allocation is padded and the usage /
//!   peak counters are maintained
//! - [`TrackingMode::Untracked`]: a header is written only when the caller
//!   explicitly asks for padding; usage queries report zero
//!
//! The live-allocation count is exact in both modes.
//!
//! # Safety
//!
//! A pointer must be released (or reallocated) with the same padding flag it
//! was allocated with, on the same allocator instance. This pairing is a
//! caller precondition, stated on every unsafe method, and is not checked at
//! runtime.

use core::mem::{align_of, size_of};
use core::ptr::NonNull;
use std::sync::OnceLock;

use tracing::{debug, warn};

use super::raw::{RawAllocator, SystemAllocator};
use super::stats::{StaticStats, StatsSnapshot};
use crate::error::{MemoryError, MemoryResult};

/// Bytes reserved in front of a padded allocation.
///
/// Large enough for the `u64` size field while preserving 16-byte alignment
/// of the pointer handed back to the caller.
pub const PAD_ALIGN: usize = 16;

/// Accounting strategy of a [`StaticAllocator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Maintain usage and peak counters; every allocation carries a header.
    Tracked,
    /// Skip usage accounting; headers only on explicit request.
    Untracked,
}

impl TrackingMode {
    /// Whether usage accounting is active.
    #[inline]
    pub const fn is_tracked(self) -> bool {
        matches!(self, TrackingMode::Tracked)
    }

    /// Mode used by the process-wide allocator when none was configured:
    /// tracked in debug builds, untracked in release builds.
    pub fn default_for_build() -> Self {
        if cfg!(debug_assertions) {
            TrackingMode::Tracked
        } else {
            TrackingMode::Untracked
        }
    }
}

static GLOBAL: OnceLock<StaticAllocator> = OnceLock::new();

/// Fixed-lifetime allocator for in-process allocations.
///
/// Cheap value allocations (bookkeeping blocks, small records) go through
/// this type; pool-backed payloads do not: they belong to the dynamic pool
/// and are only ever reached through [`crate::pool::PoolHandle`].
#[derive(Debug)]
pub struct StaticAllocator<R: RawAllocator = SystemAllocator> {
    raw: R,
    mode: TrackingMode,
    stats: StaticStats,
}

impl StaticAllocator<SystemAllocator> {
    /// Creates a system-backed allocator with the given accounting mode.
    pub const fn new(mode: TrackingMode) -> Self {
        Self::with_raw(SystemAllocator::new(), mode)
    }

    /// Configures the process-wide allocator.
    ///
    /// May be called at most once, before the first use of [`global`].
    ///
    /// [`global`]: StaticAllocator::global
    pub fn init_global(mode: TrackingMode) -> Result<(), &'static str> {
        GLOBAL
            .set(StaticAllocator::new(mode))
            .map_err(|_| "global static allocator already initialized")?;
        debug!(?mode, "static allocator initialized");
        Ok(())
    }

    /// The process-wide allocator.
    ///
    /// Initializes itself with [`TrackingMode::default_for_build`] if
    /// [`init_global`] was never called.
    ///
    /// [`init_global`]: StaticAllocator::init_global
    pub fn global() -> &'static StaticAllocator {
        GLOBAL.get_or_init(|| {
            let mode = TrackingMode::default_for_build();
            debug!(?mode, "static allocator initialized with build default");
            StaticAllocator::new(mode)
        })
    }

    /// The process-wide allocator, if it has been initialized.
    pub fn try_global() -> Option<&'static StaticAllocator> {
        GLOBAL.get()
    }
}

impl Default for StaticAllocator<SystemAllocator> {
    fn default() -> Self {
        Self::new(TrackingMode::default_for_build())
    }
}

impl<R: RawAllocator> StaticAllocator<R> {
    /// Creates an allocator over a custom raw primitive.
    pub const fn with_raw(raw: R, mode: TrackingMode) -> Self {
        Self {
            raw,
            mode,
            stats: StaticStats::new(),
        }
    }

    /// The configured accounting mode.
    #[inline]
    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    #[inline]
    fn prepad(&self, pad_align: bool) -> bool {
        // tracking needs the size back at release time, so it forces the
        // header on regardless of what the caller asked for
        self.mode.is_tracked() || pad_align
    }

    /// Allocates `bytes` of uninitialized memory.
    ///
    /// With `pad_align` (or in tracked mode) the allocation carries a hidden
    /// size header; the returned pointer is past the header either way and
    /// is valid for exactly `bytes` bytes.
    pub fn allocate(&self, bytes: usize, pad_align: bool) -> MemoryResult<NonNull<u8>> {
        if self.prepad(pad_align) {
            let total = bytes
                .checked_add(PAD_ALIGN)
                .ok_or_else(|| MemoryError::out_of_memory(bytes))?;
            let Some(base) = self.raw.allocate(total) else {
                warn!(requested = bytes, "static allocation failed");
                return Err(MemoryError::out_of_memory(bytes));
            };

            // SAFETY: base is valid for `total >= PAD_ALIGN` bytes and
            // 16-byte aligned per the RawAllocator contract, so the u64
            // store is in bounds and aligned.
            unsafe { base.cast::<u64>().write(bytes as u64) };

            self.stats.increment_count();
            if self.mode.is_tracked() {
                self.stats.add_usage(bytes);
            }

            // SAFETY: PAD_ALIGN <= total, still inside the allocation.
            Ok(unsafe { base.add(PAD_ALIGN) })
        } else {
            let Some(ptr) = self.raw.allocate(bytes) else {
                warn!(requested = bytes, "static allocation failed");
                return Err(MemoryError::out_of_memory(bytes));
            };
            self.stats.increment_count();
            Ok(ptr)
        }
    }

    /// Resizes an allocation, preserving its leading contents.
    ///
    /// `None` as input behaves like [`allocate`]. `bytes == 0` releases the
    /// allocation and returns `Ok(None)`; a resize to zero is a release,
    /// not an error. On failure for a non-zero size the original pointer
    /// stays valid and an `OutOfMemory` error is returned.
    ///
    /// # Safety
    ///
    /// `ptr`, when `Some`, must have been allocated by this allocator with
    /// the same `pad_align` flag and must not have been released.
    ///
    /// [`allocate`]: StaticAllocator::allocate
    pub unsafe fn reallocate(
        &self,
        ptr: Option<NonNull<u8>>,
        bytes: usize,
        pad_align: bool,
    ) -> MemoryResult<Option<NonNull<u8>>> {
        let Some(ptr) = ptr else {
            return self.allocate(bytes, pad_align).map(Some);
        };

        if self.prepad(pad_align) {
            // SAFETY: padded pointers sit PAD_ALIGN bytes past their base;
            // the caller guarantees matching pad mode.
            let base = unsafe { ptr.sub(PAD_ALIGN) };
            // SAFETY: the header was written by allocate/reallocate.
            let old = unsafe { base.cast::<u64>().read() } as usize;

            if bytes == 0 {
                if self.mode.is_tracked() {
                    self.stats.sub_usage(old);
                }
                self.stats.decrement_count();
                // SAFETY: base is the pointer the raw allocator handed out.
                unsafe { self.raw.release(base) };
                return Ok(None);
            }

            let total = bytes
                .checked_add(PAD_ALIGN)
                .ok_or_else(|| MemoryError::out_of_memory(bytes))?;
            // SAFETY: base is live and owned by self.raw.
            let Some(new_base) = (unsafe { self.raw.reallocate(base, total) }) else {
                warn!(requested = bytes, "static reallocation failed");
                return Err(MemoryError::out_of_memory(bytes));
            };

            // SAFETY: new_base is valid for total bytes; rewrite the header
            // for the new size.
            unsafe { new_base.cast::<u64>().write(bytes as u64) };

            if self.mode.is_tracked() {
                self.stats.sub_usage(old);
                self.stats.add_usage(bytes);
            }

            // SAFETY: PAD_ALIGN <= total.
            Ok(Some(unsafe { new_base.add(PAD_ALIGN) }))
        } else {
            if bytes == 0 {
                self.stats.decrement_count();
                // SAFETY: unpadded pointer is the raw allocation itself.
                unsafe { self.raw.release(ptr) };
                return Ok(None);
            }

            // SAFETY: unpadded pointer is the raw allocation itself.
            match unsafe { self.raw.reallocate(ptr, bytes) } {
                Some(new_ptr) => Ok(Some(new_ptr)),
                None => {
                    warn!(requested = bytes, "static reallocation failed");
                    Err(MemoryError::out_of_memory(bytes))
                }
            }
        }
    }

    /// Releases an allocation.
    ///
    /// A null pointer is unrepresentable here; passing one is a compile-time
    /// impossibility rather than the runtime contract violation it was in
    /// pointer-based APIs.
    ///
    /// # Safety
    ///
    /// `ptr` must have been allocated by this allocator with the same
    /// `pad_align` flag and must not have been released already.
    pub unsafe fn release(&self, ptr: NonNull<u8>, pad_align: bool) {
        self.stats.decrement_count();

        if self.prepad(pad_align) {
            // SAFETY: matching pad mode per the caller contract.
            let base = unsafe { ptr.sub(PAD_ALIGN) };
            if self.mode.is_tracked() {
                // SAFETY: header written at allocation time.
                let old = unsafe { base.cast::<u64>().read() } as usize;
                self.stats.sub_usage(old);
            }
            // SAFETY: base is the raw allocation.
            unsafe { self.raw.release(base) };
        } else {
            // SAFETY: unpadded pointer is the raw allocation itself.
            unsafe { self.raw.release(ptr) };
        }
    }

    /// Allocates `bytes` carrying a diagnostic label.
    ///
    /// The label only feeds tracing; the allocation itself is a plain
    /// unpadded [`allocate`]. Extension point for higher layers that want
    /// labeled allocations without defining their own wrappers.
    ///
    /// [`allocate`]: StaticAllocator::allocate
    pub fn allocate_tagged(&self, bytes: usize, tag: &'static str) -> MemoryResult<NonNull<u8>> {
        tracing::trace!(tag, bytes, "tagged allocation");
        self.allocate(bytes, false)
    }

    /// Allocates and initializes a single `T`.
    ///
    /// The value lives outside Rust's ownership tracking; reclaim it with
    /// [`release_typed`]. `T`'s alignment must not exceed [`PAD_ALIGN`].
    ///
    /// [`release_typed`]: StaticAllocator::release_typed
    pub fn alloc_init<T>(&self, value: T) -> MemoryResult<NonNull<T>> {
        debug_assert!(align_of::<T>() <= PAD_ALIGN);

        let ptr = self.allocate(size_of::<T>(), false)?;
        let typed = ptr.cast::<T>();
        // SAFETY: freshly allocated, sized and aligned for T.
        unsafe { typed.write(value) };
        Ok(typed)
    }

    /// Drops and releases a value created by [`alloc_init`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `alloc_init` on this allocator and must not be
    /// used afterwards.
    ///
    /// [`alloc_init`]: StaticAllocator::alloc_init
    pub unsafe fn release_typed<T>(&self, ptr: NonNull<T>) {
        // SAFETY: ptr holds a live T per the caller contract.
        unsafe { core::ptr::drop_in_place(ptr.as_ptr()) };
        // SAFETY: allocated by alloc_init with pad_align = false.
        unsafe { self.release(ptr.cast::<u8>(), false) };
    }

    /// Bytes currently allocated. Zero when accounting is disabled.
    pub fn mem_usage(&self) -> usize {
        if self.mode.is_tracked() {
            self.stats.mem_usage()
        } else {
            0
        }
    }

    /// Peak of [`mem_usage`]. Zero when accounting is disabled.
    ///
    /// [`mem_usage`]: StaticAllocator::mem_usage
    pub fn mem_max_usage(&self) -> usize {
        if self.mode.is_tracked() {
            self.stats.max_usage()
        } else {
            0
        }
    }

    /// Remaining capacity of the underlying allocator, when it has a fixed
    /// limit. The system allocator does not, so this reports `None`.
    pub fn mem_available(&self) -> Option<usize> {
        None
    }

    /// Live allocation count. Exact in every accounting mode.
    pub fn alloc_count(&self) -> usize {
        self.stats.alloc_count()
    }

    /// Point-in-time copy of the raw counters (usage figures included even
    /// in untracked mode, where they stay zero).
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Zeroes the counters. Test isolation only; see
    /// [`StaticStats::reset`](super::stats::StaticStats::reset).
    pub fn reset_stats(&self) {
        self.stats.reset();
    }
}

/// Allocates `bytes` through a caller-supplied allocation function.
///
/// The other half of the placement extension point: higher layers hand in
/// their own primitive and get the crate's error reporting. Releasing the
/// returned memory is the caller's business; this crate never sees that
/// pointer again.
pub fn allocate_via<F>(alloc_fn: F, bytes: usize) -> MemoryResult<NonNull<u8>>
where
    F: FnOnce(usize) -> Option<NonNull<u8>>,
{
    alloc_fn(bytes).ok_or_else(|| MemoryError::out_of_memory(bytes))
}
