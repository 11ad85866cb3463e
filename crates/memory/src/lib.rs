//! Low-level memory services for the Cairn engine core
//!
//! Three primitives every other subsystem builds on:
//!
//! - [`StaticAllocator`]: fixed in-process allocations over the system
//!   allocator, with an optional hidden size header feeding process-wide
//!   usage accounting
//! - [`PoolHandle`]: reference-counted shared ownership of entries in the
//!   external dynamic pool, addressed by opaque [`PoolId`]s
//! - [`tree::sentinel`]: the self-linked nil node tree structures use as a
//!   universal leaf
//!
//! Higher layers call the static allocator directly for fixed allocations
//! and construct a [`PoolHandle`] when they need shared, resizable,
//! pool-backed storage. A handle never touches the system allocator for its
//! payload, only for its own control block.
//!
//! # Concurrency
//!
//! No locks anywhere. Handle refcounts are fully atomic; the accounting
//! counters are individually atomic but callers wanting exact usage figures
//! across threads must serialize static-allocator calls themselves. Nothing
//! here suspends or blocks.
//!
//! # Example
//!
//! ```
//! use cairn_memory::{StaticAllocator, TrackingMode};
//!
//! let alloc = StaticAllocator::new(TrackingMode::Tracked);
//! let ptr = alloc.allocate(100, false)?;
//! assert_eq!(alloc.mem_usage(), 100);
//! // SAFETY: same allocator, same pad flag, released once
//! unsafe { alloc.release(ptr, false) };
//! assert_eq!(alloc.mem_usage(), 0);
//! # Ok::<(), cairn_memory::MemoryError>(())
//! ```

// Raw allocation primitives live here; the rest of the workspace warns.
#![allow(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod error;
pub mod pool;
pub mod tree;

pub use allocator::{StaticAllocator, SystemAllocator, TrackingMode, PAD_ALIGN};
pub use error::{MemoryError, MemoryResult};
pub use pool::{DynamicPool, PoolHandle, PoolId};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configures the process-wide static allocator.
///
/// Call once at startup, before anything allocates. Skipping the call is
/// fine: the first use falls back to
/// [`TrackingMode::default_for_build`].
pub fn init(mode: TrackingMode) -> Result<(), &'static str> {
    StaticAllocator::init_global(mode)
}
