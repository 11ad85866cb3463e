//! Static allocation: raw primitive, accounting, and the padded allocator
//!
//! Layered bottom-up: [`RawAllocator`] is the malloc-style seam over the
//! platform, [`StaticStats`] holds the process counters, and
//! [`StaticAllocator`] ties the two together with the hidden size header.

mod raw;
mod static_alloc;
mod stats;

pub use raw::{RawAllocator, SystemAllocator};
pub use static_alloc::{allocate_via, StaticAllocator, TrackingMode, PAD_ALIGN};
pub use stats::{StaticStats, StatsSnapshot};
