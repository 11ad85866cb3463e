//! Error types for memory operations

use thiserror::Error;

/// Result type for memory operations
pub type MemoryResult<T> = core::result::Result<T, MemoryError>;

/// Memory operation errors
///
/// Only two kinds are recoverable: allocation failure and calling an
/// operation that needs a backed handle on an unbacked one. Everything else
/// (releasing memory with the wrong padding mode, double-releasing) is a
/// programming error and is diagnosed by panicking, never reported as a
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// The system allocator or the dynamic pool could not satisfy a request
    #[error("out of memory: requested {requested} bytes{}", .available.map(|a| format!(", {a} available")).unwrap_or_default())]
    OutOfMemory {
        /// Bytes the caller asked for
        requested: usize,
        /// Bytes the failing allocator reported as still available, if known
        available: Option<usize>,
    },

    /// The operation requires a valid backing id but none is present
    #[error("invalid parameter: {reason}")]
    InvalidParameter {
        /// What the caller got wrong
        reason: &'static str,
    },
}

impl MemoryError {
    /// Allocation failure with no information about remaining capacity
    pub fn out_of_memory(requested: usize) -> Self {
        Self::OutOfMemory {
            requested,
            available: None,
        }
    }

    /// Allocation failure including the allocator's remaining capacity
    pub fn out_of_memory_with_available(requested: usize, available: usize) -> Self {
        Self::OutOfMemory {
            requested,
            available: Some(available),
        }
    }

    /// Operation called with an argument that cannot be honored
    pub fn invalid_parameter(reason: &'static str) -> Self {
        Self::InvalidParameter { reason }
    }

    /// Whether this is an allocation failure
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, Self::OutOfMemory { .. })
    }
}
