//! Error types for sparse arrays

use thiserror::Error;

pub use crate::alloc::AllocError;

/// Error type for operations on a [`SparseArray`](crate::SparseArray)
#[derive(Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SparseArrayError {
    /// Memory allocation failed before the array was modified
    #[error("memory allocation failed")]
    Alloc(#[from] AllocError),
    /// The index is outside `0..=u32::MAX - 1`
    #[error("{0} is not a valid array index")]
    InvalidIndex(u64),
    /// The operation would grow the array past the maximum length
    #[error("array length would exceed {}", u32::MAX)]
    LengthOverflow,
}

/// Result type used throughout the crate
pub type Result<T, E = SparseArrayError> = std::result::Result<T, E>;

/// Structural defect found by [`SparseArray::validate`](crate::SparseArray::validate).
#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("head segment starts at {0} instead of 0")]
    HeadNotAtZero(u32),
    #[error("segment at {left} is not before its successor at {next}")]
    Unordered { left: u32, next: u32 },
    #[error("segment at {left} with size {size} overlaps its successor at {next}")]
    Overlap { left: u32, size: u32, next: u32 },
    #[error("segment at {left} has length {length} beyond its size {size}")]
    LengthExceedsSize { left: u32, length: u32, size: u32 },
    #[error("segment at {left} has a live slot at offset {offset} past its length")]
    LiveTail { left: u32, offset: u32 },
    #[error("segment at {left} ends at {end}, past the array length {length}")]
    LengthBeyondArray { left: u32, end: u64, length: u32 },
    #[error("segment at {left} extends past the index space")]
    SizeBeyondIndexSpace { left: u32 },
    #[error("chain links to a released segment after index {0}")]
    DanglingLink(u32),
    #[error("segment at {0} is linked into the chain twice")]
    DuplicateSegment(u32),
    #[error("{0} segments are owned by the array but unreachable from the head")]
    OrphanSegment(usize),
    #[error("last used segment is not reachable from the head")]
    StaleCache,
    #[error("segment index disagrees with the chain at position {0}")]
    IndexMismatch(usize),
    #[error("head hole count is {recorded}, expected {actual}")]
    MissingFlag { recorded: u32, actual: u32 },
}

/// Logs and aborts on a broken internal invariant. Continuing with a
/// corrupted chain is never an option, so this does not return.
macro_rules! fatal_invariant {
    ($($arg:tt)+) => {{
        let message = format!($($arg)+);
        tracing::error!(%message, "sparse array invariant violated");
        panic!("sparse array invariant violated: {}", message)
    }};
}
