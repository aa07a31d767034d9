//! Storage engine for sparse, integer-indexed arrays.
//!
//! A [`SparseArray`] keeps its elements in a chain of segments, each
//! covering a contiguous run of indices, so an array with a handful of
//! elements spread over billions of indices stays small. Long chains get a
//! B-tree index on segment start, built lazily once lookups start walking
//! too far.
//!
//! Every array has a single storage [`Representation`]. Arrays start out
//! packing `i32`s, move to packed `f64`s when a non-integral number is
//! stored, and fall back to generic [`Value`] slots for anything else.
//! Promotion is automatic and one-way.
//!
//! Missing indices ("holes") are distinct from explicit
//! [`Value::Undefined`] and read as `None`.
//!
//! ```
//! use sparse_array::{Representation, SparseArray, Value};
//!
//! let mut array = SparseArray::new();
//! array.set(0, 1)?;
//! array.set(1_000_000, 2)?;
//! assert_eq!(array.len(), 1_000_001);
//! assert_eq!(array.get(500), None);
//! assert_eq!(array.segment_count(), 2);
//!
//! array.set(1, 0.5)?;
//! assert_eq!(array.representation(), Representation::Float64);
//!
//! let removed = array.splice(0, 1, vec![Value::from("a"), Value::from("b")])?;
//! assert_eq!(removed.get(0), Some(Value::Number(1.0)));
//! assert_eq!(array.get(1_000_001), Some(Value::Number(2.0)));
//! # Ok::<(), sparse_array::SparseArrayError>(())
//! ```
//!
//! Allocation failures are reported as [`SparseArrayError::Alloc`] and leave
//! the array untouched. Broken internal invariants are never reported as
//! errors: they are logged through `tracing` and abort with a panic.
#![warn(missing_debug_implementations)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_lossless
)]

#[macro_use]
mod error;
#[macro_use]
mod specialize;

pub mod alloc;
mod array;
mod btree;
mod buffer;
pub mod config;
mod de;
pub mod element;
pub mod iter;
mod mutation;
mod segment;
mod ser;
mod store;
pub mod value;

pub use alloc::{AllocError, BudgetAllocator, SegmentAllocator, SystemAllocator};
pub use array::SparseArray;
pub use config::{ArrayConfig, MAX_ARRAY_INDEX, MAX_ARRAY_LENGTH};
pub use element::{Representation, FLOAT64_MISSING_BITS, INT32_MISSING};
pub use error::{InvariantViolation, Result, SparseArrayError};
pub use iter::{ItemsInRange, PresentEntries};
pub use segment::SegmentInfo;
pub use value::{ObjectHandle, Value};

#[cfg(test)]
#[global_allocator]
static ALLOCATOR: mockalloc::Mockalloc<std::alloc::System> =
    mockalloc::Mockalloc(std::alloc::System);
