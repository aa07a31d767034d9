//! Module for fallible allocation of segment buffers

use std::alloc::{self as sys, Layout};
use std::error::Error;
use std::fmt::{self, Debug};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::warn;

/// Error type for fallible allocation
/// This error is returned when an allocation fails.
/// It does not contain any additional information.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct AllocError;

impl Error for AllocError {}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("memory allocation failed")
    }
}

/// Source of memory for segment buffers.
///
/// The array never asks for zero-sized layouts. Every pointer handed to
/// [`grow`](Self::grow) or [`deallocate`](Self::deallocate) was produced by
/// the same allocator with the layout passed alongside it.
pub trait SegmentAllocator: Debug + Send + Sync {
    /// Allocates a block of memory fitting `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Releases a block previously returned by this allocator.
    ///
    /// # Safety
    /// `ptr` must have been allocated by `self` with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Grows a block, preserving its contents. On failure the old block is
    /// left untouched.
    ///
    /// # Safety
    /// `ptr` must have been allocated by `self` with `old`, and `new` must
    /// have the same alignment and a size no smaller than `old`.
    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        let new_ptr = self.allocate(new)?;
        ptr::copy_nonoverlapping(ptr.as_ptr(), new_ptr.as_ptr(), old.size());
        self.deallocate(ptr, old);
        Ok(new_ptr)
    }
}

/// Allocator backed by the global allocator.
#[derive(Copy, Clone, Debug, Default)]
pub struct SystemAllocator;

impl SegmentAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        NonNull::new(unsafe { sys::alloc(layout) }).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        sys::dealloc(ptr.as_ptr(), layout);
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        NonNull::new(sys::realloc(ptr.as_ptr(), old, new.size())).ok_or(AllocError)
    }
}

/// Allocator that refuses to hand out more than a fixed number of bytes.
///
/// Useful to cap the memory a single array may hold, and to exercise the
/// allocation failure paths of structural operations.
#[derive(Debug)]
pub struct BudgetAllocator {
    limit: AtomicUsize,
    used: AtomicUsize,
}

impl BudgetAllocator {
    /// Creates an allocator that will serve at most `limit` bytes at once.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            limit: AtomicUsize::new(limit),
            used: AtomicUsize::new(0),
        }
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn used(&self) -> usize {
        self.used.load(Ordering::Relaxed)
    }

    /// Current byte limit.
    #[must_use]
    pub fn limit(&self) -> usize {
        self.limit.load(Ordering::Relaxed)
    }

    /// Changes the byte limit. Blocks already handed out are unaffected.
    pub fn set_limit(&self, limit: usize) {
        self.limit.store(limit, Ordering::Relaxed);
    }

    fn charge(&self, bytes: usize) -> Result<(), AllocError> {
        let limit = self.limit();
        self.used
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |used| {
                used.checked_add(bytes).filter(|total| *total <= limit)
            })
            .map(drop)
            .map_err(|used| {
                warn!(requested = bytes, used, limit, "segment allocation over budget");
                AllocError
            })
    }

    fn refund(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::Relaxed);
    }
}

impl SegmentAllocator for BudgetAllocator {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.charge(layout.size())?;
        SystemAllocator.allocate(layout).map_err(|e| {
            self.refund(layout.size());
            e
        })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        SystemAllocator.deallocate(ptr, layout);
        self.refund(layout.size());
    }

    unsafe fn grow(
        &self,
        ptr: NonNull<u8>,
        old: Layout,
        new: Layout,
    ) -> Result<NonNull<u8>, AllocError> {
        let extra = new.size() - old.size();
        self.charge(extra)?;
        SystemAllocator.grow(ptr, old, new).map_err(|e| {
            self.refund(extra);
            e
        })
    }
}

/// Escalates an allocation failure on a path that cannot report it.
pub(crate) fn abort_on_alloc_failure<T>(result: Result<T, AllocError>) -> T {
    match result {
        Ok(value) => value,
        Err(AllocError) => sys::handle_alloc_error(Layout::new::<usize>()),
    }
}
