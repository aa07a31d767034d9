//! Fallible, allocator-backed slot storage for one segment

use std::alloc::Layout;
use std::fmt::{self, Debug, Formatter};
use std::ptr::{self, NonNull};
use std::slice;
use std::sync::Arc;

use crate::alloc::{AllocError, SegmentAllocator};
use crate::element::Element;

/// Owned buffer of `capacity` slots. Every slot is always initialized;
/// unused slots hold the missing sentinel.
pub(crate) struct SegmentBuffer<T: Element> {
    ptr: NonNull<T>,
    capacity: u32,
    allocator: Arc<dyn SegmentAllocator>,
}

// Safety: the buffer uniquely owns its slots.
unsafe impl<T: Element> Send for SegmentBuffer<T> {}
unsafe impl<T: Element> Sync for SegmentBuffer<T> {}

impl<T: Element> SegmentBuffer<T> {
    fn layout(capacity: u32) -> Result<Layout, AllocError> {
        Layout::array::<T>(capacity as usize).map_err(|_| AllocError)
    }

    /// A zero-capacity buffer. Does not allocate.
    pub(crate) fn empty(allocator: Arc<dyn SegmentAllocator>) -> Self {
        Self {
            ptr: NonNull::dangling(),
            capacity: 0,
            allocator,
        }
    }

    pub(crate) fn try_new(
        capacity: u32,
        allocator: Arc<dyn SegmentAllocator>,
    ) -> Result<Self, AllocError> {
        if capacity == 0 {
            return Ok(Self::empty(allocator));
        }
        let ptr = allocator.allocate(Self::layout(capacity)?)?.cast::<T>();
        unsafe {
            for i in 0..capacity as usize {
                ptr.as_ptr().add(i).write(T::missing());
            }
        }
        Ok(Self {
            ptr,
            capacity,
            allocator,
        })
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.capacity
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn SegmentAllocator> {
        &self.allocator
    }

    /// Grows to exactly `capacity` slots. New slots hold the sentinel. On
    /// failure the buffer is unchanged.
    pub(crate) fn try_grow(&mut self, capacity: u32) -> Result<(), AllocError> {
        if capacity <= self.capacity {
            return Ok(());
        }
        if self.capacity == 0 {
            *self = Self::try_new(capacity, self.allocator.clone())?;
            return Ok(());
        }
        let old_layout = Self::layout(self.capacity)?;
        let new_layout = Self::layout(capacity)?;
        unsafe {
            self.ptr = self
                .allocator
                .grow(self.ptr.cast(), old_layout, new_layout)?
                .cast::<T>();
            for i in self.capacity as usize..capacity as usize {
                self.ptr.as_ptr().add(i).write(T::missing());
            }
        }
        self.capacity = capacity;
        Ok(())
    }

    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        let mut res = Self::try_new(self.capacity, self.allocator.clone())?;
        res.as_mut_slice().clone_from_slice(self.as_slice());
        Ok(res)
    }

    pub(crate) fn as_slice(&self) -> &[T] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.capacity as usize) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [T] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.capacity as usize) }
    }

    pub(crate) fn mem_allocated(&self) -> usize {
        if self.capacity == 0 {
            0
        } else {
            Self::layout(self.capacity).map_or(0, |layout| layout.size())
        }
    }
}

impl<T: Element> Drop for SegmentBuffer<T> {
    fn drop(&mut self) {
        if self.capacity == 0 {
            return;
        }
        unsafe {
            ptr::drop_in_place(self.as_mut_slice());
            if let Ok(layout) = Self::layout(self.capacity) {
                self.allocator.deallocate(self.ptr.cast(), layout);
            }
        }
    }
}

impl<T: Element> Debug for SegmentBuffer<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self.as_slice(), f)
    }
}
