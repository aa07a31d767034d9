//! A contiguous run of slots and the handle used to reach it

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::alloc::{AllocError, SegmentAllocator};
use crate::buffer::SegmentBuffer;
use crate::element::Element;

/// Generation-checked handle to a segment owned by a store's arena.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct SegmentId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Shape of one segment, as reported by
/// [`SparseArray::segments`](crate::SparseArray::segments).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentInfo {
    /// First index covered
    pub left: u32,
    /// Populated prefix, holes included
    pub length: u32,
    /// Slots reserved for this segment
    pub size: u32,
}

/// Slots `[0, length)` may hold values or holes; `[length, capacity)` only
/// hold the sentinel. `size` is the logical reservation and never exceeds
/// the buffer capacity, so shrinking it is free.
#[derive(Debug)]
pub(crate) struct Segment<T: Element> {
    pub(crate) left: u32,
    pub(crate) length: u32,
    pub(crate) size: u32,
    pub(crate) next: Option<SegmentId>,
    buffer: SegmentBuffer<T>,
}

impl<T: Element> Segment<T> {
    /// Zero-size placeholder. Does not allocate.
    pub(crate) fn empty(left: u32, allocator: Arc<dyn SegmentAllocator>) -> Self {
        Self {
            left,
            length: 0,
            size: 0,
            next: None,
            buffer: SegmentBuffer::empty(allocator),
        }
    }

    pub(crate) fn try_new(
        left: u32,
        size: u32,
        allocator: Arc<dyn SegmentAllocator>,
    ) -> Result<Self, AllocError> {
        Ok(Self {
            left,
            length: 0,
            size,
            next: None,
            buffer: SegmentBuffer::try_new(size, allocator)?,
        })
    }

    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(Self {
            left: self.left,
            length: self.length,
            size: self.size,
            next: self.next,
            buffer: self.buffer.try_clone()?,
        })
    }

    /// Copies the layout of another segment, converting every slot.
    pub(crate) fn try_widen<S: Element>(source: &Segment<S>) -> Result<Self, AllocError> {
        let mut buffer =
            SegmentBuffer::try_new(source.buffer.capacity(), source.buffer.allocator().clone())?;
        for (slot, old) in buffer.as_mut_slice().iter_mut().zip(source.buffer.as_slice()) {
            *slot = T::widen(old);
        }
        Ok(Self {
            left: source.left,
            length: source.length,
            size: source.size,
            next: source.next,
            buffer,
        })
    }

    pub(crate) fn info(&self) -> SegmentInfo {
        SegmentInfo {
            left: self.left,
            length: self.length,
            size: self.size,
        }
    }

    pub(crate) fn capacity(&self) -> u32 {
        self.buffer.capacity()
    }

    /// One past the last populated index.
    pub(crate) fn end(&self) -> u64 {
        u64::from(self.left) + u64::from(self.length)
    }

    /// One past the last reserved index.
    pub(crate) fn limit(&self) -> u64 {
        u64::from(self.left) + u64::from(self.size)
    }

    pub(crate) fn reserves(&self, index: u32) -> bool {
        index >= self.left && u64::from(index) < self.limit()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [T] {
        let size = self.size as usize;
        &mut self.buffer.as_mut_slice()[..size]
    }

    /// Slots `[0, length)`.
    pub(crate) fn live(&self) -> &[T] {
        &self.buffer.as_slice()[..self.length as usize]
    }

    pub(crate) fn live_mut(&mut self) -> &mut [T] {
        let length = self.length as usize;
        &mut self.buffer.as_mut_slice()[..length]
    }

    pub(crate) fn get(&self, index: u32) -> Option<&T> {
        let offset = index.checked_sub(self.left)?;
        self.live().get(offset as usize).filter(|v| !v.is_missing())
    }

    /// Makes sure the buffer can hold `size` slots without changing the
    /// logical size.
    pub(crate) fn try_reserve(&mut self, size: u32) -> Result<(), AllocError> {
        self.buffer.try_grow(size)
    }

    /// Raises the logical size. Capacity must already be reserved.
    pub(crate) fn expand(&mut self, size: u32) {
        if size > self.capacity() {
            fatal_invariant!(
                "segment at {} expanded to {} past capacity {}",
                self.left,
                size,
                self.capacity()
            );
        }
        self.size = self.size.max(size);
    }

    /// Lowers the logical size, never below the populated length.
    pub(crate) fn clamp_size(&mut self, size: u32) {
        self.size = self.size.min(size).max(self.length);
    }

    /// Writes `value` at `offset`, extending the length over any gap.
    /// Returns the previous slot contents.
    pub(crate) fn put(&mut self, offset: u32, value: T) -> T {
        if offset >= self.size {
            fatal_invariant!(
                "write at offset {} outside segment at {} of size {}",
                offset,
                self.left,
                self.size
            );
        }
        if offset >= self.length {
            self.length = offset + 1;
        }
        std::mem::replace(&mut self.slots_mut()[offset as usize], value)
    }

    /// Replaces the slot with the sentinel. Trailing holes are trimmed off
    /// the length. Returns the old contents and how many slots the length
    /// shrank by.
    pub(crate) fn take(&mut self, offset: u32) -> (T, u32) {
        let old = std::mem::replace(&mut self.slots_mut()[offset as usize], T::missing());
        let mut trimmed = 0;
        if offset + 1 == self.length {
            let before = self.length;
            self.trim_trailing_missing();
            trimmed = before - self.length;
        }
        (old, trimmed)
    }

    pub(crate) fn trim_trailing_missing(&mut self) {
        while self.length > 0 && self.live()[self.length as usize - 1].is_missing() {
            self.length -= 1;
        }
    }

    /// Clears every slot from `offset` on and shortens the length.
    pub(crate) fn truncate(&mut self, offset: u32) {
        if offset >= self.length {
            return;
        }
        for slot in &mut self.live_mut()[offset as usize..] {
            *slot = T::missing();
        }
        self.length = offset;
    }

    /// Removes slot 0, moving every later slot down by one.
    pub(crate) fn shift_front(&mut self) -> T {
        let first = std::mem::replace(&mut self.slots_mut()[0], T::missing());
        self.slots_mut().rotate_left(1);
        self.length -= 1;
        first
    }

    /// Discards the first `count` slots. The segment then starts `count`
    /// indices later with a correspondingly smaller reservation.
    pub(crate) fn drop_front(&mut self, count: u32) {
        for slot in &mut self.slots_mut()[..count as usize] {
            *slot = T::missing();
        }
        self.slots_mut().rotate_left(count as usize);
        self.left += count;
        self.size -= count;
        self.length = self.length.saturating_sub(count);
    }

    /// Number of holes within the populated prefix.
    pub(crate) fn holes(&self) -> u32 {
        self.live().iter().filter(|v| v.is_missing()).count() as u32
    }

    pub(crate) fn mem_allocated(&self) -> usize {
        self.buffer.mem_allocated()
            + self
                .live()
                .iter()
                .map(Element::heap_size)
                .sum::<usize>()
    }

    /// Whole capacity, for checks that reach past the logical size.
    pub(crate) fn raw_slots(&self) -> &[T] {
        self.buffer.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::SystemAllocator;

    fn segment(left: u32, size: u32) -> Segment<i32> {
        Segment::try_new(left, size, Arc::new(SystemAllocator)).unwrap()
    }

    #[mockalloc::test]
    fn put_extends_over_gaps() {
        let mut seg = segment(10, 4);
        assert!(seg.put(2, 7).is_missing());
        assert_eq!(seg.length, 3);
        assert_eq!(seg.holes(), 2);
        assert_eq!(seg.get(12), Some(&7));
        assert_eq!(seg.get(11), None);
        assert_eq!(seg.get(9), None);
        assert!(seg.reserves(13));
        assert!(!seg.reserves(14));
    }

    #[mockalloc::test]
    fn take_trims_trailing_holes() {
        let mut seg = segment(0, 8);
        seg.put(0, 1);
        seg.put(3, 4);
        let (old, trimmed) = seg.take(3);
        assert_eq!(old, 4);
        assert_eq!(trimmed, 3);
        assert_eq!(seg.length, 1);

        seg.put(2, 3);
        let (old, trimmed) = seg.take(0);
        assert_eq!(old, 1);
        assert_eq!(trimmed, 0);
        assert_eq!(seg.length, 3);
    }

    #[mockalloc::test]
    fn size_changes_respect_length_and_capacity() {
        let mut seg = segment(0, 4);
        seg.put(2, 1);
        seg.clamp_size(1);
        assert_eq!(seg.size, 3);
        seg.try_reserve(10).unwrap();
        assert_eq!(seg.size, 3);
        seg.expand(10);
        assert_eq!(seg.size, 10);
        seg.truncate(1);
        assert_eq!(seg.length, 1);
        assert!(seg.raw_slots()[1..].iter().all(Element::is_missing));
    }
}
