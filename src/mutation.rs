//! Structural surgery on the segment chain
//!
//! Every operation here that can fail does all of its allocation before the
//! first link or slot is touched, so an `Err` always leaves the store as it
//! was. Afterwards the segment index is dropped and the cache reset, since
//! keys and handles have moved.

use crate::alloc::AllocError;
use crate::config::MAX_ARRAY_LENGTH;
use crate::element::Element;
use crate::segment::{Segment, SegmentId};
use crate::store::SegmentStore;

fn offset_by(left: u32, delta: i64) -> u32 {
    (i64::from(left) + delta) as u32
}

#[derive(Copy, Clone)]
enum ShiftPlan {
    InPlace,
    // Head reservation runs straight into the next segment
    Merge { next: SegmentId, left: u32, size: u32 },
    // Empty head and the next segment starts at 1
    Promote(SegmentId),
}

enum InsertTarget<T: Element> {
    Nothing,
    Extend(u32),
    Fresh(Segment<T>),
}

impl<T: Element> SegmentStore<T> {
    /// Moves every segment after `after` by `delta`, keeping reservations
    /// inside the index space.
    fn move_segments(&mut self, after: Option<SegmentId>, delta: i64) {
        let mut current = after;
        while let Some(id) = current {
            let segment = self.segment_mut(id);
            segment.left = offset_by(segment.left, delta);
            segment.clamp_size(MAX_ARRAY_LENGTH - segment.left);
            current = segment.next;
        }
    }

    /// Lowers a segment's reservation so it ends before its successor.
    fn fit_before_next(&mut self, id: SegmentId) {
        let segment = self.segment(id);
        let left = segment.left;
        let bound = match segment.next {
            Some(next) => self.segment(next).left - left,
            None => MAX_ARRAY_LENGTH - left,
        };
        self.segment_mut(id).clamp_size(bound);
    }

    pub(crate) fn set_length(&mut self, new_length: u32) {
        if new_length >= self.length {
            self.length = new_length;
            return;
        }
        if new_length == 0 {
            let rest = self.segment(self.head).next;
            self.remove_from(rest);
            let allocator = self.allocator.clone();
            let head = self.head;
            *self.segment_mut(head) = Segment::empty(0, allocator);
            self.length = 0;
            self.finish_structural("truncated to zero");
            return;
        }
        let keep = self.locate(new_length - 1);
        let segment = self.segment_mut(keep);
        let offset = new_length - segment.left;
        segment.truncate(offset);
        segment.trim_trailing_missing();
        let rest = segment.next.take();
        self.remove_from(rest);
        self.length = new_length;
        self.finish_structural("truncated");
    }

    /// Removes index 0, moving everything else down by one. Returns the
    /// removed value, or `None` if index 0 was a hole.
    pub(crate) fn shift(&mut self) -> Result<Option<T>, AllocError> {
        if self.length == 0 {
            return Ok(None);
        }
        let head = self.segment(self.head);
        let head_size = head.size;
        let plan = match head.next.map(|id| (id, self.segment(id))) {
            Some((id, next)) if head_size == 0 && next.left == 1 => ShiftPlan::Promote(id),
            Some((id, next)) if head_size > 0 && next.left == head_size => ShiftPlan::Merge {
                next: id,
                left: next.left,
                size: next.size,
            },
            _ => ShiftPlan::InPlace,
        };
        if let ShiftPlan::Merge { left, size, .. } = plan {
            let head = self.head;
            self.segment_mut(head).try_reserve(left - 1 + size)?;
        }

        let mut removed = None;
        let moved_from = match plan {
            ShiftPlan::Promote(next) => {
                let old_head = self.head;
                self.remove_entry(old_head);
                self.head = next;
                Some(next)
            }
            ShiftPlan::InPlace | ShiftPlan::Merge { .. } => {
                let head_id = self.head;
                let head = self.segment_mut(head_id);
                if head.length > 0 {
                    removed = Some(head.shift_front()).filter(|v| !v.is_missing());
                }
                if let ShiftPlan::Merge { next, left, size } = plan {
                    let mut absorbed = self.remove_entry(next);
                    let head = self.segment_mut(head_id);
                    let base = left - 1;
                    head.expand(base + size);
                    let slots = head.slots_mut();
                    for (offset, slot) in absorbed.live_mut().iter_mut().enumerate() {
                        slots[base as usize + offset] = std::mem::replace(slot, T::missing());
                    }
                    if absorbed.length > 0 {
                        head.length = base + absorbed.length;
                    }
                    head.next = absorbed.next;
                }
                self.segment(head_id).next
            }
        };
        self.move_segments(moved_from, -1);
        self.length -= 1;
        self.finish_structural("shift");
        Ok(removed)
    }

    /// Inserts `items` at index 0, moving everything else up. The caller
    /// guarantees the new length fits.
    pub(crate) fn unshift(&mut self, items: Vec<T>) -> Result<(), AllocError> {
        let count = items.len() as u32;
        if count == 0 {
            return Ok(());
        }
        let head_id = self.head;
        let head = self.segment(head_id);
        let size = (u64::from(head.size) + u64::from(count)).min(u64::from(MAX_ARRAY_LENGTH)) as u32;
        self.segment_mut(head_id).try_reserve(size)?;

        let head = self.segment_mut(head_id);
        head.expand(size);
        head.slots_mut().rotate_right(count as usize);
        for (slot, item) in head.slots_mut().iter_mut().zip(items) {
            *slot = item;
        }
        head.length += count;
        let rest = head.next;
        self.move_segments(rest, i64::from(count));
        self.length += count;
        self.finish_structural("unshift");
        Ok(())
    }

    /// Replaces `delete_count` slots at `start` with `items`, moving
    /// everything after them. Returns the removed slots, holes included, as
    /// a store of their own. The caller guarantees the range lies within
    /// the array and the new length fits.
    pub(crate) fn splice(
        &mut self,
        start: u32,
        delete_count: u32,
        items: Vec<T>,
    ) -> Result<SegmentStore<T>, AllocError> {
        let end = start + delete_count;
        let insert_count = items.len() as u32;
        let delta = i64::from(insert_count) - i64::from(delete_count);

        let mut removed = SegmentStore::new(self.config, self.allocator.clone());
        for (index, slot) in self.entries(start, end) {
            removed.set(index - start, slot.clone())?;
        }
        removed.length = delete_count;

        let containing = self.locate(start);
        if u64::from(end) <= self.segment(containing).end() {
            self.splice_within(containing, start, delete_count, items, delta)?;
        } else {
            self.splice_across(start, end, items, delta)?;
        }
        self.length = offset_by(self.length, delta);
        self.finish_structural("splice");
        Ok(removed)
    }

    /// The whole edit lands inside the populated part of one segment.
    fn splice_within(
        &mut self,
        id: SegmentId,
        start: u32,
        delete_count: u32,
        items: Vec<T>,
        delta: i64,
    ) -> Result<(), AllocError> {
        let segment = self.segment(id);
        let left = segment.left;
        let grow = delta.max(0) as u64;
        let size = (u64::from(segment.size) + grow).min(u64::from(MAX_ARRAY_LENGTH - left)) as u32;
        self.segment_mut(id).try_reserve(size)?;

        let segment = self.segment_mut(id);
        segment.expand(size);
        let offset = (start - left) as usize;
        let slots = &mut segment.slots_mut()[offset..];
        for slot in &mut slots[..delete_count as usize] {
            *slot = T::missing();
        }
        if delta > 0 {
            slots.rotate_right(delta as usize);
        } else if delta < 0 {
            slots.rotate_left(delta.unsigned_abs() as usize);
        }
        for (slot, item) in slots.iter_mut().zip(items) {
            *slot = item;
        }
        segment.length = offset_by(segment.length, delta);
        segment.trim_trailing_missing();

        let rest = segment.next;
        self.move_segments(rest, delta);
        self.fit_before_next(id);
        Ok(())
    }

    /// The edit spans gaps or several segments.
    fn splice_across(
        &mut self,
        start: u32,
        end: u32,
        items: Vec<T>,
        delta: i64,
    ) -> Result<(), AllocError> {
        let insert_count = items.len() as u32;
        // Last segment strictly before `start`; everything after it is
        // dropped, trimmed or moved.
        let prefix = if start == 0 {
            self.head
        } else {
            self.locate(start - 1)
        };
        let prefix_segment = self.segment(prefix);
        let prefix_left = prefix_segment.left;

        let target = if insert_count == 0 {
            InsertTarget::Nothing
        } else if u64::from(start) <= prefix_segment.limit() {
            let needed = start + insert_count - prefix_left;
            self.segment_mut(prefix).try_reserve(needed)?;
            InsertTarget::Extend(needed)
        } else {
            self.reserve_entry()?;
            InsertTarget::Fresh(Segment::try_new(
                start,
                insert_count,
                self.allocator.clone(),
            )?)
        };

        let segment = self.segment_mut(prefix);
        segment.truncate(start - prefix_left);
        segment.trim_trailing_missing();
        let mut kept = prefix;
        let mut current = segment.next;
        while let Some(id) = current {
            let segment = self.segment(id);
            current = segment.next;
            let (left, end_of) = (segment.left, segment.end());
            if left < end && end_of <= u64::from(end) {
                self.remove_entry(id);
                self.segment_mut(kept).next = current;
                continue;
            }
            let segment = self.segment_mut(id);
            if left < end {
                segment.drop_front(end - left);
            }
            segment.left = offset_by(segment.left, delta);
            segment.clamp_size(MAX_ARRAY_LENGTH - segment.left);
            kept = id;
        }

        match target {
            InsertTarget::Nothing => {}
            InsertTarget::Extend(needed) => {
                let segment = self.segment_mut(prefix);
                segment.expand(needed);
                for (offset, item) in (start - prefix_left..).zip(items) {
                    segment.put(offset, item);
                }
            }
            InsertTarget::Fresh(mut segment) => {
                for (offset, item) in (0..).zip(items) {
                    segment.put(offset, item);
                }
                segment.next = self.segment(prefix).next;
                let id = self.insert_entry(segment);
                self.segment_mut(prefix).next = Some(id);
            }
        }

        // With nothing inserted at 0, a survivor can land on the emptied head
        let head = self.head;
        if let Some(next) = self.segment(head).next {
            if self.segment(next).left == 0 {
                self.remove_entry(head);
                self.head = next;
                return Ok(());
            }
        }
        self.fit_before_next(prefix);
        Ok(())
    }

    /// Reverses element order. Segment order flips and each segment is
    /// mirrored around the array length.
    pub(crate) fn reverse(&mut self) -> Result<(), AllocError> {
        let length = self.length;
        if length == 0 {
            return Ok(());
        }
        self.reserve_entry()?;

        let mut reversed: Option<SegmentId> = None;
        let mut current = Some(self.head);
        while let Some(id) = current {
            let segment = self.segment_mut(id);
            current = segment.next;
            if segment.length == 0 {
                self.remove_entry(id);
                continue;
            }
            segment.live_mut().reverse();
            segment.left = length - (segment.left + segment.length);
            segment.trim_trailing_missing();
            segment.clamp_size(segment.length);
            segment.next = reversed;
            reversed = Some(id);
        }

        match reversed {
            Some(first) if self.segment(first).left == 0 => self.head = first,
            first => {
                let mut head = Segment::empty(0, self.allocator.clone());
                head.next = first;
                self.head = self.insert_entry(head);
            }
        }
        self.finish_structural("reverse");
        Ok(())
    }

    /// Copies `[start, end)` into a new store, starting at index 0.
    pub(crate) fn slice(&self, start: u32, end: u32) -> Result<SegmentStore<T>, AllocError> {
        let mut res = SegmentStore::new(self.config, self.allocator.clone());
        for (index, slot) in self.entries(start, end) {
            res.set(index - start, slot.clone())?;
        }
        res.length = end.saturating_sub(start);
        Ok(res)
    }
}
