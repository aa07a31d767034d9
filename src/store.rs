//! Ownership and traversal of one array's segment chain
//!
//! Segments live in a small generational arena owned by the store and are
//! linked in ascending `left` order through [`SegmentId`] handles. A handle
//! to a released segment can never resolve to a live one, which makes the
//! last-used cache safe to keep across any mutation.

use std::cell::Cell;
use std::mem;
use std::sync::Arc;

use hashbrown::HashSet;
use tracing::{debug, trace};

use crate::alloc::{AllocError, SegmentAllocator};
use crate::btree::SegmentIndex;
use crate::config::{ArrayConfig, MAX_ARRAY_LENGTH};
use crate::element::Element;
use crate::error::InvariantViolation;
use crate::segment::{Segment, SegmentId, SegmentInfo};
use crate::value::ObjectHandle;

/// How segments are found: by walking from a cached segment, or through a
/// B-tree index that carries its own cache.
#[derive(Clone, Debug)]
pub(crate) enum Lookup {
    Direct { last_used: Cell<SegmentId> },
    Indexed(SegmentIndex),
}

#[derive(Debug)]
enum EntrySlot<T: Element> {
    Occupied(Segment<T>),
    Vacant { next_free: Option<u32> },
}

#[derive(Debug)]
struct Entry<T: Element> {
    generation: u32,
    slot: EntrySlot<T>,
}

#[derive(Debug)]
pub(crate) struct SegmentStore<T: Element> {
    entries: Vec<Entry<T>>,
    free: Option<u32>,
    live: usize,
    pub(crate) head: SegmentId,
    pub(crate) lookup: Lookup,
    pub(crate) length: u32,
    /// Holes inside the head's populated prefix.
    pub(crate) head_holes: u32,
    pub(crate) config: ArrayConfig,
    pub(crate) allocator: Arc<dyn SegmentAllocator>,
}

impl<T: Element> SegmentStore<T> {
    pub(crate) fn new(config: ArrayConfig, allocator: Arc<dyn SegmentAllocator>) -> Self {
        let head = Segment::empty(0, allocator.clone());
        Self::with_head(head, 0, config, allocator)
    }

    fn with_head(
        head: Segment<T>,
        length: u32,
        config: ArrayConfig,
        allocator: Arc<dyn SegmentAllocator>,
    ) -> Self {
        let head_holes = head.holes();
        let id = SegmentId {
            index: 0,
            generation: 0,
        };
        let mut res = Self {
            entries: vec![Entry {
                generation: 0,
                slot: EntrySlot::Occupied(head),
            }],
            free: None,
            live: 1,
            head: id,
            lookup: Lookup::Direct {
                last_used: Cell::new(id),
            },
            length,
            head_holes,
            config,
            allocator,
        };
        if config.force_index {
            res.build_index("forced by configuration");
        }
        res
    }

    /// A store whose head holds `items` densely from index 0.
    pub(crate) fn try_from_dense(
        items: impl ExactSizeIterator<Item = T>,
        config: ArrayConfig,
        allocator: Arc<dyn SegmentAllocator>,
    ) -> Result<Self, AllocError> {
        let length = u32::try_from(items.len()).map_err(|_| AllocError)?;
        let mut head = Segment::try_new(0, length, allocator.clone())?;
        for (offset, item) in (0..length).zip(items) {
            head.put(offset, item);
        }
        Ok(Self::with_head(head, length, config, allocator))
    }

    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(self.entries.len())
            .map_err(|_| AllocError)?;
        for entry in &self.entries {
            let slot = match &entry.slot {
                EntrySlot::Occupied(segment) => EntrySlot::Occupied(segment.try_clone()?),
                EntrySlot::Vacant { next_free } => EntrySlot::Vacant {
                    next_free: *next_free,
                },
            };
            entries.push(Entry {
                generation: entry.generation,
                slot,
            });
        }
        Ok(Self {
            entries,
            free: self.free,
            live: self.live,
            head: self.head,
            lookup: self.lookup.clone(),
            length: self.length,
            head_holes: self.head_holes,
            config: self.config,
            allocator: self.allocator.clone(),
        })
    }

    /// Converts every slot to a wider representation. The arena keeps its
    /// shape, so every handle (including those held by the index) stays
    /// valid in the result.
    pub(crate) fn try_widen<U: Element>(&self) -> Result<SegmentStore<U>, AllocError> {
        let mut entries = Vec::new();
        entries
            .try_reserve_exact(self.entries.len())
            .map_err(|_| AllocError)?;
        for entry in &self.entries {
            let slot = match &entry.slot {
                EntrySlot::Occupied(segment) => EntrySlot::Occupied(Segment::try_widen(segment)?),
                EntrySlot::Vacant { next_free } => EntrySlot::Vacant {
                    next_free: *next_free,
                },
            };
            entries.push(Entry {
                generation: entry.generation,
                slot,
            });
        }
        Ok(SegmentStore {
            entries,
            free: self.free,
            live: self.live,
            head: self.head,
            lookup: self.lookup.clone(),
            length: self.length,
            head_holes: self.head_holes,
            config: self.config,
            allocator: self.allocator.clone(),
        })
    }

    // Arena

    pub(crate) fn try_segment(&self, id: SegmentId) -> Option<&Segment<T>> {
        match self.entries.get(id.index as usize) {
            Some(Entry {
                generation,
                slot: EntrySlot::Occupied(segment),
            }) if *generation == id.generation => Some(segment),
            _ => None,
        }
    }

    pub(crate) fn segment(&self, id: SegmentId) -> &Segment<T> {
        match self.try_segment(id) {
            Some(segment) => segment,
            None => fatal_invariant!("stale segment handle {:?}", id),
        }
    }

    pub(crate) fn segment_mut(&mut self, id: SegmentId) -> &mut Segment<T> {
        match self.entries.get_mut(id.index as usize) {
            Some(Entry {
                generation,
                slot: EntrySlot::Occupied(segment),
            }) if *generation == id.generation => segment,
            _ => fatal_invariant!("stale segment handle {:?}", id),
        }
    }

    /// Makes sure the next [`insert_entry`](Self::insert_entry) cannot
    /// allocate.
    pub(crate) fn reserve_entry(&mut self) -> Result<(), AllocError> {
        if self.free.is_none() {
            self.entries.try_reserve(1).map_err(|_| AllocError)?;
        }
        Ok(())
    }

    pub(crate) fn insert_entry(&mut self, segment: Segment<T>) -> SegmentId {
        self.live += 1;
        match self.free {
            Some(index) => {
                let entry = &mut self.entries[index as usize];
                let slot = mem::replace(&mut entry.slot, EntrySlot::Occupied(segment));
                let EntrySlot::Vacant { next_free } = slot else {
                    fatal_invariant!("free list points at occupied entry {}", index)
                };
                let id = SegmentId {
                    index,
                    generation: entry.generation,
                };
                self.free = next_free;
                id
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Entry {
                    generation: 0,
                    slot: EntrySlot::Occupied(segment),
                });
                SegmentId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    /// Releases a segment. Its handle never resolves again.
    pub(crate) fn remove_entry(&mut self, id: SegmentId) -> Segment<T> {
        let free = self.free;
        let entry = match self.entries.get_mut(id.index as usize) {
            Some(entry) if entry.generation == id.generation => entry,
            _ => fatal_invariant!("stale segment handle {:?}", id),
        };
        let slot = mem::replace(&mut entry.slot, EntrySlot::Vacant { next_free: free });
        entry.generation = entry.generation.wrapping_add(1);
        let EntrySlot::Occupied(segment) = slot else {
            fatal_invariant!("segment {:?} released twice", id)
        };
        self.free = Some(id.index);
        self.live -= 1;
        segment
    }

    /// Releases `first` and everything linked after it.
    pub(crate) fn remove_from(&mut self, first: Option<SegmentId>) {
        let mut current = first;
        while let Some(id) = current {
            current = self.remove_entry(id).next;
        }
    }

    pub(crate) fn segment_count(&self) -> usize {
        self.live
    }

    pub(crate) fn chain(&self) -> Chain<'_, T> {
        Chain {
            store: self,
            next: Some(self.head),
        }
    }

    pub(crate) fn infos(&self) -> Vec<SegmentInfo> {
        self.chain().map(|(_, segment)| segment.info()).collect()
    }

    // Lookup

    pub(crate) fn last_used(&self) -> SegmentId {
        match &self.lookup {
            Lookup::Direct { last_used } => last_used.get(),
            Lookup::Indexed(tree) => tree.last_used.get(),
        }
    }

    pub(crate) fn set_last_used(&self, id: SegmentId) {
        match &self.lookup {
            Lookup::Direct { last_used } => last_used.set(id),
            Lookup::Indexed(tree) => tree.last_used.set(id),
        }
    }

    pub(crate) fn is_indexed(&self) -> bool {
        matches!(self.lookup, Lookup::Indexed(_))
    }

    pub(crate) fn index(&self) -> Option<&SegmentIndex> {
        match &self.lookup {
            Lookup::Indexed(tree) => Some(tree),
            Lookup::Direct { .. } => None,
        }
    }

    fn cached_floor(&self, index: u32) -> Option<SegmentId> {
        let cached = self.last_used();
        self.try_segment(cached)
            .filter(|segment| segment.reserves(index))
            .map(|_| cached)
    }

    /// Walks the chain to the last segment starting at or before `index`,
    /// from the cached segment when it lies before `index`.
    fn walk_to(&self, index: u32) -> (SegmentId, usize) {
        let cached = self.last_used();
        let mut current = match self.try_segment(cached) {
            Some(segment) if segment.left <= index => cached,
            _ => self.head,
        };
        let mut steps = 0;
        loop {
            match self.segment(current).next {
                Some(next) if self.segment(next).left <= index => {
                    current = next;
                    steps += 1;
                }
                _ => return (current, steps),
            }
        }
    }

    /// The last segment starting at or before `index`. The head starts at
    /// zero, so there always is one.
    pub(crate) fn locate(&self, index: u32) -> SegmentId {
        if let Some(cached) = self.cached_floor(index) {
            return cached;
        }
        let found = match &self.lookup {
            Lookup::Indexed(tree) => match tree.floor(index) {
                Some((_, id)) => id,
                None => fatal_invariant!("segment index has no segment at or before {}", index),
            },
            Lookup::Direct { .. } => self.walk_to(index).0,
        };
        self.set_last_used(found);
        found
    }

    /// Like [`locate`](Self::locate), building the index when the walk was
    /// long.
    fn locate_for_write(&mut self, index: u32) -> SegmentId {
        if let Some(cached) = self.cached_floor(index) {
            return cached;
        }
        if !self.is_indexed() {
            let (found, steps) = self.walk_to(index);
            if steps > self.config.index_crossover {
                self.build_index("lookup walked past crossover");
            }
            self.set_last_used(found);
            return found;
        }
        self.locate(index)
    }

    pub(crate) fn build_index(&mut self, reason: &'static str) {
        let tree = SegmentIndex::build(
            self.config.index_min_degree,
            self.last_used(),
            self.chain().map(|(id, segment)| (segment.left, id)),
        );
        debug!(segments = tree.len(), depth = tree.depth(), reason, "built segment index");
        self.lookup = Lookup::Indexed(tree);
    }

    pub(crate) fn discard_index(&mut self, reason: &'static str) {
        if let Lookup::Indexed(tree) = &self.lookup {
            debug!(segments = tree.len(), reason, "discarded segment index");
            self.lookup = Lookup::Direct {
                last_used: Cell::new(self.head),
            };
        }
    }

    fn should_index(&self) -> bool {
        self.config.force_index || self.live > self.config.index_crossover
    }

    fn index_new_segment(&mut self, left: u32, id: SegmentId) {
        if let Lookup::Indexed(tree) = &mut self.lookup {
            tree.insert(left, id);
            return;
        }
        if self.should_index() {
            self.build_index("segment count crossed threshold");
        }
    }

    /// Drops any index and cache after surgery that moved segments around,
    /// then rebuilds the index if the chain is still long enough to want
    /// one.
    pub(crate) fn finish_structural(&mut self, reason: &'static str) {
        self.discard_index(reason);
        self.set_last_used(self.head);
        self.recount_head_holes();
        if self.should_index() {
            self.build_index(reason);
        }
    }

    pub(crate) fn recount_head_holes(&mut self) {
        self.head_holes = self.segment(self.head).holes();
    }

    // Element access

    pub(crate) fn get(&self, index: u32) -> Option<&T> {
        if index >= self.length {
            return None;
        }
        self.segment(self.locate(index)).get(index)
    }

    /// Stores a non-missing value at `index`, which must be a valid array
    /// index. Nothing changes on failure.
    pub(crate) fn set(&mut self, index: u32, value: T) -> Result<(), AllocError> {
        let floor = self.locate_for_write(index);
        let target = if self.segment(floor).reserves(index) {
            floor
        } else {
            self.make_room(floor, index)?
        };
        self.write(target, index, value);
        if index >= self.length {
            self.length = index + 1;
        }
        self.set_last_used(target);
        Ok(())
    }

    fn write(&mut self, id: SegmentId, index: u32, value: T) {
        let is_head = id == self.head;
        let segment = self.segment_mut(id);
        let offset = index - segment.left;
        let old_length = segment.length;
        let old = segment.put(offset, value);
        if is_head {
            if offset >= old_length {
                self.head_holes += offset - old_length;
            } else if old.is_missing() {
                self.head_holes -= 1;
            }
        }
    }

    /// Finds or creates a segment reserving `index`, which lies past the
    /// reservation of `floor` and before its successor.
    fn make_room(&mut self, floor: SegmentId, index: u32) -> Result<SegmentId, AllocError> {
        let segment = self.segment(floor);
        let limit = segment.limit();
        let at_limit = u64::from(index) == limit;
        let next = segment.next.map(|id| (id, self.segment(id).left));
        let adjacent_next = match next {
            Some((id, left)) if u64::from(index) + 1 == u64::from(left) => Some(id),
            _ => None,
        };

        if at_limit {
            match adjacent_next {
                Some(next) if !self.is_indexed() => self.merge_next(floor, next)?,
                _ => self.grow_right(floor, index)?,
            }
            return Ok(floor);
        }
        if let Some(next) = adjacent_next {
            self.grow_left(floor, next, index)?;
            return Ok(next);
        }
        let lone_head = floor == self.head && next.is_none();
        if lone_head && u64::from(index) < limit + u64::from(self.config.merge_heuristic) {
            self.grow_right(floor, index)?;
            return Ok(floor);
        }
        self.insert_after(floor, index)
    }

    fn bound_after(&self, segment: &Segment<T>, left: u32) -> u32 {
        match segment.next {
            Some(next) => self.segment(next).left - left,
            None => MAX_ARRAY_LENGTH - left,
        }
    }

    fn grow_right(&mut self, id: SegmentId, index: u32) -> Result<(), AllocError> {
        let segment = self.segment(id);
        let left = segment.left;
        let bound = self.bound_after(segment, left);
        let size = self.config.grown_size(segment.size, index - left + 1, bound);
        let segment = self.segment_mut(id);
        segment.try_reserve(size)?;
        segment.expand(size);
        trace!(left, size, "grew segment");
        Ok(())
    }

    /// Extends `id` downwards so it reserves `index`, staying clear of
    /// `floor`.
    fn grow_left(&mut self, floor: SegmentId, id: SegmentId, index: u32) -> Result<(), AllocError> {
        let floor_segment = self.segment(floor);
        let clear_from = floor_segment
            .limit()
            .max(u64::from(floor_segment.left) + 1) as u32;
        let segment = self.segment(id);
        let old_left = segment.left;
        let extra = 1 + (index - clear_from).min(segment.size);
        let new_left = old_left - extra;
        let new_size = segment.size + extra;

        let segment = self.segment_mut(id);
        segment.try_reserve(new_size)?;
        segment.expand(new_size);
        segment.slots_mut().rotate_right(extra as usize);
        segment.left = new_left;
        if segment.length > 0 {
            segment.length += extra;
        }
        if let Lookup::Indexed(tree) = &mut self.lookup {
            tree.swap(old_left, id, id, new_left);
        }
        trace!(old_left, new_left, size = new_size, "grew segment downwards");
        Ok(())
    }

    /// Absorbs the successor of `id`, which starts one slot past its
    /// reservation.
    fn merge_next(&mut self, id: SegmentId, next: SegmentId) -> Result<(), AllocError> {
        let left = self.segment(id).left;
        let (next_left, next_size) = {
            let segment = self.segment(next);
            (segment.left, segment.size)
        };
        let base = next_left - left;
        let size = base + next_size;
        self.segment_mut(id).try_reserve(size)?;

        let mut absorbed = self.remove_entry(next);
        let segment = self.segment_mut(id);
        segment.expand(size);
        let slots = segment.slots_mut();
        for (offset, slot) in absorbed.live_mut().iter_mut().enumerate() {
            slots[base as usize + offset] = mem::replace(slot, T::missing());
        }
        if absorbed.length > 0 {
            segment.length = base + absorbed.length;
        }
        segment.next = absorbed.next;
        if id == self.head {
            self.recount_head_holes();
        }
        trace!(left, next_left, size, "merged adjacent segments");
        Ok(())
    }

    /// Links a fresh segment starting at `index` after `floor`.
    fn insert_after(&mut self, floor: SegmentId, index: u32) -> Result<SegmentId, AllocError> {
        let floor_segment = self.segment(floor);
        let next = floor_segment.next;
        let bound = match next {
            Some(next) => self.segment(next).left - index,
            None => MAX_ARRAY_LENGTH - index,
        };
        let size = self.config.initial_size(1, bound);
        self.reserve_entry()?;
        let mut segment = Segment::try_new(index, size, self.allocator.clone())?;
        segment.next = next;
        let id = self.insert_entry(segment);
        self.segment_mut(floor).next = Some(id);
        trace!(left = index, size, "allocated segment");
        self.index_new_segment(index, id);
        Ok(id)
    }

    /// Turns a present slot into a hole and returns its old contents.
    pub(crate) fn delete(&mut self, index: u32) -> Option<T> {
        if index >= self.length {
            return None;
        }
        let id = self.locate(index);
        let is_head = id == self.head;
        let segment = self.segment_mut(id);
        if segment.get(index).is_none() {
            return None;
        }
        let (old, trimmed) = segment.take(index - segment.left);
        if is_head {
            if trimmed == 0 {
                self.head_holes += 1;
            } else {
                self.head_holes -= trimmed - 1;
            }
        }
        Some(old)
    }

    /// True when the head alone covers `[0, length)` without holes.
    pub(crate) fn has_no_missing_values(&self) -> bool {
        self.head_holes == 0 && self.segment(self.head).length == self.length
    }

    // Traversal

    /// Present slots in `[start, end)`, ascending.
    pub(crate) fn entries(&self, start: u32, end: u32) -> Entries<'_, T> {
        let end = end.min(self.length);
        let segment = if start < end {
            self.first_reaching(start)
        } else {
            None
        };
        Entries {
            store: self,
            offset: segment.map_or(0, |s| start.saturating_sub(s.left)),
            segment,
            end,
        }
    }

    /// The segment holding `index` in its populated prefix, or failing that
    /// the first segment after it.
    fn first_reaching(&self, index: u32) -> Option<&Segment<T>> {
        match self.index() {
            Some(tree) => tree
                .find(index, |id| self.segment(id).length)
                .1
                .map(|id| self.segment(id)),
            None => Some(self.segment(self.locate(index))),
        }
    }

    pub(crate) fn trace_references(&self, f: &mut dyn FnMut(ObjectHandle)) {
        for (_, segment) in self.chain() {
            for slot in segment.live() {
                slot.trace(f);
            }
        }
    }

    pub(crate) fn mem_allocated(&self) -> usize {
        self.entries.capacity() * mem::size_of::<Entry<T>>()
            + self
                .chain()
                .map(|(_, segment)| segment.mem_allocated())
                .sum::<usize>()
    }

    // Validation

    pub(crate) fn validate(&self) -> Result<(), InvariantViolation> {
        let head = self.segment(self.head);
        if head.left != 0 {
            return Err(InvariantViolation::HeadNotAtZero(head.left));
        }

        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut current = Some(self.head);
        let mut previous_left = 0;
        while let Some(id) = current {
            let segment = match self.try_segment(id) {
                Some(segment) => segment,
                None => return Err(InvariantViolation::DanglingLink(previous_left)),
            };
            let left = segment.left;
            if !seen.insert(id) {
                return Err(InvariantViolation::DuplicateSegment(left));
            }
            if segment.length > segment.size || segment.size > segment.capacity() {
                return Err(InvariantViolation::LengthExceedsSize {
                    left,
                    length: segment.length,
                    size: segment.size,
                });
            }
            if let Some(offset) = segment.raw_slots()[segment.length as usize..]
                .iter()
                .position(|slot| !slot.is_missing())
            {
                return Err(InvariantViolation::LiveTail {
                    left,
                    offset: segment.length + offset as u32,
                });
            }
            if segment.end() > u64::from(self.length) {
                return Err(InvariantViolation::LengthBeyondArray {
                    left,
                    end: segment.end(),
                    length: self.length,
                });
            }
            if segment.limit() > u64::from(MAX_ARRAY_LENGTH) {
                return Err(InvariantViolation::SizeBeyondIndexSpace { left });
            }
            if let Some(next) = segment.next.and_then(|next| self.try_segment(next)) {
                if left >= next.left {
                    return Err(InvariantViolation::Unordered {
                        left,
                        next: next.left,
                    });
                }
                if segment.limit() > u64::from(next.left) {
                    return Err(InvariantViolation::Overlap {
                        left,
                        size: segment.size,
                        next: next.left,
                    });
                }
            }
            order.push((left, id));
            previous_left = left;
            current = segment.next;
        }

        if seen.len() != self.live {
            return Err(InvariantViolation::OrphanSegment(self.live - seen.len()));
        }
        if !seen.contains(&self.last_used()) {
            return Err(InvariantViolation::StaleCache);
        }
        if let Lookup::Indexed(tree) = &self.lookup {
            let mut walked = Vec::with_capacity(tree.len());
            tree.walk(|key, id| walked.push((key, id)));
            if let Some(position) = walked.iter().zip(&order).position(|(a, b)| a != b) {
                return Err(InvariantViolation::IndexMismatch(position));
            }
            if walked.len() != order.len() {
                return Err(InvariantViolation::IndexMismatch(walked.len().min(order.len())));
            }
        }
        let actual = head.holes();
        if actual != self.head_holes {
            return Err(InvariantViolation::MissingFlag {
                recorded: self.head_holes,
                actual,
            });
        }
        Ok(())
    }
}

/// Segments in chain order.
pub(crate) struct Chain<'a, T: Element> {
    store: &'a SegmentStore<T>,
    next: Option<SegmentId>,
}

impl<'a, T: Element> Iterator for Chain<'a, T> {
    type Item = (SegmentId, &'a Segment<T>);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let segment = self.store.segment(id);
        self.next = segment.next;
        Some((id, segment))
    }
}

/// Present slots of a store in ascending index order.
pub(crate) struct Entries<'a, T: Element> {
    store: &'a SegmentStore<T>,
    segment: Option<&'a Segment<T>>,
    offset: u32,
    end: u32,
}

impl<'a, T: Element> Iterator for Entries<'a, T> {
    type Item = (u32, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let segment = self.segment?;
            while self.offset < segment.length {
                let offset = self.offset;
                self.offset += 1;
                let index = segment.left + offset;
                if index >= self.end {
                    self.segment = None;
                    return None;
                }
                let slot = &segment.live()[offset as usize];
                if !slot.is_missing() {
                    return Some((index, slot));
                }
            }
            self.segment = segment
                .next
                .map(|id| self.store.segment(id))
                .filter(|next| next.left < self.end);
            self.offset = 0;
        }
    }
}
