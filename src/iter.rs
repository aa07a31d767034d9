//! Iterators over the contents of a [`SparseArray`](crate::SparseArray)

use std::fmt::{self, Debug, Formatter};
use std::iter::FusedIterator;

use crate::element::{Element, Slot};
use crate::store::Entries;
use crate::value::Value;

enum Inner<'a> {
    Int32(Entries<'a, i32>),
    Float64(Entries<'a, f64>),
    Generic(Entries<'a, Slot>),
}

fn decode<T: Element>(entries: &mut Entries<'_, T>) -> Option<(u32, Value)> {
    entries.find_map(|(index, slot)| slot.to_value().map(|value| (index, value)))
}

/// Present elements of an array in ascending index order. Holes are
/// skipped.
///
/// Returned by [`SparseArray::present_entries`](crate::SparseArray::present_entries)
/// and [`SparseArray::entries_in`](crate::SparseArray::entries_in).
pub struct PresentEntries<'a> {
    inner: Inner<'a>,
}

impl<'a> PresentEntries<'a> {
    pub(crate) fn int32(entries: Entries<'a, i32>) -> Self {
        Self {
            inner: Inner::Int32(entries),
        }
    }

    pub(crate) fn float64(entries: Entries<'a, f64>) -> Self {
        Self {
            inner: Inner::Float64(entries),
        }
    }

    pub(crate) fn generic(entries: Entries<'a, Slot>) -> Self {
        Self {
            inner: Inner::Generic(entries),
        }
    }
}

impl Iterator for PresentEntries<'_> {
    type Item = (u32, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            Inner::Int32(entries) => decode(entries),
            Inner::Float64(entries) => decode(entries),
            Inner::Generic(entries) => decode(entries),
        }
    }
}

impl FusedIterator for PresentEntries<'_> {}

impl Debug for PresentEntries<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PresentEntries").finish_non_exhaustive()
    }
}

/// Every index of a range with its value, `None` for holes.
///
/// Returned by [`SparseArray::items_in_range`](crate::SparseArray::items_in_range).
pub struct ItemsInRange<'a> {
    present: std::iter::Peekable<PresentEntries<'a>>,
    next: u32,
    end: u32,
}

impl<'a> ItemsInRange<'a> {
    pub(crate) fn new(present: PresentEntries<'a>, start: u32, end: u32) -> Self {
        Self {
            present: present.peekable(),
            next: start,
            end: end.max(start),
        }
    }
}

impl Iterator for ItemsInRange<'_> {
    type Item = (u32, Option<Value>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = self.next;
        self.next += 1;
        match self.present.peek() {
            Some((present, _)) if *present == index => {
                Some((index, self.present.next().map(|(_, value)| value)))
            }
            _ => Some((index, None)),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ItemsInRange<'_> {}
impl FusedIterator for ItemsInRange<'_> {}

impl Debug for ItemsInRange<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemsInRange")
            .field("next", &self.next)
            .field("end", &self.end)
            .finish()
    }
}
