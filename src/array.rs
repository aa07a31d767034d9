//! Functionality relating to the sparse array type

use std::cmp::Ordering;
use std::fmt::{self, Debug, Formatter};
use std::iter::FromIterator;
use std::mem;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::alloc::{abort_on_alloc_failure, SegmentAllocator, SystemAllocator};
use crate::config::{ArrayConfig, MAX_ARRAY_INDEX, MAX_ARRAY_LENGTH};
use crate::element::{Representation, INT32_MISSING};
use crate::error::{InvariantViolation, Result, SparseArrayError};
use crate::iter::{ItemsInRange, PresentEntries};
use crate::segment::SegmentInfo;
use crate::specialize::Storage;
use crate::store::SegmentStore;
use crate::value::{ObjectHandle, Value};

fn checked_index(index: u32) -> Result<u32> {
    if index > MAX_ARRAY_INDEX {
        return Err(SparseArrayError::InvalidIndex(u64::from(index)));
    }
    Ok(index)
}

fn checked_length(length: u64) -> Result<u32> {
    u32::try_from(length).map_err(|_| SparseArrayError::LengthOverflow)
}

/// Whether an array of this representation could hold an element strictly
/// equal to `value` (or SameValueZero-equal, when `nan_matches`).
fn may_contain(representation: Representation, value: &Value, nan_matches: bool) -> bool {
    match (representation, value) {
        (Representation::Generic, _) => true,
        (Representation::Float64, Value::Number(n)) => nan_matches || !n.is_nan(),
        (Representation::Int32, Value::Number(n)) => {
            n.trunc() == *n && *n >= f64::from(i32::MIN) && *n <= f64::from(i32::MAX)
        }
        _ => false,
    }
}

fn min_or_max_f64(slots: &[f64], find_max: bool) -> f64 {
    let mut res = if find_max {
        f64::NEG_INFINITY
    } else {
        f64::INFINITY
    };
    for &n in slots {
        if n.is_nan() {
            return n;
        }
        let better = if find_max {
            n > res || (n == 0.0 && res == 0.0 && res.is_sign_negative())
        } else {
            n < res || (n == 0.0 && res == 0.0 && n.is_sign_negative())
        };
        if better {
            res = n;
        }
    }
    res
}

/// A sparse array of up to `2^32 - 1` elements.
///
/// Elements live in a chain of segments, each covering a contiguous run of
/// indices, so large gaps cost nothing. The whole array shares one storage
/// representation: packed `i32`s, packed `f64`s, or arbitrary [`Value`]s.
/// Storing a value that does not fit promotes the array to a wider
/// representation; it is never narrowed again.
///
/// Missing indices ("holes") read as `None`, which is distinct from an
/// explicit [`Value::Undefined`].
pub struct SparseArray {
    storage: Storage,
}

impl SparseArray {
    /// Constructs a new empty `SparseArray` using the process-wide default
    /// configuration. Does not allocate.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ArrayConfig::default())
    }

    /// Constructs a new empty `SparseArray` with an explicit configuration.
    #[must_use]
    pub fn with_config(config: ArrayConfig) -> Self {
        Self::with_allocator(config, Arc::new(SystemAllocator))
    }

    /// Constructs a new empty `SparseArray` whose segment buffers come from
    /// `allocator`.
    #[must_use]
    pub fn with_allocator(config: ArrayConfig, allocator: Arc<dyn SegmentAllocator>) -> Self {
        Self {
            storage: Storage::new(config, allocator),
        }
    }

    pub(crate) fn from_storage(storage: Storage) -> Self {
        Self { storage }
    }

    /// Returns the configuration this array was created with.
    #[must_use]
    pub fn config(&self) -> ArrayConfig {
        self.storage.config()
    }

    /// Returns the current storage representation.
    #[must_use]
    pub fn representation(&self) -> Representation {
        self.storage.representation()
    }

    /// Returns the array length. Holes count towards it.
    #[must_use]
    pub fn len(&self) -> u32 {
        self.storage.length()
    }

    /// Returns `true` if the length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn after_mutation(&self) {
        if self.config().validate {
            if let Err(violation) = self.validate() {
                fatal_invariant!("{}", violation);
            }
        }
    }

    /// Returns the element at `index`, or `None` if it is a hole or past
    /// the end.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<Value> {
        self.storage.get(index)
    }

    /// Returns `true` if `index` holds an element.
    #[must_use]
    pub fn is_present(&self, index: u32) -> bool {
        self.get(index).is_some()
    }

    /// Stores `value` at `index`, extending the length if needed.
    ///
    /// The array is promoted first if `value` does not fit its current
    /// representation. Fails without changing any element if `index` is not
    /// a valid array index or memory runs out.
    pub fn set(&mut self, index: u32, value: impl Into<Value>) -> Result<()> {
        let index = checked_index(index)?;
        self.storage.set(index, &value.into())?;
        self.after_mutation();
        Ok(())
    }

    /// Stores `value` at `index` only if it is a hole. Returns whether the
    /// value was stored.
    pub fn set_if_absent(&mut self, index: u32, value: impl Into<Value>) -> Result<bool> {
        if self.is_present(index) {
            return Ok(false);
        }
        self.set(index, value)?;
        Ok(true)
    }

    /// Turns the element at `index` into a hole, returning it. The length
    /// is unchanged.
    pub fn delete(&mut self, index: u32) -> Option<Value> {
        let res = self.storage.delete(index);
        self.after_mutation();
        res
    }

    /// Sets the length. Shrinking discards every element at or past the new
    /// length; growing only adds holes.
    pub fn set_length(&mut self, length: u32) {
        self.storage.set_length(length);
        self.after_mutation();
    }

    /// Promotes the array to at least `representation` ahead of a bulk
    /// write.
    pub fn ensure_representation(&mut self, representation: Representation) -> Result<()> {
        self.storage.promote(representation)?;
        self.after_mutation();
        Ok(())
    }

    /// Appends `value`, returning the new length.
    pub fn push(&mut self, value: impl Into<Value>) -> Result<u32> {
        let index = self.len();
        if index == MAX_ARRAY_LENGTH {
            return Err(SparseArrayError::LengthOverflow);
        }
        self.set(index, value)?;
        Ok(index + 1)
    }

    /// Removes the last index, returning its element. Returns `None` if the
    /// array is empty or the last index is a hole.
    pub fn pop(&mut self) -> Option<Value> {
        let last = self.len().checked_sub(1)?;
        let res = self.get(last);
        self.set_length(last);
        res
    }

    /// Stores `value` at every index in `start..end`, clamped to the
    /// length. Either every index is written or, if memory runs out, none
    /// is.
    pub fn fill(&mut self, value: impl Into<Value>, start: u32, end: u32) -> Result<()> {
        let value = value.into();
        let end = end.min(self.len());
        if start >= end {
            return Ok(());
        }
        self.storage.fill(&value, start, end)?;
        self.after_mutation();
        Ok(())
    }

    // Structural operations

    /// Removes `delete_count` elements starting at `start` and inserts
    /// `items` in their place, moving later elements. Holes move with their
    /// neighbours. `start` and `delete_count` are clamped to the array.
    ///
    /// Returns the removed range, holes included, as a new array.
    pub fn splice(&mut self, start: u32, delete_count: u32, items: Vec<Value>) -> Result<Self> {
        let length = self.len();
        let start = start.min(length);
        let delete_count = delete_count.min(length - start);
        let inserted = u64::try_from(items.len()).map_err(|_| SparseArrayError::LengthOverflow)?;
        checked_length(u64::from(length - delete_count) + inserted)?;

        let removed = self.storage.splice(start, delete_count, &items)?;
        self.after_mutation();
        Ok(Self::from_storage(removed))
    }

    /// Removes index 0, moving every other element down by one. Returns the
    /// removed element, or `None` if it was a hole or the array is empty.
    pub fn shift(&mut self) -> Result<Option<Value>> {
        let res = self.storage.shift()?;
        self.after_mutation();
        Ok(res)
    }

    /// Inserts `items` at index 0, moving every other element up. Returns
    /// the new length.
    pub fn unshift(&mut self, items: Vec<Value>) -> Result<u32> {
        let inserted = u64::try_from(items.len()).map_err(|_| SparseArrayError::LengthOverflow)?;
        let length = checked_length(u64::from(self.len()) + inserted)?;
        self.storage.unshift(&items)?;
        self.after_mutation();
        Ok(length)
    }

    /// Reverses the element order in place. Holes are mirrored too.
    pub fn reverse(&mut self) -> Result<()> {
        self.storage.reverse()?;
        self.after_mutation();
        Ok(())
    }

    /// Copies `start..end`, clamped to the array, into a new array with the
    /// same representation.
    pub fn slice(&self, start: u32, end: u32) -> Result<Self> {
        let end = end.min(self.len());
        let start = start.min(end);
        Ok(Self::from_storage(self.storage.slice(start, end)?))
    }

    /// Returns a new array holding the elements of `self` followed by those
    /// of `other`.
    pub fn concat(&self, other: &SparseArray) -> Result<Self> {
        let length = checked_length(u64::from(self.len()) + u64::from(other.len()))?;
        let mut storage = self.storage.try_clone()?;
        storage.promote(other.representation())?;
        storage.append_from(&other.storage, self.len())?;
        debug_assert_eq!(storage.length(), length);
        Ok(Self::from_storage(storage))
    }

    /// Sorts the present elements with `compare`, stably. Explicit
    /// `undefined`s follow the sorted elements and holes come last; the
    /// length is unchanged.
    ///
    /// The comparator works on a detached snapshot, so the array is only
    /// touched once sorting has finished.
    pub fn sort_by(&mut self, mut compare: impl FnMut(&Value, &Value) -> Ordering) -> Result<()> {
        let length = self.len();
        let mut values: Vec<Value> = self.present_entries().map(|(_, value)| value).collect();
        let undefined = values.iter().filter(|value| value.is_undefined()).count();
        values.retain(|value| !value.is_undefined());
        values.sort_by(|a, b| compare(a, b));
        values.resize(values.len() + undefined, Value::Undefined);

        let mut storage = Storage::try_from_dense(
            &values,
            self.representation(),
            self.config(),
            self.storage.allocator().clone(),
        )?;
        storage.set_length(length);
        self.storage = storage;
        self.after_mutation();
        Ok(())
    }

    // Search

    /// First index at or after `from` whose element is strictly equal to
    /// `value`. Holes never match.
    #[must_use]
    pub fn index_of(&self, value: &Value, from: u32) -> Option<u32> {
        if !may_contain(self.representation(), value, false) {
            return None;
        }
        self.entries_in(from, self.len())
            .find(|(_, element)| element == value)
            .map(|(index, _)| index)
    }

    /// Last index at or before `from` whose element is strictly equal to
    /// `value`.
    #[must_use]
    pub fn last_index_of(&self, value: &Value, from: u32) -> Option<u32> {
        if !may_contain(self.representation(), value, false) {
            return None;
        }
        self.entries_in(0, from.saturating_add(1))
            .filter(|(_, element)| element == value)
            .last()
            .map(|(index, _)| index)
    }

    /// Whether any index at or after `from` holds an element equal to
    /// `value` under SameValueZero. Holes read as `undefined`.
    #[must_use]
    pub fn includes(&self, value: &Value, from: u32) -> bool {
        let length = self.len();
        if from >= length {
            return false;
        }
        if value.is_undefined() && self.has_holes_in(from, length) {
            return true;
        }
        if !may_contain(self.representation(), value, true) {
            return false;
        }
        self.entries_in(from, length)
            .any(|(_, element)| element.same_value_zero(value))
    }

    fn has_holes_in(&self, start: u32, end: u32) -> bool {
        if self.has_no_missing_values() {
            return false;
        }
        (self.entries_in(start, end).count() as u64) < u64::from(end - start)
    }

    /// Minimum or maximum of a numeric array, with `NaN` winning and `-0`
    /// ordered below `+0`.
    ///
    /// Only hole-free numeric arrays held in a single segment are handled.
    /// Every other shape returns `None`, meaning the caller should take its
    /// general path.
    #[must_use]
    pub fn find_min_or_max(&self, find_max: bool) -> Option<Value> {
        if self.is_empty() || !self.has_no_missing_values() {
            return None;
        }
        match &self.storage {
            Storage::Int32(store) => {
                let live = store.segment(store.head).live();
                let res = if find_max {
                    live.iter().max()
                } else {
                    live.iter().min()
                };
                res.map(|n| Value::Number(f64::from(*n)))
            }
            Storage::Float64(store) => {
                let live = store.segment(store.head).live();
                Some(Value::Number(min_or_max_f64(live, find_max)))
            }
            Storage::Generic(_) => None,
        }
    }

    // Iteration

    /// Present elements in `start..end`, ascending, skipping holes.
    ///
    /// The iterator borrows the array; see
    /// [`for_each_present_index`](Self::for_each_present_index) for a
    /// traversal that may modify it.
    pub fn entries_in(&self, start: u32, end: u32) -> PresentEntries<'_> {
        match &self.storage {
            Storage::Int32(store) => PresentEntries::int32(store.entries(start, end)),
            Storage::Float64(store) => PresentEntries::float64(store.entries(start, end)),
            Storage::Generic(store) => PresentEntries::generic(store.entries(start, end)),
        }
    }

    /// Every present element, ascending.
    pub fn present_entries(&self) -> PresentEntries<'_> {
        self.entries_in(0, self.len())
    }

    /// Every index in `start..end`, clamped to the length, with its element
    /// or `None` for a hole.
    pub fn items_in_range(&self, start: u32, end: u32) -> ItemsInRange<'_> {
        let end = end.min(self.len());
        ItemsInRange::new(self.entries_in(start, end), start, end)
    }

    /// The first present index at or after `from`.
    #[must_use]
    pub fn next_present_index(&self, from: u32) -> Option<u32> {
        self.entries_in(from, self.len())
            .next()
            .map(|(index, _)| index)
    }

    /// Visits present elements in `start..end` in ascending index order,
    /// handing the callback mutable access to the array.
    ///
    /// Each step looks up the next present index after the last one
    /// visited, so the callback may set, delete, or restructure freely.
    /// Elements it deletes ahead of the cursor are not visited; elements
    /// it adds ahead of the cursor are. Stops early when the callback
    /// breaks, returning its value.
    pub fn for_each_present_index<B>(
        &mut self,
        start: u32,
        end: u32,
        mut f: impl FnMut(&mut Self, u32, Value) -> ControlFlow<B>,
    ) -> ControlFlow<B> {
        let mut cursor = start;
        while cursor < end {
            let Some((index, value)) = self.entries_in(cursor, end).next() else {
                break;
            };
            if let ControlFlow::Break(res) = f(self, index, value) {
                return ControlFlow::Break(res);
            }
            match index.checked_add(1) {
                Some(next) => cursor = next,
                None => break,
            }
        }
        ControlFlow::Continue(())
    }

    // Diagnostics

    /// True when the first segment covers the whole length with no holes.
    #[must_use]
    pub fn has_no_missing_values(&self) -> bool {
        dispatch!(&self.storage, store => store.has_no_missing_values())
    }

    /// Number of segments in the chain.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        dispatch!(&self.storage, store => store.segment_count())
    }

    /// Whether a segment index is currently built.
    #[must_use]
    pub fn has_index(&self) -> bool {
        dispatch!(&self.storage, store => store.is_indexed())
    }

    /// Shape of every segment in chain order.
    #[must_use]
    pub fn segments(&self) -> Vec<SegmentInfo> {
        dispatch!(&self.storage, store => store.infos())
    }

    /// Checks every structural invariant, returning the first violation.
    pub fn validate(&self) -> std::result::Result<(), InvariantViolation> {
        dispatch!(&self.storage, store => store.validate())
    }

    /// Reports every object handle held by the array, for a host garbage
    /// collector.
    pub fn trace_references(&self, mut f: impl FnMut(ObjectHandle)) {
        if let Storage::Generic(store) = &self.storage {
            store.trace_references(&mut f);
        }
    }

    /// Bytes owned by the array, including segment buffers and string
    /// contents.
    #[must_use]
    pub fn mem_allocated(&self) -> usize {
        mem::size_of::<Self>() + dispatch!(&self.storage, store => store.mem_allocated())
    }

    /// Fallible counterpart of [`Clone::clone`].
    pub fn try_clone(&self) -> Result<Self> {
        Ok(Self::from_storage(self.storage.try_clone()?))
    }
}

impl Default for SparseArray {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SparseArray {
    fn clone(&self) -> Self {
        Self::from_storage(abort_on_alloc_failure(self.storage.try_clone()))
    }
}

impl PartialEq for SparseArray {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.present_entries().eq(other.present_entries())
    }
}

struct DebugEntries<'a>(&'a SparseArray);

impl Debug for DebugEntries<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.present_entries()).finish()
    }
}

impl Debug for SparseArray {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SparseArray")
            .field("length", &self.len())
            .field("representation", &self.representation())
            .field("entries", &DebugEntries(self))
            .finish()
    }
}

impl<U: Into<Value>> FromIterator<U> for SparseArray {
    fn from_iter<T: IntoIterator<Item = U>>(iter: T) -> Self {
        iter.into_iter().map(Into::into).collect::<Vec<Value>>().into()
    }
}

impl From<Vec<Value>> for SparseArray {
    fn from(other: Vec<Value>) -> Self {
        let storage = Storage::try_from_dense(
            &other,
            Representation::Int32,
            ArrayConfig::default(),
            Arc::new(SystemAllocator),
        );
        Self::from_storage(abort_on_alloc_failure(storage))
    }
}

impl From<Vec<i32>> for SparseArray {
    fn from(other: Vec<i32>) -> Self {
        let config = ArrayConfig::default();
        let allocator: Arc<dyn SegmentAllocator> = Arc::new(SystemAllocator);
        // The hole sentinel itself can only be stored as a float
        let storage = if other.contains(&INT32_MISSING) {
            SegmentStore::try_from_dense(other.into_iter().map(f64::from), config, allocator)
                .map(Storage::Float64)
        } else {
            SegmentStore::try_from_dense(other.into_iter(), config, allocator).map(Storage::Int32)
        };
        Self::from_storage(abort_on_alloc_failure(storage))
    }
}

impl From<Vec<f64>> for SparseArray {
    fn from(other: Vec<f64>) -> Self {
        let storage = SegmentStore::try_from_dense(
            other
                .into_iter()
                .map(|n| if n.is_nan() { f64::NAN } else { n }),
            ArrayConfig::default(),
            Arc::new(SystemAllocator),
        );
        Self::from_storage(abort_on_alloc_failure(storage.map(Storage::Float64)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{AllocError, BudgetAllocator};

    fn numbers(array: &SparseArray) -> Vec<(u32, f64)> {
        array
            .present_entries()
            .filter_map(|(i, v)| v.as_f64().map(|n| (i, n)))
            .collect()
    }

    #[mockalloc::test]
    fn can_create() {
        let x = SparseArray::new();
        let y = SparseArray::default();

        assert_eq!(x, y);
        assert!(x.is_empty());
        assert_eq!(x.representation(), Representation::Int32);
        assert_eq!(x.segment_count(), 1);
    }

    #[mockalloc::test]
    fn can_collect() {
        let x = vec![Value::Null, Value::Bool(true), Value::from(1)];
        let y: SparseArray = x.iter().cloned().collect();

        assert_eq!(y.len(), 3);
        assert_eq!(y.representation(), Representation::Generic);
        assert_eq!(y.get(2), Some(Value::Number(1.0)));
        assert!(y.has_no_missing_values());
    }

    #[mockalloc::test]
    fn can_set_get_delete() {
        let mut x = SparseArray::new();
        x.set(0, 1).unwrap();
        x.set(10, 2).unwrap();
        assert_eq!(x.len(), 11);
        assert_eq!(x.get(5), None);
        assert_eq!(x.get(10), Some(Value::Number(2.0)));
        assert_eq!(x.delete(10), Some(Value::Number(2.0)));
        assert_eq!(x.delete(10), None);
        assert_eq!(x.len(), 11);
        x.validate().unwrap();
    }

    #[mockalloc::test]
    fn rejects_invalid_index() {
        let mut x = SparseArray::new();
        assert_eq!(
            x.set(u32::MAX, 1),
            Err(SparseArrayError::InvalidIndex(u64::from(u32::MAX)))
        );
        x.set(MAX_ARRAY_INDEX, 1).unwrap();
        assert_eq!(x.len(), MAX_ARRAY_LENGTH);
        assert_eq!(x.push(2), Err(SparseArrayError::LengthOverflow));
        assert_eq!(x.unshift(vec![Value::Null]), Err(SparseArrayError::LengthOverflow));
        x.validate().unwrap();
    }

    #[mockalloc::test]
    fn undefined_is_not_a_hole() {
        let mut x = SparseArray::new();
        x.set(1, Value::Undefined).unwrap();
        assert_eq!(x.representation(), Representation::Generic);
        assert_eq!(x.get(0), None);
        assert_eq!(x.get(1), Some(Value::Undefined));
        assert!(x.is_present(1));
        assert!(!x.is_present(0));
    }

    #[mockalloc::test]
    fn can_push_pop() {
        let mut x = SparseArray::new();
        assert_eq!(x.push(1).unwrap(), 1);
        assert_eq!(x.push("two").unwrap(), 2);
        x.set_length(4);
        assert_eq!(x.pop(), None);
        assert_eq!(x.len(), 3);
        x.set_length(2);
        assert_eq!(x.pop(), Some(Value::from("two")));
        assert_eq!(x.pop(), Some(Value::Number(1.0)));
        assert_eq!(x.pop(), None);
        assert!(x.is_empty());
    }

    #[mockalloc::test]
    fn set_if_absent_keeps_existing() {
        let mut x: SparseArray = vec![1, 2].into();
        assert!(!x.set_if_absent(0, 9).unwrap());
        assert!(x.set_if_absent(5, 9).unwrap());
        assert_eq!(x.get(0), Some(Value::Number(1.0)));
        assert_eq!(x.get(5), Some(Value::Number(9.0)));
    }

    #[mockalloc::test]
    fn can_fill() {
        let mut x = SparseArray::new();
        x.set_length(6);
        x.fill(0.5, 1, 4).unwrap();
        assert_eq!(x.representation(), Representation::Float64);
        assert_eq!(numbers(&x), vec![(1, 0.5), (2, 0.5), (3, 0.5)]);
        x.fill(1, 4, 100).unwrap();
        assert_eq!(x.len(), 6);
        assert_eq!(x.get(5), Some(Value::Number(1.0)));
    }

    #[mockalloc::test]
    fn can_splice_and_slice() {
        let mut x: SparseArray = vec![0, 1, 2, 3, 4].into();
        let removed = x.splice(1, 2, vec![Value::from("a")]).unwrap();
        assert_eq!(removed, SparseArray::from(vec![1, 2]));
        assert_eq!(x.representation(), Representation::Generic);
        assert_eq!(x.len(), 4);
        assert_eq!(x.get(1), Some(Value::from("a")));
        assert_eq!(x.get(3), Some(Value::Number(4.0)));

        // Out of range arguments are clamped
        let removed = x.splice(10, 10, vec![]).unwrap();
        assert!(removed.is_empty());

        let y = x.slice(2, 100).unwrap();
        assert_eq!(y.len(), 2);
        assert_eq!(y.get(0), Some(Value::Number(3.0)));
        assert_eq!(y.representation(), Representation::Generic);
    }

    #[mockalloc::test]
    fn can_concat() {
        let mut x: SparseArray = vec![1, 2].into();
        x.set_length(4);
        let mut y = SparseArray::new();
        y.set(1, 2.5).unwrap();
        let z = x.concat(&y).unwrap();
        assert_eq!(z.len(), 6);
        assert_eq!(z.representation(), Representation::Float64);
        assert_eq!(numbers(&z), vec![(0, 1.0), (1, 2.0), (5, 2.5)]);
        z.validate().unwrap();
    }

    #[mockalloc::test]
    fn can_sort() {
        let mut x = SparseArray::new();
        x.set(0, 3).unwrap();
        x.set(2, Value::Undefined).unwrap();
        x.set(3, 1).unwrap();
        x.set(9, 2).unwrap();
        x.sort_by(|a, b| {
            a.as_f64()
                .partial_cmp(&b.as_f64())
                .unwrap_or(Ordering::Equal)
        })
        .unwrap();
        assert_eq!(x.len(), 10);
        assert_eq!(x.representation(), Representation::Generic);
        let items: Vec<Option<Value>> = x.items_in_range(0, 10).map(|(_, v)| v).collect();
        assert_eq!(
            items[..4].to_vec(),
            vec![
                Some(Value::from(1)),
                Some(Value::from(2)),
                Some(Value::from(3)),
                Some(Value::Undefined),
            ]
        );
        assert!(items[4..].iter().all(Option::is_none));
        x.validate().unwrap();
    }

    #[mockalloc::test]
    fn search_uses_strict_and_same_value_zero() {
        let mut x: SparseArray = vec![0.0, f64::NAN, 2.0, 0.0].into();
        assert_eq!(x.index_of(&Value::from(-0.0), 0), Some(0));
        assert_eq!(x.index_of(&Value::from(-0.0), 1), Some(3));
        assert_eq!(x.last_index_of(&Value::from(0), 2), Some(0));
        assert_eq!(x.index_of(&Value::from(f64::NAN), 0), None);
        assert!(x.includes(&Value::from(f64::NAN), 0));
        assert!(!x.includes(&Value::Undefined, 0));
        assert_eq!(x.index_of(&Value::from("2"), 0), None);

        x.set_length(6);
        assert!(x.includes(&Value::Undefined, 0));
        assert!(!x.includes(&Value::Undefined, 6));
    }

    #[mockalloc::test]
    fn int32_search_rejects_fractions() {
        let x: SparseArray = vec![1, 2, 3].into();
        assert_eq!(x.index_of(&Value::from(2.5), 0), None);
        assert_eq!(x.index_of(&Value::from(2.0), 0), Some(1));
        assert_eq!(x.index_of(&Value::from(-0.0), 0), None);
        assert!(!x.includes(&Value::from(f64::NAN), 0));
    }

    #[mockalloc::test]
    fn min_max_fast_path() {
        let x: SparseArray = vec![3, -7, 12].into();
        assert_eq!(x.find_min_or_max(true), Some(Value::Number(12.0)));
        assert_eq!(x.find_min_or_max(false), Some(Value::Number(-7.0)));

        let y: SparseArray = vec![0.0, -0.0, 1.5].into();
        let min = y.find_min_or_max(false).and_then(|v| v.as_f64()).unwrap();
        assert!(min == 0.0 && min.is_sign_negative());
        let z: SparseArray = vec![1.0, f64::NAN].into();
        assert!(z.find_min_or_max(true).and_then(|v| v.as_f64()).unwrap().is_nan());
    }

    #[mockalloc::test]
    fn min_max_declines_other_shapes() {
        let mut x: SparseArray = vec![1, 2].into();
        x.set(1000, 3).unwrap();
        assert!(x.segment_count() > 1);
        assert_eq!(x.find_min_or_max(true), None);
        assert_eq!(SparseArray::new().find_min_or_max(true), None);
        let y: SparseArray = vec![Value::from("a")].into();
        assert_eq!(y.find_min_or_max(false), None);
    }

    #[mockalloc::test]
    fn sentinel_integer_is_stored_as_float() {
        let x: SparseArray = vec![1, INT32_MISSING].into();
        assert_eq!(x.representation(), Representation::Float64);
        assert_eq!(x.get(1), Some(Value::Number(f64::from(INT32_MISSING))));
        assert!(x.has_no_missing_values());
    }

    #[mockalloc::test]
    fn callback_traversal_sees_mutations() {
        let mut x: SparseArray = (0..10).collect();
        let mut visited = Vec::new();
        let flow = x.for_each_present_index(0, 10, |array, index, _| {
            visited.push(index);
            array.delete(index + 1);
            if index == 8 {
                return ControlFlow::Break(index);
            }
            ControlFlow::Continue(())
        });
        assert_eq!(flow, ControlFlow::Break(8));
        assert_eq!(visited, vec![0, 2, 4, 6, 8]);
    }

    #[mockalloc::test]
    fn traces_objects() {
        let mut x = SparseArray::new();
        x.set(0, ObjectHandle(7)).unwrap();
        x.set(500, ObjectHandle(9)).unwrap();
        x.set(1, 1).unwrap();
        let mut seen = Vec::new();
        x.trace_references(|handle| seen.push(handle));
        assert_eq!(seen, vec![ObjectHandle(7), ObjectHandle(9)]);
        assert!(x.mem_allocated() > 0);
    }

    #[mockalloc::test]
    fn allocation_failure_is_reported() {
        let budget = Arc::new(BudgetAllocator::new(1 << 16));
        let mut x = SparseArray::with_allocator(ArrayConfig::builtin(), budget.clone());
        for i in 0..8 {
            x.set(i * 1000, i).unwrap();
        }
        let before = x.clone();
        budget.set_limit(budget.used());
        assert_eq!(x.set(500, 1), Err(SparseArrayError::Alloc(AllocError)));
        assert_eq!(
            x.unshift(vec![Value::Null; 64]),
            Err(SparseArrayError::Alloc(AllocError))
        );
        assert_eq!(x, before);
        x.validate().unwrap();
    }

    #[mockalloc::test]
    fn debug_lists_present_entries() {
        let mut x = SparseArray::new();
        x.set(2, 5).unwrap();
        assert_eq!(
            format!("{:?}", x),
            "SparseArray { length: 3, representation: Int32, entries: {2: 5.0} }"
        );
    }

    // Too slow for miri
    #[cfg(not(miri))]
    #[mockalloc::test]
    fn stress_test() {
        use rand::prelude::*;

        for i in 0..10 {
            // We want our test to be random but for errors to be reproducible
            let mut rng = StdRng::seed_from_u64(i);
            let mut arr = SparseArray::with_config(ArrayConfig::builtin().with_index_crossover(6));
            let mut model: Vec<Option<i32>> = Vec::new();

            for j in 0..1000 {
                let index = rng.gen_range(0..model.len() as u32 + 200);
                if rng.gen() {
                    arr.set(index, j).unwrap();
                    if index as usize >= model.len() {
                        model.resize(index as usize + 1, None);
                    }
                    model[index as usize] = Some(j);
                } else {
                    arr.delete(index);
                    if let Some(slot) = model.get_mut(index as usize) {
                        *slot = None;
                    }
                }
            }
            arr.validate().unwrap();
            assert_eq!(arr.len() as usize, model.len());
            for (index, expected) in model.iter().enumerate() {
                assert_eq!(arr.get(index as u32), expected.map(Value::from));
            }
        }
    }
}
