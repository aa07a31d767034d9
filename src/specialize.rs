//! Representation switching
//!
//! An array starts out storing packed `i32`s and is promoted to `f64`s and
//! then to generic slots as values that need them are stored. Promotion
//! converts every segment up front and never goes back.

use std::sync::Arc;

use tracing::debug;

use crate::alloc::{AllocError, SegmentAllocator};
use crate::config::ArrayConfig;
use crate::element::{Element, Representation, Slot};
use crate::store::SegmentStore;
use crate::value::Value;

/// Segment store of whichever representation the array currently uses.
#[derive(Debug)]
pub(crate) enum Storage {
    Int32(SegmentStore<i32>),
    Float64(SegmentStore<f64>),
    Generic(SegmentStore<Slot>),
}

/// Runs `$body` with `$store` bound to the store of the active
/// representation.
macro_rules! dispatch {
    ($storage:expr, $store:ident => $body:expr) => {
        match $storage {
            $crate::specialize::Storage::Int32($store) => $body,
            $crate::specialize::Storage::Float64($store) => $body,
            $crate::specialize::Storage::Generic($store) => $body,
        }
    };
}

/// Converts a value already known to fit `T`.
pub(crate) fn encode<T: Element>(value: &Value) -> T {
    match T::from_value(value) {
        Some(slot) => slot,
        None => fatal_invariant!(
            "{:?} does not fit the {:?} representation",
            value,
            T::REPRESENTATION
        ),
    }
}

pub(crate) fn encode_all<T: Element>(values: &[Value]) -> Vec<T> {
    values.iter().map(encode).collect()
}

/// The narrowest representation holding every value in `values`.
pub(crate) fn required_for_all<'a>(values: impl IntoIterator<Item = &'a Value>) -> Representation {
    values
        .into_iter()
        .map(Representation::required_for)
        .max()
        .unwrap_or_default()
}

impl Storage {
    pub(crate) fn new(config: ArrayConfig, allocator: Arc<dyn SegmentAllocator>) -> Self {
        Storage::Int32(SegmentStore::new(config, allocator))
    }

    /// Storage holding `values` densely from index 0, in the narrowest
    /// representation that is at least `at_least`.
    pub(crate) fn try_from_dense(
        values: &[Value],
        at_least: Representation,
        config: ArrayConfig,
        allocator: Arc<dyn SegmentAllocator>,
    ) -> Result<Self, AllocError> {
        Ok(match required_for_all(values).max(at_least) {
            Representation::Int32 => Storage::Int32(SegmentStore::try_from_dense(
                values.iter().map(encode),
                config,
                allocator,
            )?),
            Representation::Float64 => Storage::Float64(SegmentStore::try_from_dense(
                values.iter().map(encode),
                config,
                allocator,
            )?),
            Representation::Generic => Storage::Generic(SegmentStore::try_from_dense(
                values.iter().map(encode),
                config,
                allocator,
            )?),
        })
    }

    pub(crate) fn representation(&self) -> Representation {
        match self {
            Storage::Int32(_) => Representation::Int32,
            Storage::Float64(_) => Representation::Float64,
            Storage::Generic(_) => Representation::Generic,
        }
    }

    pub(crate) fn config(&self) -> ArrayConfig {
        dispatch!(self, store => store.config)
    }

    pub(crate) fn allocator(&self) -> &Arc<dyn SegmentAllocator> {
        dispatch!(self, store => &store.allocator)
    }

    pub(crate) fn length(&self) -> u32 {
        dispatch!(self, store => store.length)
    }

    pub(crate) fn try_clone(&self) -> Result<Self, AllocError> {
        Ok(match self {
            Storage::Int32(store) => Storage::Int32(store.try_clone()?),
            Storage::Float64(store) => Storage::Float64(store.try_clone()?),
            Storage::Generic(store) => Storage::Generic(store.try_clone()?),
        })
    }

    /// A copy of the storage in the wider `target` representation, or
    /// `None` if it is already at least that wide.
    fn try_widened(&self, target: Representation) -> Result<Option<Storage>, AllocError> {
        Ok(Some(match (self, target) {
            (Storage::Int32(store), Representation::Float64) => Storage::Float64(store.try_widen()?),
            (Storage::Int32(store), Representation::Generic) => Storage::Generic(store.try_widen()?),
            (Storage::Float64(store), Representation::Generic) => {
                Storage::Generic(store.try_widen()?)
            }
            _ => return Ok(None),
        }))
    }

    fn replace_with(&mut self, widened: Storage) {
        debug!(
            from = ?self.representation(),
            to = ?widened.representation(),
            segments = dispatch!(&widened, store => store.segment_count()),
            "promoted array representation"
        );
        *self = widened;
    }

    /// Widens the storage to at least `target`. Narrowing is never done.
    /// On failure the storage is left in its old representation.
    pub(crate) fn promote(&mut self, target: Representation) -> Result<(), AllocError> {
        if let Some(widened) = self.try_widened(target)? {
            self.replace_with(widened);
        }
        Ok(())
    }

    /// Stores `value`, promoting if it does not fit. The write lands in the
    /// widened copy before it replaces the storage, so a failure leaves the
    /// old representation in place.
    pub(crate) fn set(&mut self, index: u32, value: &Value) -> Result<(), AllocError> {
        match self.try_widened(Representation::required_for(value))? {
            Some(mut widened) => {
                dispatch!(&mut widened, store => store.set(index, encode(value)))?;
                self.replace_with(widened);
                Ok(())
            }
            None => dispatch!(self, store => store.set(index, encode(value))),
        }
    }

    pub(crate) fn get(&self, index: u32) -> Option<Value> {
        dispatch!(self, store => store.get(index).and_then(Element::to_value))
    }

    pub(crate) fn delete(&mut self, index: u32) -> Option<Value> {
        dispatch!(self, store => store.delete(index).and_then(|old| old.to_value()))
    }

    pub(crate) fn set_length(&mut self, length: u32) {
        dispatch!(self, store => store.set_length(length))
    }

    pub(crate) fn shift(&mut self) -> Result<Option<Value>, AllocError> {
        dispatch!(self, store => Ok(store.shift()?.and_then(|old| old.to_value())))
    }

    pub(crate) fn unshift(&mut self, items: &[Value]) -> Result<(), AllocError> {
        match self.try_widened(required_for_all(items))? {
            Some(mut widened) => {
                dispatch!(&mut widened, store => store.unshift(encode_all(items)))?;
                self.replace_with(widened);
                Ok(())
            }
            None => dispatch!(self, store => store.unshift(encode_all(items))),
        }
    }

    /// Stores `value` at every index in `start..end`. The writes go to a
    /// copy, widened if needed, which only replaces the storage once every
    /// write has succeeded.
    pub(crate) fn fill(&mut self, value: &Value, start: u32, end: u32) -> Result<(), AllocError> {
        let widened = self.try_widened(Representation::required_for(value))?;
        let promoted = widened.is_some();
        let mut copy = match widened {
            Some(widened) => widened,
            None => self.try_clone()?,
        };
        dispatch!(&mut copy, store => {
            for index in start..end {
                store.set(index, encode(value))?;
            }
        });
        if promoted {
            self.replace_with(copy);
        } else {
            *self = copy;
        }
        Ok(())
    }

    /// Splices `items` in, returning the removed range as storage of the
    /// representation the array had before the splice.
    pub(crate) fn splice(
        &mut self,
        start: u32,
        delete_count: u32,
        items: &[Value],
    ) -> Result<Storage, AllocError> {
        let Some(mut widened) = self.try_widened(required_for_all(items))? else {
            return self.splice_in_place(start, delete_count, items);
        };
        // Taken before widening so it never needs narrowing back
        let removed = self.slice(start, start + delete_count)?;
        widened.splice_in_place(start, delete_count, items)?;
        self.replace_with(widened);
        Ok(removed)
    }

    fn splice_in_place(
        &mut self,
        start: u32,
        delete_count: u32,
        items: &[Value],
    ) -> Result<Storage, AllocError> {
        Ok(match self {
            Storage::Int32(store) => {
                Storage::Int32(store.splice(start, delete_count, encode_all(items))?)
            }
            Storage::Float64(store) => {
                Storage::Float64(store.splice(start, delete_count, encode_all(items))?)
            }
            Storage::Generic(store) => {
                Storage::Generic(store.splice(start, delete_count, encode_all(items))?)
            }
        })
    }

    pub(crate) fn reverse(&mut self) -> Result<(), AllocError> {
        dispatch!(self, store => store.reverse())
    }

    pub(crate) fn slice(&self, start: u32, end: u32) -> Result<Storage, AllocError> {
        Ok(match self {
            Storage::Int32(store) => Storage::Int32(store.slice(start, end)?),
            Storage::Float64(store) => Storage::Float64(store.slice(start, end)?),
            Storage::Generic(store) => Storage::Generic(store.slice(start, end)?),
        })
    }

    /// Copies every present value of `other` into `self` at `offset`. The
    /// caller promotes `self` first and checks the combined length.
    pub(crate) fn append_from(&mut self, other: &Storage, offset: u32) -> Result<(), AllocError> {
        let other_length = other.length();
        dispatch!(other, source => {
            for (index, slot) in source.entries(0, other_length) {
                if let Some(value) = slot.to_value() {
                    self.set(offset + index, &value)?;
                }
            }
        });
        let length = offset + other_length;
        dispatch!(self, store => {
            if store.length < length {
                store.set_length(length);
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{BudgetAllocator, SystemAllocator};

    fn storage() -> Storage {
        Storage::new(ArrayConfig::builtin(), Arc::new(SystemAllocator))
    }

    #[mockalloc::test]
    fn promotes_only_upwards() {
        let mut storage = storage();
        storage.set(0, &Value::from(1)).unwrap();
        storage.set(500, &Value::from(2)).unwrap();
        assert_eq!(storage.representation(), Representation::Int32);

        storage.set(1, &Value::from(1.5)).unwrap();
        assert_eq!(storage.representation(), Representation::Float64);
        assert_eq!(storage.get(0), Some(Value::Number(1.0)));
        assert_eq!(storage.get(500), Some(Value::Number(2.0)));

        storage.set(2, &Value::from(3)).unwrap();
        assert_eq!(storage.representation(), Representation::Float64);

        storage.set(3, &Value::from("x")).unwrap();
        assert_eq!(storage.representation(), Representation::Generic);
        assert_eq!(storage.get(1), Some(Value::Number(1.5)));
        assert_eq!(storage.get(4), None);

        storage.promote(Representation::Int32).unwrap();
        assert_eq!(storage.representation(), Representation::Generic);
    }

    #[mockalloc::test]
    fn sentinel_integer_forces_float64() {
        let mut storage = storage();
        storage
            .set(0, &Value::from(f64::from(crate::element::INT32_MISSING)))
            .unwrap();
        assert_eq!(storage.representation(), Representation::Float64);
        assert_eq!(
            storage.get(0),
            Some(Value::Number(f64::from(crate::element::INT32_MISSING)))
        );
    }

    #[mockalloc::test]
    fn holes_survive_promotion() {
        let mut storage = storage();
        storage.set(0, &Value::from(1)).unwrap();
        storage.set(2, &Value::from(3)).unwrap();
        storage.set(1, &Value::Undefined).unwrap();
        storage.delete(1);
        assert_eq!(storage.representation(), Representation::Generic);
        assert_eq!(storage.get(1), None);
        assert_eq!(storage.get(2), Some(Value::Number(3.0)));
        dispatch!(&storage, store => store.validate()).unwrap();
    }

    #[mockalloc::test]
    fn failed_promotion_keeps_old_storage() {
        let budget = Arc::new(BudgetAllocator::new(1 << 20));
        let mut storage = Storage::new(ArrayConfig::builtin(), budget.clone());
        for i in 0..64 {
            storage.set(i, &Value::from(i)).unwrap();
        }
        budget.set_limit(budget.used());
        assert_eq!(storage.set(3, &Value::from(0.5)), Err(AllocError));
        assert_eq!(storage.representation(), Representation::Int32);
        assert_eq!(storage.get(3), Some(Value::Number(3.0)));
    }

    #[mockalloc::test]
    fn failed_write_after_widening_keeps_old_storage() {
        let budget = Arc::new(BudgetAllocator::new(usize::MAX));
        let mut storage = Storage::new(ArrayConfig::builtin(), budget.clone());
        storage.set(0, &Value::from(1)).unwrap();
        let base = budget.used();

        let mut failures = 0;
        for extra in 0..4096 {
            budget.set_limit(base + extra);
            match storage.set(1_000_000, &Value::from(0.5)) {
                Ok(()) => break,
                Err(AllocError) => failures += 1,
            }
            assert_eq!(storage.representation(), Representation::Int32);
            assert_eq!(storage.get(0), Some(Value::Number(1.0)));
            assert_eq!(storage.length(), 1);
        }
        assert!(failures > 0);
        assert_eq!(storage.representation(), Representation::Float64);
        assert_eq!(storage.get(1_000_000), Some(Value::Number(0.5)));
    }

    #[mockalloc::test]
    fn failed_unshift_after_widening_keeps_old_storage() {
        let budget = Arc::new(BudgetAllocator::new(usize::MAX));
        let mut storage = Storage::new(ArrayConfig::builtin(), budget.clone());
        for i in 0..8 {
            storage.set(i, &Value::from(i)).unwrap();
        }
        let base = budget.used();
        let items: Vec<Value> = (0..40).map(|_| Value::from("s")).collect();

        for extra in 0..65_536 {
            budget.set_limit(base + extra);
            if storage.unshift(&items).is_ok() {
                break;
            }
            assert_eq!(storage.representation(), Representation::Int32);
            assert_eq!(storage.length(), 8);
            assert_eq!(storage.get(7), Some(Value::Number(7.0)));
        }
        assert_eq!(storage.representation(), Representation::Generic);
        assert_eq!(storage.length(), 48);
        assert_eq!(storage.get(47), Some(Value::Number(7.0)));
    }

    #[mockalloc::test]
    fn splice_with_wider_items_keeps_removed_narrow() {
        let mut storage = storage();
        for i in 0..4 {
            storage.set(i, &Value::from(i)).unwrap();
        }
        let removed = storage.splice(1, 2, &[Value::from(0.25)]).unwrap();
        assert_eq!(removed.representation(), Representation::Int32);
        assert_eq!(removed.length(), 2);
        assert_eq!(storage.representation(), Representation::Float64);
        assert_eq!(storage.length(), 3);
        assert_eq!(storage.get(1), Some(Value::Number(0.25)));
        assert_eq!(storage.get(2), Some(Value::Number(3.0)));
    }
}
