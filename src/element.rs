//! Slot representations and their missing-item sentinels

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::value::{ObjectHandle, Value};

/// Bit pattern marking a hole in an `Int32` array. Stores of this exact
/// integer promote the array to `Float64`.
pub const INT32_MISSING: i32 = 0xFFF8_0002_u32 as i32;

/// Bit pattern marking a hole in a `Float64` array. It is a NaN payload that
/// stored values never carry, since every NaN is canonicalized on write.
pub const FLOAT64_MISSING_BITS: u64 = 0xFFF8_0002_FFF8_0002;

/// Storage kind of a whole array. Ordered by generality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Representation {
    /// Packed 32-bit integers
    Int32,
    /// Packed 64-bit floats
    Float64,
    /// Arbitrary values
    Generic,
}

impl Default for Representation {
    fn default() -> Self {
        Self::Int32
    }
}

impl Representation {
    /// The narrowest representation able to hold `value`.
    #[must_use]
    pub fn required_for(value: &Value) -> Self {
        match value {
            Value::Number(n) if int32_from_f64(*n).is_some() => Self::Int32,
            Value::Number(_) => Self::Float64,
            _ => Self::Generic,
        }
    }

    /// Whether `value` can be stored without promotion.
    #[must_use]
    pub fn can_hold(self, value: &Value) -> bool {
        Self::required_for(value) <= self
    }
}

fn int32_from_f64(n: f64) -> Option<i32> {
    let i = n as i32;
    if f64::from(i) == n && !(i == 0 && n.is_sign_negative()) && i != INT32_MISSING {
        Some(i)
    } else {
        None
    }
}

/// A slot type usable as segment storage.
pub(crate) trait Element: Clone + Debug + Send + Sync + 'static {
    const REPRESENTATION: Representation;

    fn missing() -> Self;

    fn is_missing(&self) -> bool;

    /// `None` for the missing sentinel.
    fn to_value(&self) -> Option<Value>;

    /// `None` if the value does not fit this representation.
    fn from_value(value: &Value) -> Option<Self>;

    /// Converts a slot of a narrower representation, mapping its sentinel to
    /// ours.
    fn widen<S: Element>(source: &S) -> Self {
        match source.to_value() {
            None => Self::missing(),
            Some(value) => Self::from_value(&value).unwrap_or_else(|| {
                fatal_invariant!(
                    "{:?} slot {:?} does not widen to {:?}",
                    S::REPRESENTATION,
                    value,
                    Self::REPRESENTATION
                )
            }),
        }
    }

    fn trace(&self, _f: &mut dyn FnMut(ObjectHandle)) {}

    fn heap_size(&self) -> usize {
        0
    }
}

impl Element for i32 {
    const REPRESENTATION: Representation = Representation::Int32;

    fn missing() -> Self {
        INT32_MISSING
    }

    fn is_missing(&self) -> bool {
        *self == INT32_MISSING
    }

    fn to_value(&self) -> Option<Value> {
        (!self.is_missing()).then(|| Value::Number(f64::from(*self)))
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().and_then(int32_from_f64)
    }
}

impl Element for f64 {
    const REPRESENTATION: Representation = Representation::Float64;

    fn missing() -> Self {
        f64::from_bits(FLOAT64_MISSING_BITS)
    }

    fn is_missing(&self) -> bool {
        self.to_bits() == FLOAT64_MISSING_BITS
    }

    fn to_value(&self) -> Option<Value> {
        (!self.is_missing()).then(|| Value::Number(*self))
    }

    fn from_value(value: &Value) -> Option<Self> {
        value
            .as_f64()
            .map(|n| if n.is_nan() { f64::NAN } else { n })
    }
}

/// Generic slot: any value, or a hole.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Slot(Option<Value>);

impl Element for Slot {
    const REPRESENTATION: Representation = Representation::Generic;

    fn missing() -> Self {
        Slot(None)
    }

    fn is_missing(&self) -> bool {
        self.0.is_none()
    }

    fn to_value(&self) -> Option<Value> {
        self.0.clone()
    }

    fn from_value(value: &Value) -> Option<Self> {
        Some(Slot(Some(value.clone())))
    }

    fn trace(&self, f: &mut dyn FnMut(ObjectHandle)) {
        if let Some(Value::Object(handle)) = &self.0 {
            f(*handle);
        }
    }

    fn heap_size(&self) -> usize {
        self.0.as_ref().map_or(0, Value::heap_size)
    }
}
