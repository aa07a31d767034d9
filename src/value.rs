//! Values exchanged with the host runtime

use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

/// Opaque reference to a garbage-collected object owned by the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(pub u64);

/// A value stored in, or read from, an array slot.
///
/// Equality is strict equality: `NaN` is not equal to itself and `-0.0`
/// equals `0.0`. Use [`Value::same_value_zero`] for the comparison used by
/// `includes`.
#[derive(Clone, PartialEq)]
pub enum Value {
    /// An explicit `undefined`, distinct from a hole.
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
    Object(ObjectHandle),
}

impl Value {
    /// Returns the number if this is a numeric value.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    /// Equality where `NaN` matches `NaN` and the zeros match each other.
    #[must_use]
    pub fn same_value_zero(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            _ => self == other,
        }
    }

    pub(crate) fn heap_size(&self) -> usize {
        match self {
            Self::String(s) => s.len(),
            _ => 0,
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => Debug::fmt(b, f),
            Self::Number(n) => Debug::fmt(n, f),
            Self::String(s) => Debug::fmt(s, f),
            Self::Object(h) => write!(f, "<object {}>", h.0),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Self::Undefined
    }
}

macro_rules! from_number_impl {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Value {
            fn from(other: $ty) -> Self {
                Self::Number(other.into())
            }
        })*
    };
}

from_number_impl!(i8, u8, i16, u16, i32, u32, f32, f64);

impl From<bool> for Value {
    fn from(other: bool) -> Self {
        Self::Bool(other)
    }
}

impl From<&str> for Value {
    fn from(other: &str) -> Self {
        Self::String(other.into())
    }
}

impl From<String> for Value {
    fn from(other: String) -> Self {
        Self::String(other.into())
    }
}

impl From<ObjectHandle> for Value {
    fn from(other: ObjectHandle) -> Self {
        Self::Object(other)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(other: Option<T>) -> Self {
        other.map_or(Self::Null, Into::into)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = serde_json::Error;

    fn try_from(other: serde_json::Value) -> Result<Self, Self::Error> {
        serde_json::from_value(other)
    }
}

impl TryFrom<&Value> for serde_json::Value {
    type Error = serde_json::Error;

    fn try_from(other: &Value) -> Result<Self, Self::Error> {
        serde_json::to_value(other)
    }
}
