//! Deserialization of values and arrays
//!
//! Every number becomes an `f64`, so integers with a magnitude past 2^53
//! are rounded to the nearest representable double. Non-finite numbers are
//! written out as `null` and so never come back as numbers.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserialize, Deserializer, MapAccess, Visitor};

use crate::array::SparseArray;
use crate::element::Representation;
use crate::ser::{OBJECT_KEY, UNDEFINED_KEY};
use crate::value::{ObjectHandle, Value};

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("an array element")
    }

    #[inline]
    fn visit_bool<E>(self, value: bool) -> Result<Value, E> {
        Ok(Value::Bool(value))
    }

    // Rounds past 2^53
    #[inline]
    fn visit_i64<E>(self, value: i64) -> Result<Value, E> {
        Ok(Value::Number(value as f64))
    }

    #[inline]
    fn visit_u64<E>(self, value: u64) -> Result<Value, E> {
        Ok(Value::Number(value as f64))
    }

    #[inline]
    fn visit_f64<E>(self, value: f64) -> Result<Value, E> {
        Ok(Value::Number(value))
    }

    #[inline]
    fn visit_str<E>(self, value: &str) -> Result<Value, E> {
        Ok(Value::String(Arc::from(value)))
    }

    #[inline]
    fn visit_string<E>(self, value: String) -> Result<Value, E> {
        Ok(Value::String(Arc::from(value)))
    }

    #[inline]
    fn visit_none<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    #[inline]
    fn visit_some<D>(self, deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Deserialize::deserialize(deserializer)
    }

    #[inline]
    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_map<V>(self, mut visitor: V) -> Result<Value, V::Error>
    where
        V: MapAccess<'de>,
    {
        let key: String = match visitor.next_key()? {
            Some(key) => key,
            None => return Err(de::Error::invalid_length(0, &self)),
        };
        let res = match key.as_str() {
            UNDEFINED_KEY => {
                visitor.next_value::<de::IgnoredAny>()?;
                Value::Undefined
            }
            OBJECT_KEY => Value::Object(ObjectHandle(visitor.next_value()?)),
            _ => return Err(de::Error::unknown_field(&key, &[UNDEFINED_KEY, OBJECT_KEY])),
        };
        if visitor.next_key::<de::IgnoredAny>()?.is_some() {
            return Err(de::Error::invalid_length(2, &self));
        }
        Ok(res)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[derive(serde::Deserialize)]
#[serde(rename = "SparseArray", deny_unknown_fields)]
struct ArrayRepr {
    length: u32,
    #[serde(default)]
    representation: Representation,
    entries: Vec<(u32, Value)>,
}

impl<'de> Deserialize<'de> for SparseArray {
    fn deserialize<D>(deserializer: D) -> Result<SparseArray, D::Error>
    where
        D: Deserializer<'de>,
    {
        let repr = ArrayRepr::deserialize(deserializer)?;
        let mut res = SparseArray::new();
        res.ensure_representation(repr.representation)
            .map_err(de::Error::custom)?;
        for (index, value) in repr.entries {
            if index >= repr.length {
                return Err(de::Error::custom(format_args!(
                    "entry {} lies beyond the array length {}",
                    index, repr.length
                )));
            }
            res.set(index, value).map_err(de::Error::custom)?;
        }
        res.set_length(repr.length);
        Ok(res)
    }
}
