//! Serialization of values and arrays

use serde::ser::{Serialize, SerializeMap, SerializeStruct, Serializer};

use crate::array::SparseArray;
use crate::value::Value;

pub(crate) const UNDEFINED_KEY: &str = "$undefined";
pub(crate) const OBJECT_KEY: &str = "$object";

// Largest magnitude below which every integer is exactly representable
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(UNDEFINED_KEY, &true)?;
                map.end()
            }
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Number(n) => {
                if n.trunc() == *n && n.abs() <= MAX_SAFE_INTEGER && !(*n == 0.0 && n.is_sign_negative())
                {
                    serializer.serialize_i64(*n as i64)
                } else {
                    serializer.serialize_f64(*n)
                }
            }
            Value::String(s) => serializer.serialize_str(s),
            Value::Object(handle) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(OBJECT_KEY, &handle.0)?;
                map.end()
            }
        }
    }
}

struct PresentEntries<'a>(&'a SparseArray);

impl Serialize for PresentEntries<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.0.present_entries())
    }
}

impl Serialize for SparseArray {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("SparseArray", 3)?;
        state.serialize_field("length", &self.len())?;
        state.serialize_field("representation", &self.representation())?;
        state.serialize_field("entries", &PresentEntries(self))?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::value::ObjectHandle;

    #[mockalloc::test]
    fn serialize_values() {
        assert_eq!(serde_json::to_value(Value::Null).unwrap(), json!(null));
        assert_eq!(serde_json::to_value(Value::from(3)).unwrap(), json!(3));
        assert_eq!(serde_json::to_value(Value::from(-0.0)).unwrap(), json!(-0.0));
        assert_eq!(serde_json::to_value(Value::from(0.5)).unwrap(), json!(0.5));
        assert_eq!(serde_json::to_value(Value::from("hi")).unwrap(), json!("hi"));
        assert_eq!(
            serde_json::to_value(Value::Undefined).unwrap(),
            json!({"$undefined": true})
        );
        assert_eq!(
            serde_json::to_value(Value::Object(ObjectHandle(12))).unwrap(),
            json!({"$object": 12})
        );
    }

    #[mockalloc::test]
    fn serialize_array_lists_present_entries() {
        let mut array = SparseArray::new();
        array.set(1, 7).unwrap();
        array.set(40, 8).unwrap();
        array.set_length(50);
        assert_eq!(
            serde_json::to_value(&array).unwrap(),
            json!({
                "length": 50,
                "representation": "Int32",
                "entries": [[1, 7], [40, 8]]
            })
        );
    }
}
