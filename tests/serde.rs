use serde_json::json;
use sparse_array::{Representation, SparseArray, Value};

#[test]
fn sparse_array_round_trips_through_json() {
    let mut array = SparseArray::new();
    array.set(0, 1).unwrap();
    array.set(70_000, -2).unwrap();
    array.set_length(100_000);

    let json = serde_json::to_value(&array).unwrap();
    assert_eq!(
        json,
        json!({
            "length": 100000,
            "representation": "Int32",
            "entries": [[0, 1], [70000, -2]]
        })
    );

    let back: SparseArray = serde_json::from_value(json).unwrap();
    assert_eq!(back, array);
    assert_eq!(back.representation(), Representation::Int32);
    assert_eq!(back.segment_count(), array.segment_count());
    back.validate().unwrap();
}

#[test]
fn values_convert_from_json() {
    let value = Value::try_from(json!("x")).unwrap();
    assert_eq!(value, Value::from("x"));
    let value = Value::try_from(json!({"$undefined": null})).unwrap();
    assert!(value.is_undefined());
    assert!(Value::try_from(json!([1, 2])).is_err());
}
