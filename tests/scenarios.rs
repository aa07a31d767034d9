use std::ops::ControlFlow;

use sparse_array::{ArrayConfig, Representation, SegmentInfo, SparseArray, Value, MAX_ARRAY_INDEX};

fn shape(array: &SparseArray) -> Vec<(u32, u32)> {
    array
        .segments()
        .into_iter()
        .map(|SegmentInfo { left, length, .. }| (left, length))
        .collect()
}

#[test]
fn int32_promotes_to_float64_on_fractional_write() {
    let mut array: SparseArray = vec![1, 2, 3].into();
    assert_eq!(array.representation(), Representation::Int32);

    array.set(1, 3.5).unwrap();
    assert_eq!(array.representation(), Representation::Float64);
    assert_eq!(array.get(0), Some(Value::Number(1.0)));
    assert_eq!(array.get(1), Some(Value::Number(3.5)));
    assert_eq!(array.get(2), Some(Value::Number(3.0)));
    array.validate().unwrap();
}

#[test]
fn splice_across_gap_moves_later_segment() {
    let config = ArrayConfig::builtin().with_merge_heuristic(0);
    let mut array = SparseArray::with_config(config);
    for i in [0, 1, 2, 10, 11, 12] {
        array.set(i, i).unwrap();
    }
    assert_eq!(shape(&array), vec![(0, 3), (10, 3)]);

    let removed = array
        .splice(2, 4, vec![Value::from("a"), Value::from("b")])
        .unwrap();
    array.validate().unwrap();

    assert_eq!(removed.len(), 4);
    assert_eq!(removed.get(0), Some(Value::Number(2.0)));
    assert_eq!(removed.next_present_index(1), None);

    assert_eq!(array.len(), 11);
    assert_eq!(array.representation(), Representation::Generic);
    assert_eq!(shape(&array), vec![(0, 4), (8, 3)]);
    assert_eq!(array.get(2), Some(Value::from("a")));
    assert_eq!(array.get(3), Some(Value::from("b")));
    assert_eq!(array.get(7), None);
    assert_eq!(array.get(8), Some(Value::Number(10.0)));
    assert_eq!(array.get(10), Some(Value::Number(12.0)));
}

#[test]
fn unshift_grows_single_segment() {
    let mut array: SparseArray = vec![Value::from("A"), Value::from("B"), Value::from("C")].into();
    assert_eq!(shape(&array), vec![(0, 3)]);

    let length = array
        .unshift(vec![Value::from("x"), Value::from("y")])
        .unwrap();
    array.validate().unwrap();

    assert_eq!(length, 5);
    assert_eq!(shape(&array), vec![(0, 5)]);
    let contents: Vec<Value> = array.present_entries().map(|(_, v)| v).collect();
    assert_eq!(
        contents,
        ["x", "y", "A", "B", "C"].iter().map(|s| Value::from(*s)).collect::<Vec<_>>()
    );
    assert!(array.has_no_missing_values());
}

#[test]
fn truncating_indexed_array_drops_and_rebuilds_index() {
    let config = ArrayConfig::builtin().with_index_crossover(8);
    let mut array = SparseArray::with_config(config);
    for i in 0..20 {
        array.set(i * 1000, i).unwrap();
    }
    assert!(array.has_index());
    assert_eq!(array.segment_count(), 20);
    array.validate().unwrap();

    array.set_length(0);
    assert!(!array.has_index());
    assert_eq!(array.segment_count(), 1);
    assert!(array.is_empty());
    array.validate().unwrap();

    array.set(0, 1).unwrap();
    assert_eq!(array.get(0), Some(Value::Number(1.0)));
    for i in 1..20 {
        array.set(i * 1000, i).unwrap();
        array.validate().unwrap();
    }
    assert!(array.has_index());
    for i in 1..20 {
        assert_eq!(array.get(i * 1000), Some(Value::from(i)));
    }
}

#[test]
fn structural_changes_keep_long_chains_indexed() {
    let config = ArrayConfig::builtin().with_index_crossover(8);
    let mut array = SparseArray::with_config(config);
    for i in 0..20 {
        array.set(i * 1000, i).unwrap();
    }
    assert!(array.has_index());

    assert_eq!(array.shift().unwrap(), Some(Value::from(0)));
    assert!(array.has_index());
    assert_eq!(array.get(999), Some(Value::from(1)));
    assert_eq!(array.get(18_999), Some(Value::from(19)));

    array.splice(500, 0, vec![Value::from(-1)]).unwrap();
    assert!(array.has_index());
    assert_eq!(array.get(500), Some(Value::from(-1)));
    assert_eq!(array.get(19_000), Some(Value::from(19)));
    array.validate().unwrap();

    array.set_length(4000);
    assert!(!array.has_index());
    assert_eq!(array.get(3000), Some(Value::from(3)));
    array.validate().unwrap();
}

#[test]
fn traversal_survives_deletes_ahead_of_cursor() {
    let config = ArrayConfig::builtin().with_merge_heuristic(0);
    let mut array = SparseArray::with_config(config);
    for i in [0, 1, 2, 1000, 1001, 5000] {
        array.set(i, i).unwrap();
    }

    let mut visited = Vec::new();
    let mut sum = 0.0;
    let flow = array.for_each_present_index(0, u32::MAX, |array, index, value| {
        visited.push(index);
        sum += value.as_f64().unwrap_or(0.0);
        if let Some(ahead) = array.next_present_index(index + 1) {
            array.delete(ahead);
        }
        ControlFlow::<()>::Continue(())
    });

    assert_eq!(flow, ControlFlow::Continue(()));
    assert_eq!(visited, vec![0, 2, 1001]);
    assert_eq!(sum, 1003.0);
    array.validate().unwrap();
}

#[test]
fn traversal_survives_structural_changes() {
    let mut array: SparseArray = (0..50).collect();
    array.set(10_000, 1).unwrap();

    let mut visited = 0;
    let flow = array.for_each_present_index(0, u32::MAX, |array, index, _| {
        visited += 1;
        match index {
            5 => {
                array.shift().unwrap();
            }
            30 => array.set_length(31),
            _ => {}
        }
        ControlFlow::<()>::Continue(())
    });
    assert_eq!(flow, ControlFlow::Continue(()));
    assert_eq!(visited, 31);
    assert_eq!(array.len(), 31);
    array.validate().unwrap();
}

#[test]
fn round_trips_at_index_extremes() {
    let mut array = SparseArray::new();
    array.set(MAX_ARRAY_INDEX, 7).unwrap();
    array.set(0, 1).unwrap();
    assert_eq!(array.get(MAX_ARRAY_INDEX), Some(Value::Number(7.0)));
    assert_eq!(array.get(0), Some(Value::Number(1.0)));
    assert_eq!(array.len(), u32::MAX);
    array.validate().unwrap();

    array.set_length(MAX_ARRAY_INDEX);
    assert_eq!(array.get(MAX_ARRAY_INDEX), None);
    assert_eq!(array.segment_count(), 1);
    array.validate().unwrap();
}

#[test]
fn generic_never_narrows() {
    let mut array = SparseArray::new();
    array.set(0, "s").unwrap();
    array.delete(0);
    array.set_length(0);
    array.set(0, 1).unwrap();
    assert_eq!(array.representation(), Representation::Generic);
    array.sort_by(|_, _| std::cmp::Ordering::Equal).unwrap();
    assert_eq!(array.representation(), Representation::Generic);
    let spliced = array.splice(0, 1, vec![]).unwrap();
    assert_eq!(spliced.representation(), Representation::Generic);
}

#[test]
fn truncation_clears_everything_past_length() {
    let mut array = SparseArray::new();
    for i in (0..5000).step_by(7) {
        array.set(i, i).unwrap();
    }
    array.set_length(2500);
    assert_eq!(array.len(), 2500);
    assert_eq!(array.next_present_index(2500), None);
    for i in 2500..5000 {
        assert_eq!(array.get(i), None);
    }
    array.set_length(5000);
    assert_eq!(array.next_present_index(2500), None);
    array.validate().unwrap();
}
