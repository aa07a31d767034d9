#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use sparse_array::{ArrayConfig, SparseArray, Value};

#[derive(Arbitrary, Debug)]
enum Element {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    String(String),
}

impl Element {
    fn to_value(&self) -> Value {
        match self {
            Element::Undefined => Value::Undefined,
            Element::Null => Value::Null,
            Element::Bool(b) => Value::Bool(*b),
            Element::Int(i) => Value::from(*i),
            Element::Number(n) => Value::from(*n),
            Element::String(s) => Value::from(s.as_str()),
        }
    }
}

#[derive(Arbitrary, Debug)]
enum Op {
    Set(u16, Element),
    SetFar(u32, Element),
    Delete(u16),
    SetLength(u16),
    Shift,
    Unshift(Vec<Element>),
    Splice(u16, u16, Vec<Element>),
    Reverse,
    Slice(u16, u16),
    Sort,
    Push(Element),
    Pop,
    Fill(Element, u16, u16),
    Concat,
}

#[derive(Arbitrary, Debug)]
struct Input {
    force_index: bool,
    ops: Vec<Op>,
}

fn values(elements: &[Element]) -> Vec<Value> {
    elements.iter().map(Element::to_value).collect()
}

fuzz_target!(|input: Input| {
    let config = ArrayConfig::builtin()
        .with_index_crossover(4)
        .with_index_min_degree(2)
        .with_force_index(input.force_index);
    let mut array = SparseArray::with_config(config);

    for op in &input.ops {
        match op {
            Op::Set(index, value) => {
                let _ = array.set(u32::from(*index), value.to_value());
            }
            Op::SetFar(index, value) => {
                let _ = array.set(*index, value.to_value());
            }
            Op::Delete(index) => {
                array.delete(u32::from(*index));
            }
            Op::SetLength(length) => array.set_length(u32::from(*length)),
            Op::Shift => {
                let _ = array.shift();
            }
            Op::Unshift(items) => {
                let _ = array.unshift(values(items));
            }
            Op::Splice(start, delete, items) => {
                if let Ok(removed) = array.splice(u32::from(*start), u32::from(*delete), values(items)) {
                    removed.validate().unwrap();
                }
            }
            Op::Reverse => {
                let _ = array.reverse();
            }
            Op::Slice(start, end) => {
                if let Ok(slice) = array.slice(u32::from(*start), u32::from(*end)) {
                    slice.validate().unwrap();
                }
            }
            Op::Sort => {
                let _ = array.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
            }
            Op::Push(value) => {
                let _ = array.push(value.to_value());
            }
            Op::Pop => {
                array.pop();
            }
            Op::Fill(value, start, end) => {
                let _ = array.fill(value.to_value(), u32::from(*start), u32::from(*end));
            }
            Op::Concat => {
                if let Ok(joined) = array.concat(&array) {
                    joined.validate().unwrap();
                }
            }
        }
        array.validate().unwrap();
    }
});
