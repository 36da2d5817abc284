//! Decoding of nested JSON number arrays into n-dimensional arrays.

use ndarray::{ArrayD, IxDyn};
use serde_json::{Number, Value};

/// A leaf type a JSON number can decode into.
pub(crate) trait JsonLeaf: Sized {
    fn from_number(n: &Number) -> Option<Self>;
}

impl JsonLeaf for f32 {
    fn from_number(n: &Number) -> Option<Self> {
        n.as_f64().map(|v| v as f32)
    }
}

/// Integers are kept exact; fractional values truncate toward zero.
impl JsonLeaf for i64 {
    fn from_number(n: &Number) -> Option<Self> {
        if let Some(v) = n.as_i64() {
            return Some(v);
        }
        let v = n.as_f64()?.trunc();
        if v >= i64::MIN as f64 && v < i64::MAX as f64 {
            Some(v as i64)
        } else {
            None
        }
    }
}

/// Parses a (possibly nested) JSON array of numbers.
///
/// A bare number decodes to a 0-dimensional array. Nested arrays must be
/// rectangular; every leaf must be a number.
pub(crate) fn parse_numeric_array(text: &str) -> Result<ArrayD<f32>, String> {
    parse_array(text)
}

/// Like [`parse_numeric_array`], for categorical ids.
pub(crate) fn parse_integer_array(text: &str) -> Result<ArrayD<i64>, String> {
    parse_array(text)
}

fn parse_array<T: JsonLeaf>(text: &str) -> Result<ArrayD<T>, String> {
    let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;

    let mut shape = Vec::new();
    let mut probe = &value;
    while let Value::Array(items) = probe {
        shape.push(items.len());
        match items.first() {
            Some(first) => probe = first,
            None => break,
        }
    }

    let mut data = Vec::with_capacity(shape.iter().product());
    flatten(&value, &shape, &mut data)?;
    ArrayD::from_shape_vec(IxDyn(&shape), data).map_err(|e| format!("bad array shape: {}", e))
}

fn flatten<T: JsonLeaf>(value: &Value, shape: &[usize], out: &mut Vec<T>) -> Result<(), String> {
    match (value, shape.split_first()) {
        (Value::Number(n), None) => {
            let v = T::from_number(n).ok_or_else(|| format!("number {} is out of range", n))?;
            out.push(v);
            Ok(())
        }
        (Value::Array(items), Some((&len, rest))) => {
            if items.len() != len {
                return Err(format!(
                    "ragged array: expected {} elements, found {}",
                    len,
                    items.len()
                ));
            }
            items.iter().try_for_each(|item| flatten(item, rest, out))
        }
        (Value::Array(_), None) => Err("ragged array: unexpected nesting".to_string()),
        (Value::Number(_), Some(_)) => Err("ragged array: expected a nested array".to_string()),
        (other, _) => Err(format!("expected a number, found {}", other)),
    }
}
