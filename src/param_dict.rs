//! `ParamDict`: a small tagged-union map keyed by integers, used to
//! carry parsed layer options and the output-shape hint from
//! `compute_output_shape` through to `load_param`. Write-once per layer
//! during compile.

use std::collections::HashMap;

use crate::tensor::Tensor;

/// Reserved key a layer's `compute_output_shape` writes its inferred
/// output shape to, as a flattened int tensor.
pub const OUTPUT_SHAPE_HINT: i32 = -1;

#[derive(Clone)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Tensor(Tensor),
}

#[derive(Default)]
pub struct ParamDict {
    values: HashMap<i32, ParamValue>,
}

impl ParamDict {
    pub fn new() -> Self {
        ParamDict { values: HashMap::new() }
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn set_int(&mut self, key: i32, value: i64) {
        self.values.insert(key, ParamValue::Int(value));
    }

    pub fn set_float(&mut self, key: i32, value: f64) {
        self.values.insert(key, ParamValue::Float(value));
    }

    pub fn set_tensor(&mut self, key: i32, value: Tensor) {
        self.values.insert(key, ParamValue::Tensor(value));
    }

    pub fn get_int(&self, key: i32, default: i64) -> i64 {
        match self.values.get(&key) {
            Some(ParamValue::Int(v)) => *v,
            Some(ParamValue::Float(v)) => *v as i64,
            _ => default,
        }
    }

    pub fn get_float(&self, key: i32, default: f64) -> f64 {
        match self.values.get(&key) {
            Some(ParamValue::Float(v)) => *v,
            Some(ParamValue::Int(v)) => *v as f64,
            _ => default,
        }
    }

    pub fn get_tensor(&self, key: i32) -> Option<&Tensor> {
        match self.values.get(&key) {
            Some(ParamValue::Tensor(t)) => Some(t),
            _ => None,
        }
    }

    pub fn contains(&self, key: i32) -> bool {
        self.values.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_returns_default() {
        let pd = ParamDict::new();
        assert_eq!(pd.get_int(0, 42), 42);
    }

    #[test]
    fn round_trips_values() {
        let mut pd = ParamDict::new();
        pd.set_int(0, 3);
        pd.set_float(1, 2.5);
        assert_eq!(pd.get_int(0, 0), 3);
        assert_eq!(pd.get_float(1, 0.0), 2.5);
    }
}
