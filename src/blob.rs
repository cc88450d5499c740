//! A `Blob` is a named edge in the compiled graph: the layer index that
//! produces it, the layer index that consumes it, and its declared shape
//! once `compute_output_shape` has run. Storage for its actual value at
//! runtime lives in the `Extractor`, not here.

#[derive(Debug, Clone)]
pub struct Blob {
    pub name: String,
    /// Index of the layer that writes this blob, or `-1` before linking.
    pub producer: i32,
    /// Index of the layer that reads this blob, or `-1` if unconsumed.
    pub consumer: i32,
    pub shape: Vec<i64>,
}

impl Blob {
    pub fn new(name: String) -> Blob {
        Blob { name, producer: -1, consumer: -1, shape: Vec::new() }
    }
}
