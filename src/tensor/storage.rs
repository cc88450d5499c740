//! Reference-counted, allocator-agnostic storage. A `Storage` is a
//! raw byte buffer tagged with the dtype it holds; `Tensor` layers shape,
//! strides and an offset on top of it. Sharing is `Arc`-based so
//! `use_count()` is exactly the strong-count refcount invariant.

use std::sync::Arc;

use crate::dtype::ScalarType;

#[derive(Clone)]
struct StorageInner {
    bytes: Box<[u8]>,
    dtype: ScalarType,
}

#[derive(Clone)]
pub struct Storage(Arc<StorageInner>);

impl Storage {
    pub fn new_zeroed(nbytes: usize, dtype: ScalarType) -> Self {
        Storage(Arc::new(StorageInner {
            bytes: vec![0u8; nbytes].into_boxed_slice(),
            dtype,
        }))
    }

    pub fn from_bytes(bytes: Vec<u8>, dtype: ScalarType) -> Self {
        Storage(Arc::new(StorageInner {
            bytes: bytes.into_boxed_slice(),
            dtype,
        }))
    }

    pub fn nbytes(&self) -> usize {
        self.0.bytes.len()
    }

    pub fn dtype(&self) -> ScalarType {
        self.0.dtype
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0.bytes
    }

    /// Number of live references to this buffer. Two tensor views sharing
    /// one `Storage` report `use_count() == 2`.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Clone-on-write mutable access: returns the buffer unchanged if this
    /// is the sole owner, otherwise clones the bytes first.
    pub fn make_mut(&mut self) -> &mut [u8] {
        &mut Arc::make_mut(&mut self.0).bytes
    }
}
