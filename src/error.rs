//! Status-code style error domain for the engine. Every fallible operation
//! across the tensor core and the graph executor returns `GPResult<T>`
//! instead of panicking or throwing; this file is the closed set of ways
//! those operations can fail.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GPError {
    #[error("unknown layer type `{0}`")]
    UnknownLayer(String),

    #[error("bad option for layer `{layer}`: {detail}")]
    BadOption { layer: String, detail: String },

    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<i64>, found: Vec<i64> },

    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),

    #[error("short read: requested {requested} bytes, got {got}")]
    ShortRead { requested: usize, got: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("weight mismatch for layer `{layer}`: {detail}")]
    WeightMismatch { layer: String, detail: String },

    #[error("graph error: {0}")]
    GraphError(String),

    #[error("runtime kernel error: {0}")]
    RuntimeKernelError(String),
}

pub type GPResult<T> = Result<T, GPError>;
