use thiserror::Error;

#[derive(Error, Debug)]
pub enum TensorError {
    #[error("shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: String, got: String },
    #[error("unsupported dtype: {0}")]
    UnsupportedDType(String),
    /// Argument shape, length, or contiguity violates a kernel's contract
    /// (zero-length inputs, non-contiguous input to a kernel that requires
    /// contiguity, mismatched lengths).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// An embedding or attention index fell outside its valid range.
    #[error("invalid index {index} (valid range is [0, {bound}))")]
    InvalidIndex { index: i64, bound: usize },
    /// A transient buffer required for a kernel or forward pass could not
    /// be allocated.
    #[error("allocation failure: {0}")]
    AllocationFailure(String),
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TensorError>;
