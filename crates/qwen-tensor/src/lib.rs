//! `qwen-tensor` - Tensor storage, shape/stride descriptors, and CPU compute
//! kernels for the qwen2 inference engine.
//!
//! This crate provides:
//! - A `Tensor` type backed by dtype-polymorphic CPU storage, plus
//!   `TensorView` for strided, borrowed descriptors
//! - A `ComputeBackend` trait for pluggable compute (CPU, Metal, etc.)
//! - A reference `CpuBackend` implementation of the nine decoder kernels
//! - Shape utilities
//! - Data type definitions (F32, F16, Bf16, quantized formats) and the
//!   `Element` conversion trait kernels are monomorphized over

pub mod backend;
pub mod cpu;
pub mod dtype;
pub mod element;
pub mod error;
#[cfg(feature = "metal")]
pub mod metal;
pub mod shape;
pub mod storage;
pub mod tensor;

// Re-export primary types at the crate root for convenience.
pub use backend::ComputeBackend;
pub use cpu::CpuBackend;
pub use dtype::DType;
pub use element::Element;
pub use error::{Result, TensorError};
pub use shape::Shape;
pub use storage::CpuStorage;
pub use tensor::{Tensor, TensorView};
