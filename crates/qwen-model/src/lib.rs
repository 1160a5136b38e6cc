//! `qwen-model` - GGUF loading, tokenizer adapter, and the Qwen2
//! decoder/session for the qwen2 inference engine.

pub mod error;
pub mod gguf;
pub mod qwen2;
pub mod tokenizer;

pub use error::{ModelError, Result};
pub use qwen2::{Qwen2Config, Qwen2Layer, Qwen2Model, Qwen2Weights, Session};
