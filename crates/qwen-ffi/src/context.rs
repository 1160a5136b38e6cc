use std::sync::Arc;

use qwen_model::tokenizer::bpe::BpeTokenizer;
use qwen_model::Session;
use qwen_tensor::{ComputeBackend, CpuBackend};

/// Opaque context handle that owns the backend, session, and tokenizer.
///
/// `session` and `tokenizer` are `None` until `qwen_model_load` succeeds;
/// every other entry point checks both before touching them.
pub struct QwenContext {
    pub backend: Arc<dyn ComputeBackend>,
    pub session: Option<Session>,
    pub tokenizer: Option<BpeTokenizer>,
}

impl Default for QwenContext {
    fn default() -> Self {
        Self::new()
    }
}

impl QwenContext {
    pub fn new() -> Self {
        Self {
            backend: Arc::new(CpuBackend::new()),
            session: None,
            tokenizer: None,
        }
    }
}
