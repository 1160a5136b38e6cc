/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QwenStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorModelLoad = 2,
    ErrorGenerate = 3,
    ErrorOutOfMemory = 4,
    ErrorInternal = 5,
}

/// Compute backend type selector.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum QwenBackendType {
    Cpu = 0,
    Metal = 1,
}

/// Compute element type selector for weights and activations.
///
/// Chosen independently of whatever precision the GGUF checkpoint stores
/// its tensors in -- the loader always dequantizes through f32 first, then
/// narrows to this dtype (see `qwen_model::gguf::reader`).
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub enum QwenDType {
    F32 = 0,
    F16 = 1,
    Bf16 = 2,
}

impl From<QwenDType> for qwen_tensor::DType {
    fn from(value: QwenDType) -> Self {
        match value {
            QwenDType::F32 => qwen_tensor::DType::F32,
            QwenDType::F16 => qwen_tensor::DType::F16,
            QwenDType::Bf16 => qwen_tensor::DType::Bf16,
        }
    }
}

