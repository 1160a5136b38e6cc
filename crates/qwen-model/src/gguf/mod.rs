pub mod header;
pub mod metadata;
pub mod tensor_info;
pub mod reader;

pub use header::{GgufHeader, GGUF_DEFAULT_ALIGNMENT, GGUF_MAGIC};
pub use metadata::{GgufMetadata, GgufMetadataValue};
pub use tensor_info::GgufTensorInfo;
pub use reader::GgufFile;
