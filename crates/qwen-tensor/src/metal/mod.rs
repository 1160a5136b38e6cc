// Metal GPU compute backend (macOS only).
//
// TODO: Implement Metal backend using objc2/objc2-metal bindings.
// This will include:
// - Metal device/command queue setup
// - Compute pipeline compilation from .metal shader sources
// - GPU buffer management
// - Metal implementations of ComputeBackend trait methods

/// Placeholder Metal backend struct.
///
/// Will be implemented in a future phase to accelerate inference on Apple Silicon.
#[cfg(feature = "metal")]
#[derive(Debug)]
pub struct MetalBackend {
    // TODO: Add Metal device, command queue, pipeline state fields
}

#[cfg(feature = "metal")]
impl MetalBackend {
    /// Create a new Metal backend.
    ///
    /// TODO: Initialize Metal device, create command queue, compile shaders.
    pub fn new() -> Option<Self> {
        // TODO: Attempt to create a Metal device and return None if unavailable
        None
    }
}
