//! Error types for the rendering backend

use ash::vk;
use thiserror::Error;

use crate::render::backends::vulkan::window::WindowError;
use crate::render::engine::reflection::ReflectionError;
use crate::render::engine::scheduler::FrameState;
use crate::render::handle::ResourceKind;
use crate::render::vertex_layout::AttributeType;

/// Errors raised by GPU device operations
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Errors raised by the command execution engine
///
/// Variants other than [`RenderError::Vulkan`] and [`RenderError::Window`] are
/// contract violations by the caller (or unimplemented features) and should be
/// treated as fatal.
#[derive(Error, Debug)]
pub enum RenderError {
    /// Device level failure
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// Window system failure
    #[error(transparent)]
    Window(#[from] WindowError),

    /// Shader binary could not be reflected
    #[error("Shader reflection failed: {0}")]
    Reflection(#[from] ReflectionError),

    /// A command referenced a handle that is not registered
    #[error("No {kind} registered for handle {handle}")]
    MissingHandle {
        /// Kind of resource looked up
        kind: ResourceKind,
        /// Raw handle value
        handle: u32,
    },

    /// A create command reused a handle that is still registered
    #[error("A {kind} is already registered for handle {handle}")]
    DuplicateHandle {
        /// Kind of resource created
        kind: ResourceKind,
        /// Raw handle value
        handle: u32,
    },

    /// A program was drawn with before being linked
    #[error("Program {0} has not been linked")]
    ProgramNotLinked(u32),

    /// A program was linked a second time
    #[error("Program {0} is already linked")]
    ProgramAlreadyLinked(u32),

    /// A program stage holds a module that was destroyed since it was attached
    #[error("Program {program} refers to shader {shader}, which was recreated after attach")]
    StaleShader {
        /// Raw program handle
        program: u32,
        /// Raw shader handle
        shader: u32,
    },

    /// Vertex attribute encoding with no Vulkan format
    #[error("Unsupported vertex attribute: {count} x {attribute_type:?} (normalised: {normalised})")]
    UnsupportedVertexFormat {
        /// Component type
        attribute_type: AttributeType,
        /// Component count
        count: u8,
        /// Normalisation flag
        normalised: bool,
    },

    /// Image layout transition outside the supported table
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Source layout
        from: vk::ImageLayout,
        /// Destination layout
        to: vk::ImageLayout,
    },

    /// The preallocated descriptor pool ran out of sets or descriptors
    #[error("Descriptor pool exhausted")]
    DescriptorPoolExhausted,

    /// A command carried malformed data
    #[error("Invalid resource description: {0}")]
    InvalidDescription(String),

    /// A frame step was issued out of order
    #[error("Frame step requires state {expected:?}, but the frame is {actual:?}")]
    InvalidFrameState {
        /// State the step requires
        expected: FrameState,
        /// State the scheduler is in
        actual: FrameState,
    },

    /// Swapchain recreation produced a different image count
    #[error("Swapchain image count changed from {previous} to {current}")]
    SwapchainImageCountChanged {
        /// Image count the engine was built for
        previous: usize,
        /// Image count after recreation
        current: usize,
    },

    /// The renderer has no window or device yet
    #[error("Renderer is not initialized")]
    NotInitialized,

    /// Feature not implemented by this backend
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),
}

impl RenderError {
    /// Build a missing-handle error for any resource handle
    pub const fn missing(kind: ResourceKind, handle: u32) -> Self {
        Self::MissingHandle { kind, handle }
    }

    /// Whether the swapchain no longer matches the surface and must be rebuilt
    pub const fn is_surface_out_of_date(&self) -> bool {
        matches!(self, Self::Vulkan(VulkanError::Api(vk::Result::ERROR_OUT_OF_DATE_KHR)))
    }
}

/// Result type for engine operations
pub type RenderResult<T> = Result<T, RenderError>;
