//! GPU device abstraction used by the command execution engine
//!
//! [`GpuDevice`] is the only way the engine talks to the GPU. It is written in
//! terms of raw `ash::vk` handles so the Vulkan implementation is a thin
//! forwarding layer, while tests can substitute a recording device.

use ash::vk;
use std::ffi::CString;

use crate::render::error::{RenderError, RenderResult, VulkanResult};
use crate::render::frame::RenderState;
use crate::render::vertex_layout::VertexInputDescription;

/// A buffer together with its dedicated memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    /// Buffer handle
    pub buffer: vk::Buffer,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// Size in bytes
    pub size: vk::DeviceSize,
}

/// A 2D image together with its dedicated memory allocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocation {
    /// Image handle
    pub image: vk::Image,
    /// Backing memory
    pub memory: vk::DeviceMemory,
    /// Image size
    pub extent: vk::Extent2D,
    /// Texel format
    pub format: vk::Format,
}

/// One shader stage of a graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderStageInfo {
    /// Stage flag
    pub stage: vk::ShaderStageFlags,
    /// Compiled module
    pub module: vk::ShaderModule,
    /// Entry point name
    pub entry_point: CString,
}

/// Everything needed to build a graphics pipeline
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescription<'a> {
    /// Shader stages in attach order
    pub stages: &'a [ShaderStageInfo],
    /// Vertex input state
    pub vertex_input: &'a VertexInputDescription,
    /// Input assembly topology
    pub topology: vk::PrimitiveTopology,
    /// Rasterizer and blend toggles
    pub state: RenderState,
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
}

/// Load behaviour of the backbuffer render pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderPassKind {
    /// Clear the attachment when the pass begins
    Clear,
    /// Keep the attachment contents from the previous pass
    Load,
}

/// Parameters of `vkCmdBeginRenderPass`
#[derive(Clone, Copy)]
pub struct RenderPassBegin<'a> {
    /// Render pass
    pub render_pass: vk::RenderPass,
    /// Target framebuffer
    pub framebuffer: vk::Framebuffer,
    /// Render area
    pub extent: vk::Extent2D,
    /// Clear values by attachment order
    pub clear_values: &'a [vk::ClearValue],
}

/// A uniform buffer descriptor write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformBufferWrite {
    /// Destination set
    pub set: vk::DescriptorSet,
    /// Destination binding
    pub binding: u32,
    /// Buffer to bind
    pub buffer: vk::Buffer,
    /// Bound range in bytes
    pub range: vk::DeviceSize,
}

/// Synchronization scopes of an image layout transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    /// Layout before the barrier
    pub old_layout: vk::ImageLayout,
    /// Layout after the barrier
    pub new_layout: vk::ImageLayout,
    /// Accesses made available
    pub src_access: vk::AccessFlags,
    /// Accesses made visible
    pub dst_access: vk::AccessFlags,
    /// Stages waited on
    pub src_stage: vk::PipelineStageFlags,
    /// Stages blocked
    pub dst_stage: vk::PipelineStageFlags,
}

impl LayoutTransition {
    /// Barrier scopes for a supported layout pair
    ///
    /// Only the two transitions of a texture upload are supported.
    pub fn between(old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> RenderResult<Self> {
        let (src_access, dst_access, src_stage, dst_stage) = match (old_layout, new_layout) {
            (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => (
                vk::AccessFlags::empty(),
                vk::AccessFlags::TRANSFER_WRITE,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::TRANSFER,
            ),
            (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => (
                vk::AccessFlags::TRANSFER_WRITE,
                vk::AccessFlags::SHADER_READ,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
            ),
            (from, to) => return Err(RenderError::UnsupportedLayoutTransition { from, to }),
        };

        Ok(Self {
            old_layout,
            new_layout,
            src_access,
            dst_access,
            src_stage,
            dst_stage,
        })
    }
}

/// Submission of one frame's command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    /// Recorded command buffer
    pub command_buffer: vk::CommandBuffer,
    /// Semaphore signalled by image acquisition
    pub wait_semaphore: vk::Semaphore,
    /// Semaphore signalled when rendering completes
    pub signal_semaphore: vk::Semaphore,
    /// Fence signalled when rendering completes
    pub fence: vk::Fence,
}

/// The GPU operations the engine depends on
///
/// Transfer helpers (`copy_buffer`, `copy_buffer_to_image`,
/// `transition_image_layout`) record a one-shot command buffer, submit it and
/// wait for completion before returning.
pub trait GpuDevice {
    // --- memory ---

    /// Create a buffer with dedicated memory of the given properties
    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation>;

    /// Destroy a buffer and free its memory
    fn destroy_buffer(&mut self, allocation: BufferAllocation);

    /// Map, write and unmap host-visible buffer memory
    fn write_buffer(&mut self, allocation: &BufferAllocation, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()>;

    /// Copy `size` bytes between buffers and wait for completion
    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()>;

    /// Create a sampled, transfer-destination 2D image
    fn create_image(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<ImageAllocation>;

    /// Destroy an image and free its memory
    fn destroy_image(&mut self, allocation: ImageAllocation);

    /// Apply a layout transition barrier and wait for completion
    fn transition_image_layout(&mut self, image: vk::Image, transition: &LayoutTransition) -> VulkanResult<()>;

    /// Copy tightly packed texels from a buffer into an image and wait
    fn copy_buffer_to_image(&mut self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) -> VulkanResult<()>;

    // --- shaders and pipelines ---

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule>;

    /// Destroy a shader module
    fn destroy_shader_module(&mut self, module: vk::ShaderModule);

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout>;

    /// Destroy a descriptor set layout
    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout);

    /// Create a pipeline layout over one descriptor set layout
    fn create_pipeline_layout(
        &mut self,
        set_layout: vk::DescriptorSetLayout,
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout>;

    /// Create a graphics pipeline with dynamic viewport and scissor
    fn create_graphics_pipeline(&mut self, description: &PipelineDescription<'_>) -> VulkanResult<vk::Pipeline>;

    /// Destroy a graphics pipeline
    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline);

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout);

    // --- descriptors ---

    /// Allocate `count` sets of one layout from the shared pool
    fn allocate_descriptor_sets(
        &mut self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>>;

    /// Return sets to the shared pool
    fn free_descriptor_sets(&mut self, sets: &[vk::DescriptorSet]) -> VulkanResult<()>;

    /// Point uniform buffer bindings at buffers
    fn update_descriptor_sets(&mut self, writes: &[UniformBufferWrite]);

    // --- presentation ---

    /// Number of swapchain images
    fn swapchain_image_count(&self) -> usize;

    /// Current swapchain extent
    fn swapchain_extent(&self) -> vk::Extent2D;

    /// Backbuffer render pass of the given kind
    fn render_pass(&self, kind: RenderPassKind) -> vk::RenderPass;

    /// Framebuffer of a swapchain image
    fn backbuffer(&self, image_index: u32) -> vk::Framebuffer;

    /// Primary command buffer dedicated to a swapchain image
    fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer;

    /// Acquire the next presentable image, signalling `signal` when ready
    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VulkanResult<u32>;

    /// Queue an image for presentation once `wait` is signalled
    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<()>;

    /// Rebuild the swapchain and its framebuffers for a new extent
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()>;

    // --- synchronization ---

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore>;

    /// Destroy a semaphore
    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore);

    /// Create a fence, optionally already signalled
    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence>;

    /// Destroy a fence
    fn destroy_fence(&mut self, fence: vk::Fence);

    /// Block until a fence is signalled
    fn wait_for_fence(&mut self, fence: vk::Fence) -> VulkanResult<()>;

    /// Return a fence to the unsignalled state
    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()>;

    /// Submit a frame's command buffer to the graphics queue
    fn submit(&mut self, submission: &FrameSubmission) -> VulkanResult<()>;

    /// Block until the device has finished all work
    fn wait_idle(&mut self) -> VulkanResult<()>;

    // --- command recording ---

    /// Begin a one-time-submit recording
    fn begin_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Finish recording
    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()>;

    /// Begin a render pass with inline contents
    fn cmd_begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>);

    /// End the current render pass
    fn cmd_end_render_pass(&mut self, command_buffer: vk::CommandBuffer);

    /// Set the dynamic viewport and scissor to cover `extent`
    fn cmd_set_viewport(&mut self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D);

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Bind a descriptor set at set 0
    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    );

    /// Update push constants from offset 0
    fn cmd_push_constants(
        &mut self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    );

    /// Bind a vertex buffer at binding 0
    fn cmd_bind_vertex_buffer(&mut self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize);

    /// Bind an index buffer
    fn cmd_bind_index_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    );

    /// Non-indexed draw of a single instance
    fn cmd_draw(&mut self, command_buffer: vk::CommandBuffer, vertex_count: u32);

    /// Indexed draw of a single instance
    fn cmd_draw_indexed(&mut self, command_buffer: vk::CommandBuffer, index_count: u32);
}
