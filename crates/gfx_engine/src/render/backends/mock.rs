//! Recording device for engine tests
//!
//! Hands out fake handles, keeps host-visible memory in `Vec<u8>`s, executes
//! buffer copies, and logs every call so tests can assert on ordering.

use ash::vk::{self, Handle};
use std::collections::{HashMap, HashSet};

use crate::render::backends::device::{
    BufferAllocation, FrameSubmission, GpuDevice, ImageAllocation, LayoutTransition, PipelineDescription,
    RenderPassBegin, RenderPassKind, UniformBufferWrite,
};
use crate::render::error::{VulkanError, VulkanResult};

/// A call observed by the mock device
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCall {
    CopyBuffer { src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize },
    TransitionImage { image: vk::Image, old: vk::ImageLayout, new: vk::ImageLayout },
    CopyBufferToImage { src: vk::Buffer, image: vk::Image },
    CreatePipeline { pipeline: vk::Pipeline, state: crate::render::frame::RenderState },
    UpdateDescriptors(Vec<UniformBufferWrite>),
    Acquire { signal: vk::Semaphore, image_index: u32 },
    Present { image_index: u32, wait: vk::Semaphore },
    WaitFence { fence: vk::Fence, was_signaled: bool },
    ResetFence(vk::Fence),
    Submit(FrameSubmission),
    WaitIdle,
    RecreateSwapchain(vk::Extent2D),
    BeginCommandBuffer(vk::CommandBuffer),
    EndCommandBuffer(vk::CommandBuffer),
    BeginRenderPass { render_pass: vk::RenderPass, framebuffer: vk::Framebuffer, clear_values: Vec<[f32; 4]> },
    EndRenderPass,
    SetViewport(vk::Extent2D),
    BindPipeline(vk::Pipeline),
    BindDescriptorSet { layout: vk::PipelineLayout, set: vk::DescriptorSet },
    PushConstants { stages: vk::ShaderStageFlags, data: Vec<u8> },
    BindVertexBuffer { buffer: vk::Buffer, offset: vk::DeviceSize },
    BindIndexBuffer { buffer: vk::Buffer, offset: vk::DeviceSize, index_type: vk::IndexType },
    Draw(u32),
    DrawIndexed(u32),
}

#[derive(Debug)]
struct MockMemory {
    bytes: Vec<u8>,
    host_visible: bool,
}

/// In-memory [`GpuDevice`]
#[derive(Debug)]
pub struct MockDevice {
    next_handle: u64,
    pub calls: Vec<DeviceCall>,
    memories: HashMap<vk::DeviceMemory, MockMemory>,
    buffers: HashMap<vk::Buffer, vk::DeviceMemory>,
    images: HashSet<vk::Image>,
    shader_modules: HashSet<vk::ShaderModule>,
    set_layouts: HashSet<vk::DescriptorSetLayout>,
    pipeline_layouts: HashSet<vk::PipelineLayout>,
    pipelines: HashSet<vk::Pipeline>,
    descriptor_sets: HashSet<vk::DescriptorSet>,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashSet<vk::Semaphore>,
    descriptor_capacity: usize,
    pipelines_created: usize,
    image_count: usize,
    extent: vk::Extent2D,
    next_image: usize,
    render_passes: [vk::RenderPass; 2],
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
}

impl MockDevice {
    /// Device with three swapchain images and a roomy descriptor pool
    pub fn new() -> Self {
        Self::with_images(3)
    }

    /// Device with a specific swapchain image count
    pub fn with_images(image_count: usize) -> Self {
        let mut device = Self {
            next_handle: 0x1000,
            calls: Vec::new(),
            memories: HashMap::new(),
            buffers: HashMap::new(),
            images: HashSet::new(),
            shader_modules: HashSet::new(),
            set_layouts: HashSet::new(),
            pipeline_layouts: HashSet::new(),
            pipelines: HashSet::new(),
            descriptor_sets: HashSet::new(),
            fences: HashMap::new(),
            semaphores: HashSet::new(),
            descriptor_capacity: 1024,
            pipelines_created: 0,
            image_count,
            extent: vk::Extent2D { width: 800, height: 600 },
            next_image: 0,
            render_passes: [vk::RenderPass::null(); 2],
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        };
        let clear_pass = vk::RenderPass::from_raw(device.next());
        let load_pass = vk::RenderPass::from_raw(device.next());
        device.render_passes = [clear_pass, load_pass];
        let framebuffers: Vec<_> = (0..image_count).map(|_| vk::Framebuffer::from_raw(device.next())).collect();
        let command_buffers: Vec<_> = (0..image_count).map(|_| vk::CommandBuffer::from_raw(device.next())).collect();
        device.framebuffers = framebuffers;
        device.command_buffers = command_buffers;
        device
    }

    /// Limit the number of descriptor sets the pool can hand out
    pub fn with_descriptor_capacity(mut self, capacity: usize) -> Self {
        self.descriptor_capacity = capacity;
        self
    }

    /// Simulate a surface that comes back with a different image count
    pub fn set_image_count(&mut self, image_count: usize) {
        let framebuffers: Vec<_> = (0..image_count).map(|_| vk::Framebuffer::from_raw(self.next())).collect();
        let command_buffers: Vec<_> = (0..image_count).map(|_| vk::CommandBuffer::from_raw(self.next())).collect();
        self.framebuffers = framebuffers;
        self.command_buffers = command_buffers;
        self.image_count = image_count;
        self.next_image = 0;
    }

    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    /// Number of graphics pipelines ever created
    pub const fn pipelines_created(&self) -> usize {
        self.pipelines_created
    }

    /// Number of device memory allocations still alive
    pub fn live_memory_count(&self) -> usize {
        self.memories.len()
    }

    /// Number of device objects of any kind still alive
    pub fn live_object_count(&self) -> usize {
        self.memories.len()
            + self.buffers.len()
            + self.images.len()
            + self.shader_modules.len()
            + self.set_layouts.len()
            + self.pipeline_layouts.len()
            + self.pipelines.len()
            + self.descriptor_sets.len()
            + self.fences.len()
            + self.semaphores.len()
    }

    /// Bytes currently stored in a buffer's memory
    pub fn buffer_contents(&self, buffer: vk::Buffer) -> &[u8] {
        let memory = self.buffers[&buffer];
        &self.memories[&memory].bytes
    }

    /// Whether a buffer is still alive
    pub fn buffer_alive(&self, buffer: vk::Buffer) -> bool {
        self.buffers.contains_key(&buffer)
    }

    /// The render pass handle handed out for a kind
    pub fn render_pass_handle(&self, kind: RenderPassKind) -> vk::RenderPass {
        self.render_pass(kind)
    }

    /// Index of the first call matching a predicate
    pub fn position(&self, predicate: impl Fn(&DeviceCall) -> bool) -> Option<usize> {
        self.calls.iter().position(predicate)
    }

    /// Calls matching a predicate
    pub fn calls_matching(&self, predicate: impl Fn(&DeviceCall) -> bool) -> Vec<DeviceCall> {
        self.calls.iter().filter(|call| predicate(call)).cloned().collect()
    }
}

impl Default for MockDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for MockDevice {
    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation> {
        let buffer = vk::Buffer::from_raw(self.next());
        let memory = vk::DeviceMemory::from_raw(self.next());
        let len = usize::try_from(size).map_err(|_| VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;
        self.memories.insert(
            memory,
            MockMemory {
                bytes: vec![0; len],
                host_visible: properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
            },
        );
        self.buffers.insert(buffer, memory);
        Ok(BufferAllocation { buffer, memory, size })
    }

    fn destroy_buffer(&mut self, allocation: BufferAllocation) {
        assert!(self.buffers.remove(&allocation.buffer).is_some(), "buffer destroyed twice");
        assert!(self.memories.remove(&allocation.memory).is_some(), "memory freed twice");
    }

    fn write_buffer(&mut self, allocation: &BufferAllocation, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        let memory = self
            .memories
            .get_mut(&allocation.memory)
            .ok_or(VulkanError::Api(vk::Result::ERROR_MEMORY_MAP_FAILED))?;
        if !memory.host_visible {
            return Err(VulkanError::InvalidOperation {
                reason: "mapping device-local memory".to_string(),
            });
        }
        let start = offset as usize;
        memory.bytes[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        let len = size as usize;
        let bytes = self.buffer_contents(src)[..len].to_vec();
        let dst_memory = self.buffers[&dst];
        self.memories
            .get_mut(&dst_memory)
            .ok_or(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))?
            .bytes[..len]
            .copy_from_slice(&bytes);
        self.calls.push(DeviceCall::CopyBuffer { src, dst, size });
        Ok(())
    }

    fn create_image(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<ImageAllocation> {
        let image = vk::Image::from_raw(self.next());
        let memory = vk::DeviceMemory::from_raw(self.next());
        self.images.insert(image);
        self.memories.insert(
            memory,
            MockMemory {
                bytes: Vec::new(),
                host_visible: false,
            },
        );
        Ok(ImageAllocation {
            image,
            memory,
            extent,
            format,
        })
    }

    fn destroy_image(&mut self, allocation: ImageAllocation) {
        assert!(self.images.remove(&allocation.image), "image destroyed twice");
        assert!(self.memories.remove(&allocation.memory).is_some(), "memory freed twice");
    }

    fn transition_image_layout(&mut self, image: vk::Image, transition: &LayoutTransition) -> VulkanResult<()> {
        self.calls.push(DeviceCall::TransitionImage {
            image,
            old: transition.old_layout,
            new: transition.new_layout,
        });
        Ok(())
    }

    fn copy_buffer_to_image(&mut self, src: vk::Buffer, image: vk::Image, _extent: vk::Extent2D) -> VulkanResult<()> {
        self.calls.push(DeviceCall::CopyBufferToImage { src, image });
        Ok(())
    }

    fn create_shader_module(&mut self, _code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let module = vk::ShaderModule::from_raw(self.next());
        self.shader_modules.insert(module);
        Ok(module)
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        assert!(self.shader_modules.remove(&module), "shader module destroyed twice");
    }

    fn create_descriptor_set_layout(
        &mut self,
        _bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let layout = vk::DescriptorSetLayout::from_raw(self.next());
        self.set_layouts.insert(layout);
        Ok(layout)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        assert!(self.set_layouts.remove(&layout), "set layout destroyed twice");
    }

    fn create_pipeline_layout(
        &mut self,
        _set_layout: vk::DescriptorSetLayout,
        _push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let layout = vk::PipelineLayout::from_raw(self.next());
        self.pipeline_layouts.insert(layout);
        Ok(layout)
    }

    fn create_graphics_pipeline(&mut self, description: &PipelineDescription<'_>) -> VulkanResult<vk::Pipeline> {
        let pipeline = vk::Pipeline::from_raw(self.next());
        self.pipelines.insert(pipeline);
        self.pipelines_created += 1;
        self.calls.push(DeviceCall::CreatePipeline {
            pipeline,
            state: description.state,
        });
        Ok(pipeline)
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        assert!(self.pipelines.remove(&pipeline), "pipeline destroyed twice");
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        assert!(self.pipeline_layouts.remove(&layout), "pipeline layout destroyed twice");
    }

    fn allocate_descriptor_sets(
        &mut self,
        _layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        if self.descriptor_sets.len() + count > self.descriptor_capacity {
            return Err(VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY));
        }
        let sets: Vec<_> = (0..count).map(|_| vk::DescriptorSet::from_raw(self.next())).collect();
        self.descriptor_sets.extend(sets.iter().copied());
        Ok(sets)
    }

    fn free_descriptor_sets(&mut self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        for set in sets {
            assert!(self.descriptor_sets.remove(set), "descriptor set freed twice");
        }
        Ok(())
    }

    fn update_descriptor_sets(&mut self, writes: &[UniformBufferWrite]) {
        self.calls.push(DeviceCall::UpdateDescriptors(writes.to_vec()));
    }

    fn swapchain_image_count(&self) -> usize {
        self.image_count
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.extent
    }

    fn render_pass(&self, kind: RenderPassKind) -> vk::RenderPass {
        match kind {
            RenderPassKind::Clear => self.render_passes[0],
            RenderPassKind::Load => self.render_passes[1],
        }
    }

    fn backbuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.framebuffers[image_index as usize]
    }

    fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.command_buffers[image_index as usize]
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VulkanResult<u32> {
        let image_index = u32::try_from(self.next_image).map_err(|_| VulkanError::Api(vk::Result::ERROR_UNKNOWN))?;
        self.next_image = (self.next_image + 1) % self.image_count;
        self.calls.push(DeviceCall::Acquire { signal, image_index });
        Ok(image_index)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<()> {
        self.calls.push(DeviceCall::Present { image_index, wait });
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        self.extent = extent;
        self.next_image = 0;
        self.calls.push(DeviceCall::RecreateSwapchain(extent));
        Ok(())
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        let semaphore = vk::Semaphore::from_raw(self.next());
        self.semaphores.insert(semaphore);
        Ok(semaphore)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        assert!(self.semaphores.remove(&semaphore), "semaphore destroyed twice");
    }

    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        let fence = vk::Fence::from_raw(self.next());
        self.fences.insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        assert!(self.fences.remove(&fence).is_some(), "fence destroyed twice");
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        let state = self
            .fences
            .get_mut(&fence)
            .ok_or(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))?;
        let was_signaled = *state;
        // The simulated GPU finishes the fenced work while the host blocks
        *state = true;
        self.calls.push(DeviceCall::WaitFence { fence, was_signaled });
        Ok(())
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        let state = self
            .fences
            .get_mut(&fence)
            .ok_or(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST))?;
        *state = false;
        self.calls.push(DeviceCall::ResetFence(fence));
        Ok(())
    }

    fn submit(&mut self, submission: &FrameSubmission) -> VulkanResult<()> {
        if self.fences.get(&submission.fence).copied().unwrap_or(true) {
            return Err(VulkanError::InvalidOperation {
                reason: "submitting with a signalled fence".to_string(),
            });
        }
        self.calls.push(DeviceCall::Submit(*submission));
        Ok(())
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        for signaled in self.fences.values_mut() {
            *signaled = true;
        }
        self.calls.push(DeviceCall::WaitIdle);
        Ok(())
    }

    fn begin_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.calls.push(DeviceCall::BeginCommandBuffer(command_buffer));
        Ok(())
    }

    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        self.calls.push(DeviceCall::EndCommandBuffer(command_buffer));
        Ok(())
    }

    fn cmd_begin_render_pass(&mut self, _command_buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        // SAFETY: every clear value variant fits inside the 16-byte colour view
        let clear_values = begin.clear_values.iter().map(|value| unsafe { value.color.float32 }).collect();
        self.calls.push(DeviceCall::BeginRenderPass {
            render_pass: begin.render_pass,
            framebuffer: begin.framebuffer,
            clear_values,
        });
    }

    fn cmd_end_render_pass(&mut self, _command_buffer: vk::CommandBuffer) {
        self.calls.push(DeviceCall::EndRenderPass);
    }

    fn cmd_set_viewport(&mut self, _command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        self.calls.push(DeviceCall::SetViewport(extent));
    }

    fn cmd_bind_pipeline(&mut self, _command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.calls.push(DeviceCall::BindPipeline(pipeline));
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        _command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        self.calls.push(DeviceCall::BindDescriptorSet { layout, set });
    }

    fn cmd_push_constants(
        &mut self,
        _command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        self.calls.push(DeviceCall::PushConstants {
            stages,
            data: data.to_vec(),
        });
    }

    fn cmd_bind_vertex_buffer(&mut self, _command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        self.calls.push(DeviceCall::BindVertexBuffer { buffer, offset });
    }

    fn cmd_bind_index_buffer(
        &mut self,
        _command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        self.calls.push(DeviceCall::BindIndexBuffer {
            buffer,
            offset,
            index_type,
        });
    }

    fn cmd_draw(&mut self, _command_buffer: vk::CommandBuffer, vertex_count: u32) {
        self.calls.push(DeviceCall::Draw(vertex_count));
    }

    fn cmd_draw_indexed(&mut self, _command_buffer: vk::CommandBuffer, index_count: u32) {
        self.calls.push(DeviceCall::DrawIndexed(index_count));
    }
}
