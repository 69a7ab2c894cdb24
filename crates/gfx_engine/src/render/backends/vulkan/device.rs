//! [`GpuDevice`] over `ash`
//!
//! Owns the Vulkan context, the swapchain, one primary command buffer per
//! swapchain image, a transient pool for one-shot transfers, and the shared
//! descriptor pool.

use ash::vk;

use crate::core::config::{PresentModePreference, RendererConfig};
use crate::render::backends::device::{
    BufferAllocation, FrameSubmission, GpuDevice, ImageAllocation, LayoutTransition, PipelineDescription,
    RenderPassBegin, RenderPassKind, UniformBufferWrite,
};
use crate::render::backends::vulkan::context::VulkanContext;
use crate::render::backends::vulkan::swapchain::Swapchain;
use crate::render::backends::vulkan::window::Window;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::frame::RenderState;

const COLOUR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Back-face culling when requested, none otherwise
pub fn cull_mode(state: RenderState) -> vk::CullModeFlags {
    if state.contains(RenderState::CULL_BACK) {
        vk::CullModeFlags::BACK
    } else {
        vk::CullModeFlags::NONE
    }
}

/// Colour attachment blend state for a set of render state flags
pub fn colour_blend_attachment(state: RenderState) -> vk::PipelineColorBlendAttachmentState {
    let write_mask = if state.contains(RenderState::COLOUR_WRITE) {
        vk::ColorComponentFlags::RGBA
    } else {
        vk::ColorComponentFlags::empty()
    };

    if state.contains(RenderState::ALPHA_BLEND) {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(write_mask)
            .blend_enable(true)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    } else {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(write_mask)
            .blend_enable(false)
            .build()
    }
}

fn pool_sizes(config: &RendererConfig) -> [vk::DescriptorPoolSize; 4] {
    let pool = &config.descriptor_pool;
    [
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: pool.uniform_buffers,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: pool.combined_image_samplers,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count: pool.sampled_images,
        },
        vk::DescriptorPoolSize {
            ty: vk::DescriptorType::SAMPLER,
            descriptor_count: pool.samplers,
        },
    ]
}

/// Vulkan implementation of [`GpuDevice`]
pub struct VulkanDevice {
    swapchain: Swapchain,
    present_mode: PresentModePreference,
    frame_pool: vk::CommandPool,
    command_buffers: Vec<vk::CommandBuffer>,
    transfer_pool: vk::CommandPool,
    descriptor_pool: vk::DescriptorPool,
    context: VulkanContext,
}

impl VulkanDevice {
    /// Bring up Vulkan for a window
    pub fn new(window: &mut Window, config: &RendererConfig) -> VulkanResult<Self> {
        let context = VulkanContext::new(window, &config.application_name, config.validation_enabled())?;
        let (width, height) = window.framebuffer_size();
        let swapchain = Swapchain::new(
            &context,
            vk::Extent2D { width, height },
            config.present_mode,
            vk::SwapchainKHR::null(),
        )?;

        // Drop releases whatever was created if a later step fails
        let mut device = Self {
            swapchain,
            present_mode: config.present_mode,
            frame_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            transfer_pool: vk::CommandPool::null(),
            descriptor_pool: vk::DescriptorPool::null(),
            context,
        };

        let family = device.context.physical.graphics_family;
        device.frame_pool = device.create_command_pool(family, vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)?;
        device.transfer_pool = device.create_command_pool(family, vk::CommandPoolCreateFlags::TRANSIENT)?;
        device.command_buffers = device.allocate_frame_command_buffers(device.swapchain.image_count())?;

        let sizes = pool_sizes(config);
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(config.descriptor_pool.max_sets)
            .pool_sizes(&sizes);
        // SAFETY: the device is alive and pool_info borrows locals
        device.descriptor_pool =
            unsafe { device.context.raw().create_descriptor_pool(&pool_info, None) }.map_err(VulkanError::Api)?;

        log::info!(
            "[VULKAN] Device ready: {} swapchain images, descriptor pool of {} sets",
            device.swapchain.image_count(),
            config.descriptor_pool.max_sets
        );
        Ok(device)
    }

    fn create_command_pool(&self, family: u32, flags: vk::CommandPoolCreateFlags) -> VulkanResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family)
            .flags(flags);
        // SAFETY: the device is alive
        unsafe { self.context.raw().create_command_pool(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn allocate_frame_command_buffers(&self, count: usize) -> VulkanResult<Vec<vk::CommandBuffer>> {
        let count = u32::try_from(count).map_err(|_| VulkanError::InvalidOperation {
            reason: format!("{count} command buffers requested"),
        })?;
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.frame_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        // SAFETY: the pool belongs to this device
        unsafe { self.context.raw().allocate_command_buffers(&alloc_info) }.map_err(VulkanError::Api)
    }

    /// Record, submit and wait for a single-use command buffer
    fn one_shot(&self, record: impl FnOnce(&ash::Device, vk::CommandBuffer)) -> VulkanResult<()> {
        let device = self.context.raw();
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.transfer_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        // SAFETY: the pool belongs to this device
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::Api)?
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY))?;

        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        let command_buffers = [command_buffer];
        let submit = vk::SubmitInfo::builder().command_buffers(&command_buffers).build();

        // SAFETY: the command buffer is freshly allocated and only used here
        let result = unsafe {
            device
                .begin_command_buffer(command_buffer, &begin_info)
                .and_then(|()| {
                    record(device, command_buffer);
                    device.end_command_buffer(command_buffer)
                })
                .and_then(|()| device.queue_submit(self.context.device.graphics_queue, &[submit], vk::Fence::null()))
                .and_then(|()| device.queue_wait_idle(self.context.device.graphics_queue))
        };
        // SAFETY: the queue is idle, so the command buffer is no longer in use
        unsafe { device.free_command_buffers(self.transfer_pool, &command_buffers) };
        result.map_err(VulkanError::Api)
    }

    fn allocate_memory(
        &self,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<vk::DeviceMemory> {
        let memory_type = self
            .context
            .physical
            .find_memory_type(requirements.memory_type_bits, properties)?;
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);
        // SAFETY: the device is alive
        unsafe { self.context.raw().allocate_memory(&alloc_info, None) }.map_err(VulkanError::Api)
    }
}

impl GpuDevice for VulkanDevice {
    fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> VulkanResult<BufferAllocation> {
        let device = self.context.raw();
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        // SAFETY: the device is alive
        let buffer = unsafe { device.create_buffer(&create_info, None) }.map_err(VulkanError::Api)?;
        // SAFETY: buffer was just created on this device
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

        let memory = match self.allocate_memory(requirements, properties) {
            Ok(memory) => memory,
            Err(err) => {
                // SAFETY: the buffer is unused
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(err);
            }
        };
        // SAFETY: memory was allocated against the buffer's requirements
        if let Err(err) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
            // SAFETY: neither object is in use
            unsafe {
                device.destroy_buffer(buffer, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(err));
        }

        Ok(BufferAllocation { buffer, memory, size })
    }

    fn destroy_buffer(&mut self, allocation: BufferAllocation) {
        let device = self.context.raw();
        // SAFETY: the engine waits for idle before deleting resources
        unsafe {
            device.destroy_buffer(allocation.buffer, None);
            device.free_memory(allocation.memory, None);
        }
    }

    fn write_buffer(&mut self, allocation: &BufferAllocation, offset: vk::DeviceSize, data: &[u8]) -> VulkanResult<()> {
        if offset + data.len() as vk::DeviceSize > allocation.size {
            return Err(VulkanError::InvalidOperation {
                reason: format!("write of {} bytes at {offset} overflows a {} byte buffer", data.len(), allocation.size),
            });
        }
        let device = self.context.raw();
        // SAFETY: the memory is host-visible and coherent, the range was checked above,
        // and no other mapping of it exists
        unsafe {
            let mapped = device
                .map_memory(
                    allocation.memory,
                    offset,
                    data.len() as vk::DeviceSize,
                    vk::MemoryMapFlags::empty(),
                )
                .map_err(VulkanError::Api)?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            device.unmap_memory(allocation.memory);
        }
        Ok(())
    }

    fn copy_buffer(&mut self, src: vk::Buffer, dst: vk::Buffer, size: vk::DeviceSize) -> VulkanResult<()> {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        // SAFETY: both buffers are alive for the duration of the wait
        self.one_shot(|device, command_buffer| unsafe {
            device.cmd_copy_buffer(command_buffer, src, dst, &[region]);
        })
    }

    fn create_image(&mut self, extent: vk::Extent2D, format: vk::Format) -> VulkanResult<ImageAllocation> {
        let device = self.context.raw();
        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        // SAFETY: the device is alive
        let image = unsafe { device.create_image(&create_info, None) }.map_err(VulkanError::Api)?;
        // SAFETY: image was just created on this device
        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let memory = match self.allocate_memory(requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL) {
            Ok(memory) => memory,
            Err(err) => {
                // SAFETY: the image is unused
                unsafe { device.destroy_image(image, None) };
                return Err(err);
            }
        };
        // SAFETY: memory was allocated against the image's requirements
        if let Err(err) = unsafe { device.bind_image_memory(image, memory, 0) } {
            // SAFETY: neither object is in use
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(VulkanError::Api(err));
        }

        Ok(ImageAllocation {
            image,
            memory,
            extent,
            format,
        })
    }

    fn destroy_image(&mut self, allocation: ImageAllocation) {
        let device = self.context.raw();
        // SAFETY: the engine waits for idle before deleting resources
        unsafe {
            device.destroy_image(allocation.image, None);
            device.free_memory(allocation.memory, None);
        }
    }

    fn transition_image_layout(&mut self, image: vk::Image, transition: &LayoutTransition) -> VulkanResult<()> {
        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(transition.old_layout)
            .new_layout(transition.new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(COLOUR_RANGE)
            .src_access_mask(transition.src_access)
            .dst_access_mask(transition.dst_access)
            .build();
        let (src_stage, dst_stage) = (transition.src_stage, transition.dst_stage);
        // SAFETY: the image is alive for the duration of the wait
        self.one_shot(|device, command_buffer| unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                src_stage,
                dst_stage,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        })
    }

    fn copy_buffer_to_image(&mut self, src: vk::Buffer, image: vk::Image, extent: vk::Extent2D) -> VulkanResult<()> {
        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: 0,
                base_array_layer: 0,
                layer_count: 1,
            })
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .build();
        // SAFETY: buffer and image are alive for the duration of the wait
        self.one_shot(|device, command_buffer| unsafe {
            device.cmd_copy_buffer_to_image(
                command_buffer,
                src,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        })
    }

    fn create_shader_module(&mut self, code: &[u32]) -> VulkanResult<vk::ShaderModule> {
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        // SAFETY: code is a word slice that outlives the call
        unsafe { self.context.raw().create_shader_module(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_shader_module(&mut self, module: vk::ShaderModule) {
        // SAFETY: pipelines built from the module keep their own copy of the code
        unsafe { self.context.raw().destroy_shader_module(module, None) };
    }

    fn create_descriptor_set_layout(
        &mut self,
        bindings: &[vk::DescriptorSetLayoutBinding],
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(bindings);
        // SAFETY: bindings outlive the call
        unsafe { self.context.raw().create_descriptor_set_layout(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_descriptor_set_layout(&mut self, layout: vk::DescriptorSetLayout) {
        // SAFETY: the caller released every set and pipeline layout using it
        unsafe { self.context.raw().destroy_descriptor_set_layout(layout, None) };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layout: vk::DescriptorSetLayout,
        push_constants: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let set_layouts = [set_layout];
        let create_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(push_constants);
        // SAFETY: arrays outlive the call
        unsafe { self.context.raw().create_pipeline_layout(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn create_graphics_pipeline(&mut self, description: &PipelineDescription<'_>) -> VulkanResult<vk::Pipeline> {
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = description
            .stages
            .iter()
            .map(|stage| {
                vk::PipelineShaderStageCreateInfo::builder()
                    .stage(stage.stage)
                    .module(stage.module)
                    .name(&stage.entry_point)
                    .build()
            })
            .collect();

        let bindings = [description.vertex_input.binding];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&description.vertex_input.attributes);
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(description.topology)
            .primitive_restart_enable(false);

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode(description.state))
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);
        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [colour_blend_attachment(description.state)];
        let colour_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&blend_attachments);

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&colour_blending)
            .dynamic_state(&dynamic_state)
            .layout(description.layout)
            .render_pass(description.render_pass)
            .subpass(0)
            .build();

        // SAFETY: every state struct borrows locals or `description`, all alive here
        let pipelines = unsafe {
            self.context
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
        }
        .map_err(|(_, err)| VulkanError::Api(err))?;
        pipelines
            .into_iter()
            .next()
            .ok_or(VulkanError::Api(vk::Result::ERROR_INITIALIZATION_FAILED))
    }

    fn destroy_pipeline(&mut self, pipeline: vk::Pipeline) {
        // SAFETY: the engine waits for idle before evicting pipelines
        unsafe { self.context.raw().destroy_pipeline(pipeline, None) };
    }

    fn destroy_pipeline_layout(&mut self, layout: vk::PipelineLayout) {
        // SAFETY: pipelines using the layout are destroyed first
        unsafe { self.context.raw().destroy_pipeline_layout(layout, None) };
    }

    fn allocate_descriptor_sets(
        &mut self,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> VulkanResult<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(self.descriptor_pool)
            .set_layouts(&layouts);
        // SAFETY: layout and pool belong to this device
        unsafe { self.context.raw().allocate_descriptor_sets(&alloc_info) }.map_err(VulkanError::Api)
    }

    fn free_descriptor_sets(&mut self, sets: &[vk::DescriptorSet]) -> VulkanResult<()> {
        // SAFETY: the pool was created with FREE_DESCRIPTOR_SET and the sets are idle
        unsafe { self.context.raw().free_descriptor_sets(self.descriptor_pool, sets) }.map_err(VulkanError::Api)
    }

    fn update_descriptor_sets(&mut self, writes: &[UniformBufferWrite]) {
        let buffer_infos: Vec<[vk::DescriptorBufferInfo; 1]> = writes
            .iter()
            .map(|write| {
                [vk::DescriptorBufferInfo {
                    buffer: write.buffer,
                    offset: 0,
                    range: write.range,
                }]
            })
            .collect();
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .zip(&buffer_infos)
            .map(|(write, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(write.set)
                    .dst_binding(write.binding)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                    .buffer_info(info)
                    .build()
            })
            .collect();
        // SAFETY: buffer_infos outlives the call
        unsafe { self.context.raw().update_descriptor_sets(&vk_writes, &[]) };
    }

    fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn render_pass(&self, kind: RenderPassKind) -> vk::RenderPass {
        self.swapchain.render_pass(kind)
    }

    fn backbuffer(&self, image_index: u32) -> vk::Framebuffer {
        self.swapchain.framebuffer(image_index)
    }

    fn command_buffer(&self, image_index: u32) -> vk::CommandBuffer {
        self.command_buffers
            .get(image_index as usize)
            .copied()
            .unwrap_or_else(vk::CommandBuffer::null)
    }

    fn acquire_next_image(&mut self, signal: vk::Semaphore) -> VulkanResult<u32> {
        // SAFETY: the semaphore is unsignalled and owned by the caller's frame slot
        let (image_index, suboptimal) = unsafe {
            self.context.device.swapchain_loader.acquire_next_image(
                self.swapchain.handle(),
                u64::MAX,
                signal,
                vk::Fence::null(),
            )
        }
        .map_err(VulkanError::Api)?;
        if suboptimal {
            log::debug!("[SWAPCHAIN] Acquired image {image_index} from a suboptimal swapchain");
        }
        Ok(image_index)
    }

    fn present(&mut self, image_index: u32, wait: vk::Semaphore) -> VulkanResult<()> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain.handle()];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        // SAFETY: arrays outlive the call; the image was acquired by this frame
        let suboptimal = unsafe {
            self.context
                .device
                .swapchain_loader
                .queue_present(self.context.device.present_queue, &present_info)
        }
        .map_err(VulkanError::Api)?;
        if suboptimal {
            log::debug!("[SWAPCHAIN] Presented to a suboptimal swapchain");
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> VulkanResult<()> {
        // SAFETY: the device is alive
        unsafe { self.context.raw().device_wait_idle() }.map_err(VulkanError::Api)?;

        let replacement = Swapchain::new(&self.context, extent, self.present_mode, self.swapchain.handle())?;
        let mut retired = std::mem::replace(&mut self.swapchain, replacement);
        retired.destroy(&self.context);
        log::info!(
            "[SWAPCHAIN] Recreated at {}x{} with {} images",
            extent.width,
            extent.height,
            self.swapchain.image_count()
        );

        if self.command_buffers.len() != self.swapchain.image_count() {
            // SAFETY: the device is idle
            unsafe {
                self.context
                    .raw()
                    .free_command_buffers(self.frame_pool, &self.command_buffers);
            }
            self.command_buffers = self.allocate_frame_command_buffers(self.swapchain.image_count())?;
        }
        Ok(())
    }

    fn create_semaphore(&mut self) -> VulkanResult<vk::Semaphore> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        // SAFETY: the device is alive
        unsafe { self.context.raw().create_semaphore(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_semaphore(&mut self, semaphore: vk::Semaphore) {
        // SAFETY: the engine waits for idle before tearing down frame slots
        unsafe { self.context.raw().destroy_semaphore(semaphore, None) };
    }

    fn create_fence(&mut self, signaled: bool) -> VulkanResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::builder().flags(flags);
        // SAFETY: the device is alive
        unsafe { self.context.raw().create_fence(&create_info, None) }.map_err(VulkanError::Api)
    }

    fn destroy_fence(&mut self, fence: vk::Fence) {
        // SAFETY: the engine waits for idle before tearing down frame slots
        unsafe { self.context.raw().destroy_fence(fence, None) };
    }

    fn wait_for_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        // SAFETY: the fence belongs to this device
        unsafe { self.context.raw().wait_for_fences(&[fence], true, u64::MAX) }.map_err(VulkanError::Api)
    }

    fn reset_fence(&mut self, fence: vk::Fence) -> VulkanResult<()> {
        // SAFETY: the fence is signalled, so no submission references it
        unsafe { self.context.raw().reset_fences(&[fence]) }.map_err(VulkanError::Api)
    }

    fn submit(&mut self, submission: &FrameSubmission) -> VulkanResult<()> {
        let wait_semaphores = [submission.wait_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [submission.command_buffer];
        let signal_semaphores = [submission.signal_semaphore];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();
        // SAFETY: arrays outlive the call; the fence was reset by the scheduler
        unsafe {
            self.context
                .raw()
                .queue_submit(self.context.device.graphics_queue, &[submit_info], submission.fence)
        }
        .map_err(VulkanError::Api)
    }

    fn wait_idle(&mut self) -> VulkanResult<()> {
        // SAFETY: the device is alive
        unsafe { self.context.raw().device_wait_idle() }.map_err(VulkanError::Api)
    }

    fn begin_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        let device = self.context.raw();
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        // SAFETY: the image's previous submission has completed (its fence was waited on)
        unsafe {
            device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::empty())
                .and_then(|()| device.begin_command_buffer(command_buffer, &begin_info))
        }
        .map_err(VulkanError::Api)
    }

    fn end_command_buffer(&mut self, command_buffer: vk::CommandBuffer) -> VulkanResult<()> {
        // SAFETY: the command buffer is recording
        unsafe { self.context.raw().end_command_buffer(command_buffer) }.map_err(VulkanError::Api)
    }

    fn cmd_begin_render_pass(&mut self, command_buffer: vk::CommandBuffer, begin: &RenderPassBegin<'_>) {
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(begin.render_pass)
            .framebuffer(begin.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D::default(),
                extent: begin.extent,
            })
            .clear_values(begin.clear_values);
        // SAFETY: the command buffer is recording outside a render pass
        unsafe {
            self.context
                .raw()
                .cmd_begin_render_pass(command_buffer, &begin_info, vk::SubpassContents::INLINE);
        }
    }

    fn cmd_end_render_pass(&mut self, command_buffer: vk::CommandBuffer) {
        // SAFETY: a render pass is active
        unsafe { self.context.raw().cmd_end_render_pass(command_buffer) };
    }

    fn cmd_set_viewport(&mut self, command_buffer: vk::CommandBuffer, extent: vk::Extent2D) {
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent,
        };
        // SAFETY: the command buffer is recording
        unsafe {
            let device = self.context.raw();
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
        }
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.context
                .raw()
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set: vk::DescriptorSet,
    ) {
        // SAFETY: the command buffer is recording and the set matches the layout
        unsafe {
            self.context.raw().cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[set],
                &[],
            );
        }
    }

    fn cmd_push_constants(
        &mut self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        stages: vk::ShaderStageFlags,
        data: &[u8],
    ) {
        // SAFETY: the range was declared in the pipeline layout
        unsafe { self.context.raw().cmd_push_constants(command_buffer, layout, stages, 0, data) };
    }

    fn cmd_bind_vertex_buffer(&mut self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer, offset: vk::DeviceSize) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.context
                .raw()
                .cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[offset]);
        }
    }

    fn cmd_bind_index_buffer(
        &mut self,
        command_buffer: vk::CommandBuffer,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        index_type: vk::IndexType,
    ) {
        // SAFETY: the command buffer is recording
        unsafe {
            self.context
                .raw()
                .cmd_bind_index_buffer(command_buffer, buffer, offset, index_type);
        }
    }

    fn cmd_draw(&mut self, command_buffer: vk::CommandBuffer, vertex_count: u32) {
        // SAFETY: a pipeline is bound inside an active render pass
        unsafe { self.context.raw().cmd_draw(command_buffer, vertex_count, 1, 0, 0) };
    }

    fn cmd_draw_indexed(&mut self, command_buffer: vk::CommandBuffer, index_count: u32) {
        // SAFETY: a pipeline and index buffer are bound inside an active render pass
        unsafe { self.context.raw().cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0) };
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        // SAFETY: the device is idled before anything it owns is destroyed
        unsafe {
            let device = self.context.raw();
            let _ = device.device_wait_idle();
            if self.descriptor_pool != vk::DescriptorPool::null() {
                device.destroy_descriptor_pool(self.descriptor_pool, None);
            }
            if self.transfer_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.transfer_pool, None);
            }
            if self.frame_pool != vk::CommandPool::null() {
                device.destroy_command_pool(self.frame_pool, None);
            }
        }
        self.swapchain.destroy(&self.context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colour_write_controls_mask() {
        let opaque = colour_blend_attachment(RenderState::COLOUR_WRITE);
        assert_eq!(opaque.color_write_mask, vk::ColorComponentFlags::RGBA);
        assert_eq!(opaque.blend_enable, vk::FALSE);

        let masked = colour_blend_attachment(RenderState::empty());
        assert_eq!(masked.color_write_mask, vk::ColorComponentFlags::empty());
    }

    #[test]
    fn test_alpha_blend_uses_source_alpha() {
        let blended = colour_blend_attachment(RenderState::COLOUR_WRITE | RenderState::ALPHA_BLEND);
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(blended.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn test_cull_back_flag() {
        assert_eq!(cull_mode(RenderState::CULL_BACK), vk::CullModeFlags::BACK);
        assert_eq!(cull_mode(RenderState::COLOUR_WRITE), vk::CullModeFlags::NONE);
    }

    #[test]
    fn test_pool_sizes_follow_config() {
        let config = RendererConfig::default();
        let sizes = pool_sizes(&config);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, config.descriptor_pool.uniform_buffers);
        assert_eq!(sizes[3].descriptor_count, config.descriptor_pool.samplers);
    }
}
