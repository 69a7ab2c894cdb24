//! Command execution engine
//!
//! [`RenderEngine`] owns the resource registry, both caches and the frame
//! scheduler. It applies command lists in order and turns each [`Frame`] into
//! one recorded, submitted and presented command buffer.

pub mod descriptor_cache;
pub mod pipeline_cache;
pub mod program;
pub mod reflection;
pub mod registry;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod spirv_fixtures;

use ash::vk;

use crate::core::config::RendererConfig;
use crate::render::backends::device::{GpuDevice, RenderPassBegin, RenderPassKind};
use crate::render::commands::RenderCommand;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame::{Frame, RenderItem};
use crate::render::render_thread::FrameExecutor;

use descriptor_cache::DescriptorSetCache;
use pipeline_cache::{PipelineCache, PipelineKey};
use registry::ResourceRegistry;
use scheduler::FrameScheduler;

/// Render pass used by the queue at `index`
pub const fn render_pass_kind(index: usize, has_clear: bool) -> RenderPassKind {
    if index == 0 || has_clear {
        RenderPassKind::Clear
    } else {
        RenderPassKind::Load
    }
}

/// Executes render commands and frames against a [`GpuDevice`]
pub struct RenderEngine<D: GpuDevice> {
    device: D,
    registry: ResourceRegistry,
    pipelines: PipelineCache,
    descriptor_sets: DescriptorSetCache,
    scheduler: FrameScheduler,
    image_count: usize,
    shut_down: bool,
}

impl<D: GpuDevice> RenderEngine<D> {
    /// Take ownership of a device and create the frame slots
    pub fn new(mut device: D, config: &RendererConfig) -> RenderResult<Self> {
        let image_count = device.swapchain_image_count();
        let scheduler = FrameScheduler::new(&mut device, config.frames_in_flight, image_count)?;

        log::info!(
            "[ENGINE] Ready: {} frames in flight, {image_count} swapchain images",
            config.frames_in_flight
        );
        Ok(Self {
            device,
            registry: ResourceRegistry::new(),
            pipelines: PipelineCache::new(),
            descriptor_sets: DescriptorSetCache::new(),
            scheduler,
            image_count,
            shut_down: false,
        })
    }

    /// The underlying device
    pub const fn device(&self) -> &D {
        &self.device
    }

    #[cfg(test)]
    pub(crate) fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Live resources
    pub const fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Cached graphics pipelines
    pub const fn pipeline_cache(&self) -> &PipelineCache {
        &self.pipelines
    }

    /// Cached descriptor sets
    pub const fn descriptor_cache(&self) -> &DescriptorSetCache {
        &self.descriptor_sets
    }

    /// Frame pacing state
    pub const fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    /// Apply a command list in order
    ///
    /// Lists that delete anything first wait for the GPU to go idle, since a
    /// frame still in flight may reference the resource.
    pub fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()> {
        if self.shut_down {
            return Err(RenderError::NotInitialized);
        }
        if commands.iter().any(RenderCommand::is_delete) {
            self.device.wait_idle()?;
        }

        for command in commands {
            let name = command.name();
            self.execute(command).map_err(|err| {
                log::error!("[ENGINE] {name} failed: {err}");
                err
            })?;
        }
        Ok(())
    }

    fn execute(&mut self, command: RenderCommand) -> RenderResult<()> {
        match command {
            RenderCommand::CreateVertexBuffer { handle, data, layout } => {
                self.registry.create_vertex_buffer(&mut self.device, handle, &data, layout)
            }
            RenderCommand::UpdateVertexBuffer { handle, .. } => {
                self.registry.vertex_buffer(handle)?;
                Err(RenderError::Unimplemented("vertex buffer updates"))
            }
            RenderCommand::DeleteVertexBuffer { handle } => self.registry.delete_vertex_buffer(&mut self.device, handle),
            RenderCommand::CreateIndexBuffer {
                handle,
                data,
                index_type,
            } => self
                .registry
                .create_index_buffer(&mut self.device, handle, &data, index_type),
            RenderCommand::UpdateIndexBuffer { handle, .. } => {
                self.registry.index_buffer(handle)?;
                Err(RenderError::Unimplemented("index buffer updates"))
            }
            RenderCommand::DeleteIndexBuffer { handle } => self.registry.delete_index_buffer(&mut self.device, handle),
            RenderCommand::CreateShader {
                handle,
                stage,
                entry_point,
                data,
            } => self
                .registry
                .create_shader(&mut self.device, handle, stage, &entry_point, &data),
            RenderCommand::DeleteShader { handle } => self.registry.delete_shader(&mut self.device, handle),
            RenderCommand::CreateProgram { handle } => self.registry.create_program(handle),
            RenderCommand::AttachShader { handle, shader } => self.registry.attach_shader(handle, shader),
            RenderCommand::LinkProgram { handle } => {
                self.registry.link_program(&mut self.device, handle, self.image_count)
            }
            RenderCommand::DeleteProgram { handle } => {
                self.registry.program(handle)?;
                self.pipelines.remove_program(&mut self.device, handle);
                self.descriptor_sets.remove_program(&mut self.device, handle)?;
                self.registry.delete_program(&mut self.device, handle)
            }
            RenderCommand::CreateTexture2D {
                handle,
                width,
                height,
                data,
            } => self
                .registry
                .create_texture_2d(&mut self.device, handle, width, height, &data),
            RenderCommand::DeleteTexture { handle } => self.registry.delete_texture(&mut self.device, handle),
            RenderCommand::CreateFrameBuffer {
                handle,
                width,
                height,
                textures,
            } => self.registry.create_frame_buffer(handle, width, height, textures),
            RenderCommand::DeleteFrameBuffer { handle } => self.registry.delete_frame_buffer(handle),
        }
    }

    /// Record, submit and present one frame
    pub fn frame(&mut self, frame: &Frame) -> RenderResult<()> {
        if self.shut_down {
            return Err(RenderError::NotInitialized);
        }
        self.validate_frame(frame)?;

        let acquired = self.scheduler.acquire(&mut self.device)?;
        let command_buffer = self.device.command_buffer(acquired.image_index);

        if let Err(err) = self.record(frame, acquired.image_index, command_buffer) {
            log::error!("[FRAME] Recording failed: {err}");
            if let Err(release) = self.release_image(acquired.image_index, command_buffer) {
                log::error!("[FRAME] Releasing image {} failed: {release}", acquired.image_index);
                self.scheduler.abort();
            }
            return Err(err);
        }

        self.scheduler.submit(&mut self.device, command_buffer)?;
        self.scheduler.present(&mut self.device)
    }

    /// Reject a frame whose handles cannot be drawn, before an image is acquired
    fn validate_frame(&self, frame: &Frame) -> RenderResult<()> {
        for queue in &frame.render_queues {
            if let Some(handle) = queue.frame_buffer {
                self.registry.frame_buffer(handle)?;
                return Err(RenderError::Unimplemented("rendering to offscreen framebuffers"));
            }

            for item in &queue.items {
                let program = self.registry.program(item.program)?;
                program.linked()?;

                let Some(vertex_handle) = item.vertex_buffer else {
                    continue;
                };
                let vertex_buffer = self.registry.vertex_buffer(vertex_handle)?;
                if let Some(index_handle) = item.index_buffer {
                    self.registry.index_buffer(index_handle)?;
                }

                let key = PipelineKey {
                    state: item.state,
                    topology: item.topology,
                    vertex_layout: vertex_buffer.layout.clone(),
                    program: item.program,
                };
                if !self.pipelines.contains(&key) {
                    self.registry.validate_program_shaders(program)?;
                }
            }
        }
        Ok(())
    }

    /// Present a cleared image after recording failed
    ///
    /// The slot's acquire semaphore is already signalled, so a submission must
    /// wait on it before the slot acquires again.
    fn release_image(&mut self, image_index: u32, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.record(&Frame::new(), image_index, command_buffer)?;
        self.scheduler.submit(&mut self.device, command_buffer)?;
        self.scheduler.present(&mut self.device)
    }

    fn record(&mut self, frame: &Frame, image_index: u32, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        self.device.begin_command_buffer(command_buffer)?;
        let extent = self.device.swapchain_extent();
        let framebuffer = self.device.backbuffer(image_index);

        // An empty frame still clears so the image reaches its present layout
        if frame.render_queues.is_empty() {
            self.begin_pass(command_buffer, RenderPassKind::Clear, framebuffer, extent, Vec::new());
            self.device.cmd_end_render_pass(command_buffer);
        }

        for (index, queue) in frame.render_queues.iter().enumerate() {
            let kind = render_pass_kind(index, queue.clear.is_some());
            let clear_values = queue.clear.map(|clear| clear.clear_values()).unwrap_or_default();
            self.begin_pass(command_buffer, kind, framebuffer, extent, clear_values);

            for item in &queue.items {
                self.record_item(item, image_index as usize, command_buffer)?;
            }
            self.device.cmd_end_render_pass(command_buffer);
        }

        self.device.end_command_buffer(command_buffer)?;
        Ok(())
    }

    fn begin_pass(
        &mut self,
        command_buffer: vk::CommandBuffer,
        kind: RenderPassKind,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        mut clear_values: Vec<vk::ClearValue>,
    ) {
        if kind == RenderPassKind::Clear && clear_values.is_empty() {
            clear_values.push(vk::ClearValue::default());
        }
        if kind == RenderPassKind::Load {
            clear_values.clear();
        }

        let render_pass = self.device.render_pass(kind);
        self.device.cmd_begin_render_pass(
            command_buffer,
            &RenderPassBegin {
                render_pass,
                framebuffer,
                extent,
                clear_values: &clear_values,
            },
        );
        self.device.cmd_set_viewport(command_buffer, extent);
    }

    fn record_item(&mut self, item: &RenderItem, image_index: usize, command_buffer: vk::CommandBuffer) -> RenderResult<()> {
        let linked = self.registry.program_mut(item.program)?.linked_mut()?;
        linked.write_uniforms(&item.uniforms);
        linked.upload_uniforms(&mut self.device, image_index)?;

        let Some(vertex_handle) = item.vertex_buffer else {
            return Ok(());
        };
        let vertex_buffer = self.registry.vertex_buffer(vertex_handle)?;
        let program = self.registry.program(item.program)?;

        let key = PipelineKey {
            state: item.state,
            topology: item.topology,
            vertex_layout: vertex_buffer.layout.clone(),
            program: item.program,
        };
        let pipeline = self
            .pipelines
            .find_or_create(&mut self.device, &key, program, &vertex_buffer.input)?;
        let set = self.descriptor_sets.find_or_create(
            &mut self.device,
            item.program,
            program,
            image_index,
            self.image_count,
        )?;

        self.device.cmd_bind_pipeline(command_buffer, pipeline.pipeline);
        self.device.cmd_bind_descriptor_set(command_buffer, pipeline.layout, set);
        if let Some(push) = &program.linked()?.push_constants {
            self.device
                .cmd_push_constants(command_buffer, pipeline.layout, push.stages, push.data());
        }
        self.device
            .cmd_bind_vertex_buffer(command_buffer, vertex_buffer.allocation.buffer, item.vertex_buffer_offset);

        let count = item.element_count();
        match item.index_buffer {
            Some(index_handle) => {
                let index_buffer = self.registry.index_buffer(index_handle)?;
                self.device.cmd_bind_index_buffer(
                    command_buffer,
                    index_buffer.allocation.buffer,
                    item.index_buffer_offset,
                    index_buffer.index_type.to_vulkan(),
                );
                self.device.cmd_draw_indexed(command_buffer, count);
            }
            None => self.device.cmd_draw(command_buffer, count),
        }
        Ok(())
    }

    /// Rebuild the swapchain for a new surface size
    ///
    /// Pipelines are rebuilt lazily against the new swapchain. Uniform replicas
    /// and descriptor sets are sized per image, so a changed image count is
    /// reported instead of silently reallocated.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RenderResult<()> {
        if self.shut_down {
            return Err(RenderError::NotInitialized);
        }
        self.device.wait_idle()?;
        self.pipelines.clear(&mut self.device);
        self.device.recreate_swapchain(extent)?;

        let current = self.device.swapchain_image_count();
        if current != self.image_count {
            return Err(RenderError::SwapchainImageCountChanged {
                previous: self.image_count,
                current,
            });
        }
        self.scheduler.reset_images(current);
        log::info!("[ENGINE] Swapchain resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Block until the GPU has finished all submitted frames
    pub fn wait_idle(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Err(RenderError::NotInitialized);
        }
        self.device.wait_idle()?;
        Ok(())
    }

    /// Wait for the GPU and release everything the engine created
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.shut_down {
            return Ok(());
        }
        self.shut_down = true;

        self.device.wait_idle()?;
        self.pipelines.clear(&mut self.device);
        self.descriptor_sets.clear(&mut self.device)?;
        self.scheduler.destroy(&mut self.device);
        self.registry.destroy_all(&mut self.device);
        log::info!("[ENGINE] Shut down");
        Ok(())
    }
}

impl<D: GpuDevice> FrameExecutor for RenderEngine<D> {
    fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()> {
        Self::process_command_list(self, commands)
    }

    fn frame(&mut self, frame: &Frame) -> RenderResult<()> {
        Self::frame(self, frame)
    }
}

impl<D: GpuDevice> Drop for RenderEngine<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("[ENGINE] Teardown failed: {err}");
        }
    }
}
