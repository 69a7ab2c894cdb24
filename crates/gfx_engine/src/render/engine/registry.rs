//! Resource registry
//!
//! Maps frontend handles to backend objects for every resource kind and owns
//! their memory. Buffer and texture data reach device-local memory through a
//! temporary host-visible staging buffer and a synchronous one-shot copy.

use ash::vk;
use std::collections::HashMap;
use std::ffi::CString;

use crate::render::backends::device::{BufferAllocation, GpuDevice, ImageAllocation, LayoutTransition, ShaderStageInfo};
use crate::render::commands::{IndexType, ShaderStage};
use crate::render::engine::program::{Program, ProgramStage};
use crate::render::engine::reflection::{reflect_words, spirv_words, ShaderReflection};
use crate::render::error::{RenderError, RenderResult, VulkanResult};
use crate::render::handle::{
    FrameBufferHandle, IndexBufferHandle, ProgramHandle, ResourceKind, ShaderHandle, TextureHandle, VertexBufferHandle,
};
use crate::render::vertex_layout::{VertexInputDescription, VertexLayout};

/// Format of every 2D texture
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

/// A device-local vertex buffer
#[derive(Debug)]
pub struct VertexBuffer {
    /// Buffer and memory
    pub allocation: BufferAllocation,
    /// Layout of one vertex
    pub layout: VertexLayout,
    /// Vulkan vertex input derived from `layout`
    pub input: VertexInputDescription,
}

/// A device-local index buffer
#[derive(Debug)]
pub struct IndexBuffer {
    /// Buffer and memory
    pub allocation: BufferAllocation,
    /// Index width
    pub index_type: IndexType,
}

/// A compiled and reflected shader stage
#[derive(Debug)]
pub struct Shader {
    /// Shader module
    pub module: vk::ShaderModule,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// Entry point name
    pub entry_point: CString,
    /// Reflected resources
    pub reflection: ShaderReflection,
}

/// A sampled 2D texture
#[derive(Debug)]
pub struct Texture {
    /// Image and memory
    pub image: ImageAllocation,
}

/// An offscreen framebuffer registration
///
/// Offscreen rendering is not implemented; only the handle lifecycle is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Colour attachments
    pub textures: Vec<TextureHandle>,
}

/// Handle to backend object maps for every resource kind
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    vertex_buffers: HashMap<VertexBufferHandle, VertexBuffer>,
    index_buffers: HashMap<IndexBufferHandle, IndexBuffer>,
    shaders: HashMap<ShaderHandle, Shader>,
    programs: HashMap<ProgramHandle, Program>,
    textures: HashMap<TextureHandle, Texture>,
    frame_buffers: HashMap<FrameBufferHandle, FrameBuffer>,
}

fn ensure_vacant<K: std::hash::Hash + Eq, V>(map: &HashMap<K, V>, key: &K, kind: ResourceKind, raw: u32) -> RenderResult<()> {
    if map.contains_key(key) {
        return Err(RenderError::DuplicateHandle { kind, handle: raw });
    }
    Ok(())
}

/// Upload bytes into a new device-local buffer through a staging buffer
fn upload_via_staging<D: GpuDevice>(
    device: &mut D,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> RenderResult<BufferAllocation> {
    if data.is_empty() {
        return Err(RenderError::InvalidDescription("buffer data is empty".to_string()));
    }
    let size = data.len() as vk::DeviceSize;

    let staging = device.create_buffer(
        size,
        vk::BufferUsageFlags::TRANSFER_SRC,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;
    let result = transfer_from_staging(device, &staging, data, usage);
    device.destroy_buffer(staging);
    Ok(result?)
}

fn transfer_from_staging<D: GpuDevice>(
    device: &mut D,
    staging: &BufferAllocation,
    data: &[u8],
    usage: vk::BufferUsageFlags,
) -> VulkanResult<BufferAllocation> {
    device.write_buffer(staging, 0, data)?;
    let destination = device.create_buffer(
        staging.size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    if let Err(err) = device.copy_buffer(staging.buffer, destination.buffer, staging.size) {
        device.destroy_buffer(destination);
        return Err(err);
    }
    Ok(destination)
}

fn upload_texture<D: GpuDevice>(device: &mut D, staging: &BufferAllocation, image: &ImageAllocation, data: &[u8]) -> RenderResult<()> {
    device.write_buffer(staging, 0, data)?;
    let to_transfer = LayoutTransition::between(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)?;
    device.transition_image_layout(image.image, &to_transfer)?;
    device.copy_buffer_to_image(staging.buffer, image.image, image.extent)?;
    let to_shader = LayoutTransition::between(
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    )?;
    device.transition_image_layout(image.image, &to_shader)?;
    Ok(())
}

impl ResourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    // --- vertex buffers ---

    /// Upload a vertex buffer
    pub fn create_vertex_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: VertexBufferHandle,
        data: &[u8],
        layout: VertexLayout,
    ) -> RenderResult<()> {
        ensure_vacant(&self.vertex_buffers, &handle, handle.kind(), handle.raw())?;
        let input = layout.vulkan_input()?;
        let allocation = upload_via_staging(device, data, vk::BufferUsageFlags::VERTEX_BUFFER)?;
        log::debug!("[REGISTRY] Created {handle}: {} bytes, stride {}", data.len(), layout.stride());
        self.vertex_buffers.insert(handle, VertexBuffer { allocation, layout, input });
        Ok(())
    }

    /// Look up a vertex buffer
    pub fn vertex_buffer(&self, handle: VertexBufferHandle) -> RenderResult<&VertexBuffer> {
        self.vertex_buffers
            .get(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release a vertex buffer
    pub fn delete_vertex_buffer<D: GpuDevice>(&mut self, device: &mut D, handle: VertexBufferHandle) -> RenderResult<()> {
        let buffer = self
            .vertex_buffers
            .remove(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))?;
        device.destroy_buffer(buffer.allocation);
        log::debug!("[REGISTRY] Deleted {handle}");
        Ok(())
    }

    // --- index buffers ---

    /// Upload an index buffer
    pub fn create_index_buffer<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: IndexBufferHandle,
        data: &[u8],
        index_type: IndexType,
    ) -> RenderResult<()> {
        ensure_vacant(&self.index_buffers, &handle, handle.kind(), handle.raw())?;
        let allocation = upload_via_staging(device, data, vk::BufferUsageFlags::INDEX_BUFFER)?;
        log::debug!("[REGISTRY] Created {handle}: {} bytes of {index_type:?}", data.len());
        self.index_buffers.insert(handle, IndexBuffer { allocation, index_type });
        Ok(())
    }

    /// Look up an index buffer
    pub fn index_buffer(&self, handle: IndexBufferHandle) -> RenderResult<&IndexBuffer> {
        self.index_buffers
            .get(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release an index buffer
    pub fn delete_index_buffer<D: GpuDevice>(&mut self, device: &mut D, handle: IndexBufferHandle) -> RenderResult<()> {
        let buffer = self
            .index_buffers
            .remove(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))?;
        device.destroy_buffer(buffer.allocation);
        log::debug!("[REGISTRY] Deleted {handle}");
        Ok(())
    }

    // --- shaders ---

    /// Create and reflect a shader module
    pub fn create_shader<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: ShaderHandle,
        stage: ShaderStage,
        entry_point: &str,
        data: &[u8],
    ) -> RenderResult<()> {
        ensure_vacant(&self.shaders, &handle, handle.kind(), handle.raw())?;
        let entry_point = CString::new(entry_point)
            .map_err(|_| RenderError::InvalidDescription(format!("entry point of {handle} contains NUL")))?;
        let words = spirv_words(data)?;
        let reflection = reflect_words(&words)?;
        let module = device.create_shader_module(&words)?;

        log::debug!(
            "[REGISTRY] Created {handle} ({stage:?}): {} uniform blocks, {} bindings",
            reflection.uniform_blocks.len(),
            reflection.bindings.len()
        );
        self.shaders.insert(
            handle,
            Shader {
                module,
                stage,
                entry_point,
                reflection,
            },
        );
        Ok(())
    }

    /// Look up a shader
    pub fn shader(&self, handle: ShaderHandle) -> RenderResult<&Shader> {
        self.shaders.get(&handle).ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release a shader module
    pub fn delete_shader<D: GpuDevice>(&mut self, device: &mut D, handle: ShaderHandle) -> RenderResult<()> {
        let shader = self
            .shaders
            .remove(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))?;
        device.destroy_shader_module(shader.module);
        log::debug!("[REGISTRY] Deleted {handle}");
        Ok(())
    }

    // --- programs ---

    /// Register an empty program
    pub fn create_program(&mut self, handle: ProgramHandle) -> RenderResult<()> {
        ensure_vacant(&self.programs, &handle, handle.kind(), handle.raw())?;
        self.programs.insert(handle, Program::new(handle));
        Ok(())
    }

    /// Attach a registered shader to a program
    pub fn attach_shader(&mut self, handle: ProgramHandle, shader_handle: ShaderHandle) -> RenderResult<()> {
        let shader = self
            .shaders
            .get(&shader_handle)
            .ok_or(RenderError::missing(shader_handle.kind(), shader_handle.raw()))?;
        let stage = ProgramStage {
            shader: shader_handle,
            stage: shader.stage,
            info: ShaderStageInfo {
                stage: shader.stage.to_vulkan(),
                module: shader.module,
                entry_point: shader.entry_point.clone(),
            },
            reflection: shader.reflection.clone(),
        };
        self.program_mut(handle)?.attach(stage);
        Ok(())
    }

    /// Link a program
    pub fn link_program<D: GpuDevice>(&mut self, device: &mut D, handle: ProgramHandle, replicas: usize) -> RenderResult<()> {
        self.program_mut(handle)?.link(device, replicas)
    }

    /// Look up a program
    pub fn program(&self, handle: ProgramHandle) -> RenderResult<&Program> {
        self.programs.get(&handle).ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Look up a program mutably
    pub fn program_mut(&mut self, handle: ProgramHandle) -> RenderResult<&mut Program> {
        self.programs
            .get_mut(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release a program's uniform buffers and set layout
    pub fn delete_program<D: GpuDevice>(&mut self, device: &mut D, handle: ProgramHandle) -> RenderResult<()> {
        let program = self
            .programs
            .remove(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))?;
        program.destroy(device);
        log::debug!("[REGISTRY] Deleted {handle}");
        Ok(())
    }

    /// Check that every stage of a program still has the module it was attached with
    pub fn validate_program_shaders(&self, program: &Program) -> RenderResult<()> {
        for stage in program.stages() {
            if self.shader(stage.shader)?.module != stage.info.module {
                return Err(RenderError::StaleShader {
                    program: program.handle().raw(),
                    shader: stage.shader.raw(),
                });
            }
        }
        Ok(())
    }

    // --- textures ---

    /// Upload an RGBA8 texture and leave it ready for sampling
    pub fn create_texture_2d<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: TextureHandle,
        width: u32,
        height: u32,
        data: &[u8],
    ) -> RenderResult<()> {
        ensure_vacant(&self.textures, &handle, handle.kind(), handle.raw())?;
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 || data.len() as u64 != expected {
            return Err(RenderError::InvalidDescription(format!(
                "{handle}: {width}x{height} RGBA8 needs {expected} bytes, got {}",
                data.len()
            )));
        }

        let staging = device.create_buffer(
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        let image = match device.create_image(vk::Extent2D { width, height }, TEXTURE_FORMAT) {
            Ok(image) => image,
            Err(err) => {
                device.destroy_buffer(staging);
                return Err(err.into());
            }
        };

        let result = upload_texture(device, &staging, &image, data);
        device.destroy_buffer(staging);
        if let Err(err) = result {
            device.destroy_image(image);
            return Err(err);
        }

        log::debug!("[REGISTRY] Created {handle}: {width}x{height}");
        self.textures.insert(handle, Texture { image });
        Ok(())
    }

    /// Look up a texture
    pub fn texture(&self, handle: TextureHandle) -> RenderResult<&Texture> {
        self.textures.get(&handle).ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release a texture
    pub fn delete_texture<D: GpuDevice>(&mut self, device: &mut D, handle: TextureHandle) -> RenderResult<()> {
        let texture = self
            .textures
            .remove(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))?;
        device.destroy_image(texture.image);
        log::debug!("[REGISTRY] Deleted {handle}");
        Ok(())
    }

    // --- framebuffers ---

    /// Register an offscreen framebuffer
    pub fn create_frame_buffer(
        &mut self,
        handle: FrameBufferHandle,
        width: u32,
        height: u32,
        textures: Vec<TextureHandle>,
    ) -> RenderResult<()> {
        ensure_vacant(&self.frame_buffers, &handle, handle.kind(), handle.raw())?;
        for texture in &textures {
            self.texture(*texture)?;
        }
        self.frame_buffers.insert(handle, FrameBuffer { width, height, textures });
        Ok(())
    }

    /// Look up a framebuffer
    pub fn frame_buffer(&self, handle: FrameBufferHandle) -> RenderResult<&FrameBuffer> {
        self.frame_buffers
            .get(&handle)
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release a framebuffer registration
    pub fn delete_frame_buffer(&mut self, handle: FrameBufferHandle) -> RenderResult<()> {
        self.frame_buffers
            .remove(&handle)
            .map(|_| ())
            .ok_or(RenderError::missing(handle.kind(), handle.raw()))
    }

    /// Release everything, programs before the shaders they were built from
    pub fn destroy_all<D: GpuDevice>(&mut self, device: &mut D) {
        for (_, program) in self.programs.drain() {
            program.destroy(device);
        }
        for (_, shader) in self.shaders.drain() {
            device.destroy_shader_module(shader.module);
        }
        for (_, buffer) in self.vertex_buffers.drain() {
            device.destroy_buffer(buffer.allocation);
        }
        for (_, buffer) in self.index_buffers.drain() {
            device.destroy_buffer(buffer.allocation);
        }
        for (_, texture) in self.textures.drain() {
            device.destroy_image(texture.image);
        }
        self.frame_buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::mock::{DeviceCall, MockDevice};
    use crate::render::engine::spirv_fixtures::{Member, ShaderFixture};
    use crate::render::vertex_layout::{AttributeType, VertexAttribute};

    fn layout() -> VertexLayout {
        VertexLayout::new().add(VertexAttribute::Position, AttributeType::Float, 3, false)
    }

    #[test]
    fn test_vertex_buffer_lifecycle() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let handle = VertexBufferHandle::new(3);
        let data: Vec<u8> = (0..36).collect();

        registry.create_vertex_buffer(&mut device, handle, &data, layout()).unwrap();
        let buffer = registry.vertex_buffer(handle).unwrap().allocation.buffer;
        assert_eq!(device.buffer_contents(buffer), data.as_slice());
        // Only the device-local buffer survives the upload
        assert_eq!(device.live_memory_count(), 1);

        registry.delete_vertex_buffer(&mut device, handle).unwrap();
        assert!(matches!(
            registry.vertex_buffer(handle),
            Err(RenderError::MissingHandle { kind: ResourceKind::VertexBuffer, handle: 3 })
        ));
        assert!(registry.delete_vertex_buffer(&mut device, handle).is_err());
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_duplicate_create_is_rejected() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let handle = IndexBufferHandle::new(1);
        registry.create_index_buffer(&mut device, handle, &[0, 0, 1, 0, 2, 0], IndexType::U16).unwrap();
        let result = registry.create_index_buffer(&mut device, handle, &[0, 0], IndexType::U16);
        assert!(matches!(result, Err(RenderError::DuplicateHandle { .. })));
        assert_eq!(device.live_memory_count(), 1);
    }

    #[test]
    fn test_empty_buffer_is_rejected() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let result = registry.create_vertex_buffer(&mut device, VertexBufferHandle::new(1), &[], layout());
        assert!(matches!(result, Err(RenderError::InvalidDescription(_))));
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_texture_upload_sequence() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let handle = TextureHandle::new(5);
        registry.create_texture_2d(&mut device, handle, 2, 2, &[255; 16]).unwrap();

        let image = registry.texture(handle).unwrap().image.image;
        let steps = device.calls_matching(|call| {
            matches!(call, DeviceCall::TransitionImage { .. } | DeviceCall::CopyBufferToImage { .. })
        });
        assert_eq!(steps.len(), 3);
        assert_eq!(
            steps[0],
            DeviceCall::TransitionImage {
                image,
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::TRANSFER_DST_OPTIMAL
            }
        );
        assert!(matches!(steps[1], DeviceCall::CopyBufferToImage { .. }));
        assert_eq!(
            steps[2],
            DeviceCall::TransitionImage {
                image,
                old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                new: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL
            }
        );

        registry.delete_texture(&mut device, handle).unwrap();
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_texture_size_mismatch() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let result = registry.create_texture_2d(&mut device, TextureHandle::new(1), 4, 4, &[0; 8]);
        assert!(matches!(result, Err(RenderError::InvalidDescription(_))));
    }

    #[test]
    fn test_attach_requires_registered_shader() {
        let mut registry = ResourceRegistry::new();
        registry.create_program(ProgramHandle::new(1)).unwrap();
        let result = registry.attach_shader(ProgramHandle::new(1), ShaderHandle::new(8));
        assert!(matches!(result, Err(RenderError::MissingHandle { kind: ResourceKind::Shader, handle: 8 })));
    }

    #[test]
    fn test_recreated_shader_is_stale_for_attached_program() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let spirv = ShaderFixture::new().build();
        let program = ProgramHandle::new(1);
        let shader = ShaderHandle::new(1);
        registry
            .create_shader(&mut device, shader, ShaderStage::Vertex, "main", &spirv)
            .unwrap();
        registry.create_program(program).unwrap();
        registry.attach_shader(program, shader).unwrap();
        registry
            .validate_program_shaders(registry.program(program).unwrap())
            .unwrap();

        registry.delete_shader(&mut device, shader).unwrap();
        registry
            .create_shader(&mut device, shader, ShaderStage::Vertex, "main", &spirv)
            .unwrap();
        let result = registry.validate_program_shaders(registry.program(program).unwrap());
        assert!(matches!(result, Err(RenderError::StaleShader { program: 1, shader: 1 })));

        registry.delete_shader(&mut device, shader).unwrap();
        let result = registry.validate_program_shaders(registry.program(program).unwrap());
        assert!(matches!(result, Err(RenderError::MissingHandle { kind: ResourceKind::Shader, handle: 1 })));
    }

    #[test]
    fn test_shader_rejects_garbage() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let result = registry.create_shader(&mut device, ShaderHandle::new(1), ShaderStage::Vertex, "main", &[1, 2, 3, 4]);
        assert!(matches!(result, Err(RenderError::Reflection(_))));
        assert_eq!(device.live_object_count(), 0);
    }

    #[test]
    fn test_destroy_all_releases_programs_and_shaders() {
        let mut device = MockDevice::new();
        let mut registry = ResourceRegistry::new();
        let spirv = ShaderFixture::new().uniform_block(0, "U", &[("a", Member::Float, 0)]).build();
        registry
            .create_shader(&mut device, ShaderHandle::new(1), ShaderStage::Vertex, "main", &spirv)
            .unwrap();
        registry.create_program(ProgramHandle::new(1)).unwrap();
        registry.attach_shader(ProgramHandle::new(1), ShaderHandle::new(1)).unwrap();
        registry.link_program(&mut device, ProgramHandle::new(1), 2).unwrap();
        registry.create_frame_buffer(FrameBufferHandle::new(1), 64, 64, Vec::new()).unwrap();

        registry.destroy_all(&mut device);
        assert_eq!(device.live_object_count(), 0);
        assert!(registry.frame_buffer(FrameBufferHandle::new(1)).is_err());
    }
}
