//! Shader programs and the program linker
//!
//! Linking merges the descriptor bindings of every attached stage into one
//! set layout, allocates replicated uniform buffers for every uniform block,
//! and builds the `"block.member"` address table used to write named uniforms.

use ash::vk;
use std::collections::{BTreeMap, HashMap};

use crate::render::backends::device::{BufferAllocation, GpuDevice, ShaderStageInfo};
use crate::render::commands::ShaderStage;
use crate::render::engine::reflection::{DescriptorBinding, DescriptorKind, ShaderReflection, UniformBlock};
use crate::render::error::{RenderError, RenderResult};
use crate::render::handle::{ProgramHandle, ShaderHandle};
use crate::render::uniform::UniformValue;

/// A shader stage attached to a program
#[derive(Debug, Clone)]
pub struct ProgramStage {
    /// Shader the stage was attached from
    pub shader: ShaderHandle,
    /// Pipeline stage
    pub stage: ShaderStage,
    /// Module and entry point used for pipeline creation
    pub info: ShaderStageInfo,
    /// Reflection of the shader
    pub reflection: ShaderReflection,
}

/// A binding of the merged descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutBinding {
    /// Binding slot
    pub binding: u32,
    /// Descriptor kind
    pub kind: DescriptorKind,
    /// Array length
    pub count: u32,
    /// Union of the stages that use the binding
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    /// Vulkan layout binding
    pub fn to_vulkan(&self) -> vk::DescriptorSetLayoutBinding {
        vk::DescriptorSetLayoutBinding {
            binding: self.binding,
            descriptor_type: self.kind.to_vulkan(),
            descriptor_count: self.count,
            stage_flags: self.stages,
            ..Default::default()
        }
    }
}

/// Merge per-stage bindings into one layout
///
/// Stages are visited in attach order. A binding already seen with the same
/// kind gains the new stage's flag; a binding seen with a different kind is
/// reported and the later declaration is dropped.
pub fn merge_layout_bindings<'a>(
    stages: impl IntoIterator<Item = (vk::ShaderStageFlags, &'a [DescriptorBinding])>,
) -> Vec<LayoutBinding> {
    let mut merged: BTreeMap<u32, LayoutBinding> = BTreeMap::new();

    for (stage, bindings) in stages {
        for binding in bindings {
            match merged.get_mut(&binding.binding) {
                Some(existing) if existing.kind == binding.kind => {
                    existing.stages |= stage;
                    existing.count = existing.count.max(binding.count);
                }
                Some(existing) => {
                    log::error!(
                        "[PROGRAM] Binding {} declared as {:?} and {:?}; skipping the {:?} declaration",
                        binding.binding,
                        existing.kind,
                        binding.kind,
                        stage
                    );
                }
                None => {
                    merged.insert(
                        binding.binding,
                        LayoutBinding {
                            binding: binding.binding,
                            kind: binding.kind,
                            count: binding.count,
                            stages: stage,
                        },
                    );
                }
            }
        }
    }

    merged.into_values().collect()
}

/// Where a named uniform lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformLocation {
    /// Index into the program's uniform buffers; `None` for push constants
    pub buffer: Option<usize>,
    /// Byte offset within the block
    pub offset: usize,
    /// Declared size in bytes
    pub size: usize,
}

/// A uniform block replicated once per swapchain image
///
/// Buffer 0 is the host-visible staging copy. Buffers `1..=N` are device-local
/// and are bound by the descriptor set of the matching swapchain image. A CPU
/// shadow of the block keeps values that a draw does not set.
#[derive(Debug)]
pub struct AutoUniformBuffer {
    binding: u32,
    size: usize,
    buffers: Vec<BufferAllocation>,
    shadow: Vec<u8>,
}

impl AutoUniformBuffer {
    /// Allocate the staging buffer and `replicas` device-local buffers
    pub fn new<D: GpuDevice>(device: &mut D, binding: u32, size: usize, replicas: usize) -> RenderResult<Self> {
        let mut buffer = Self {
            binding,
            size,
            buffers: Vec::with_capacity(replicas + 1),
            shadow: vec![0; size],
        };
        let byte_size = size as vk::DeviceSize;

        let staging = device.create_buffer(
            byte_size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )?;
        buffer.buffers.push(staging);

        for _ in 0..replicas {
            match device.create_buffer(
                byte_size,
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ) {
                Ok(replica) => buffer.buffers.push(replica),
                Err(err) => {
                    buffer.destroy(device);
                    return Err(err.into());
                }
            }
        }

        Ok(buffer)
    }

    /// Binding slot of the block
    pub const fn binding(&self) -> u32 {
        self.binding
    }

    /// Block size in bytes
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Host-visible staging buffer
    pub fn staging(&self) -> &BufferAllocation {
        &self.buffers[0]
    }

    /// Device-local buffer bound for a swapchain image
    pub fn replica(&self, image_index: usize) -> RenderResult<&BufferAllocation> {
        self.buffers.get(image_index + 1).ok_or_else(|| {
            RenderError::InvalidDescription(format!(
                "uniform block at binding {} has no replica for image {image_index}",
                self.binding
            ))
        })
    }

    /// Number of device-local replicas
    pub fn replica_count(&self) -> usize {
        self.buffers.len().saturating_sub(1)
    }

    /// Current CPU-side contents of the block
    pub fn shadow(&self) -> &[u8] {
        &self.shadow
    }

    fn write(&mut self, location: &UniformLocation, value: &UniformValue) {
        let end = (location.offset + location.size).min(self.shadow.len());
        if let Some(slot) = self.shadow.get_mut(location.offset..end) {
            value.write_to(slot);
        }
    }

    /// Write the shadow to staging and copy it into the image's replica
    pub fn upload<D: GpuDevice>(&self, device: &mut D, image_index: usize) -> RenderResult<()> {
        let staging = *self.staging();
        let replica = *self.replica(image_index)?;
        device.write_buffer(&staging, 0, &self.shadow)?;
        device.copy_buffer(staging.buffer, replica.buffer, staging.size)?;
        Ok(())
    }

    /// Release every buffer
    pub fn destroy<D: GpuDevice>(self, device: &mut D) {
        for allocation in self.buffers {
            device.destroy_buffer(allocation);
        }
    }
}

/// Push-constant block of a linked program
#[derive(Debug, Clone)]
pub struct PushConstantBlock {
    /// Stages that read the block
    pub stages: vk::ShaderStageFlags,
    data: Vec<u8>,
}

impl PushConstantBlock {
    /// Push-constant range for the pipeline layout
    pub fn range(&self) -> vk::PushConstantRange {
        vk::PushConstantRange {
            stage_flags: self.stages,
            offset: 0,
            size: u32::try_from(self.data.len()).unwrap_or(u32::MAX),
        }
    }

    /// Bytes pushed before each draw
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

/// GPU state produced by linking
#[derive(Debug)]
pub struct LinkedProgram {
    /// Merged descriptor bindings
    pub bindings: Vec<LayoutBinding>,
    /// Descriptor set layout built from `bindings`
    pub set_layout: vk::DescriptorSetLayout,
    /// One replicated buffer per uniform block, in binding order
    pub uniform_buffers: Vec<AutoUniformBuffer>,
    /// `"block.member"` to location
    pub uniform_locations: HashMap<String, UniformLocation>,
    /// Push-constant block, if any stage declares one
    pub push_constants: Option<PushConstantBlock>,
}

impl LinkedProgram {
    /// Uniform buffer bound at a slot
    pub fn uniform_buffer_at(&self, binding: u32) -> Option<&AutoUniformBuffer> {
        self.uniform_buffers.iter().find(|buffer| buffer.binding == binding)
    }

    /// Push-constant ranges for the pipeline layout
    pub fn push_constant_ranges(&self) -> Vec<vk::PushConstantRange> {
        self.push_constants.iter().map(PushConstantBlock::range).collect()
    }

    /// Write named uniforms into the CPU shadows and the push-constant block
    ///
    /// Unknown names are reported and skipped.
    pub fn write_uniforms(&mut self, uniforms: &HashMap<String, UniformValue>) {
        for (name, value) in uniforms {
            let Some(location) = self.uniform_locations.get(name).copied() else {
                log::warn!("[PROGRAM] Unknown uniform '{name}'");
                continue;
            };

            match location.buffer {
                Some(index) => {
                    if let Some(buffer) = self.uniform_buffers.get_mut(index) {
                        buffer.write(&location, value);
                    }
                }
                None => {
                    if let Some(push) = self.push_constants.as_mut() {
                        let end = (location.offset + location.size).min(push.data.len());
                        if let Some(slot) = push.data.get_mut(location.offset..end) {
                            value.write_to(slot);
                        }
                    }
                }
            }
        }
    }

    /// Upload every uniform block into the replicas of one swapchain image
    pub fn upload_uniforms<D: GpuDevice>(&self, device: &mut D, image_index: usize) -> RenderResult<()> {
        for buffer in &self.uniform_buffers {
            buffer.upload(device, image_index)?;
        }
        Ok(())
    }

    fn destroy<D: GpuDevice>(self, device: &mut D) {
        for buffer in self.uniform_buffers {
            buffer.destroy(device);
        }
        device.destroy_descriptor_set_layout(self.set_layout);
    }
}

/// A shader program: attached stages and, once linked, its GPU state
#[derive(Debug)]
pub struct Program {
    handle: ProgramHandle,
    stages: Vec<ProgramStage>,
    linked: Option<LinkedProgram>,
}

impl Program {
    /// Create an empty, unlinked program
    pub const fn new(handle: ProgramHandle) -> Self {
        Self {
            handle,
            stages: Vec::new(),
            linked: None,
        }
    }

    /// Attach a stage; a second shader for the same stage replaces the first
    pub fn attach(&mut self, stage: ProgramStage) {
        if let Some(existing) = self.stages.iter_mut().find(|existing| existing.stage == stage.stage) {
            log::warn!(
                "[PROGRAM] {} already has a {:?} stage; replacing {} with {}",
                self.handle,
                stage.stage,
                existing.shader,
                stage.shader
            );
            *existing = stage;
        } else {
            self.stages.push(stage);
        }
    }

    /// Handle the program was created under
    pub const fn handle(&self) -> ProgramHandle {
        self.handle
    }

    /// Attached stages in attach order
    pub fn stages(&self) -> &[ProgramStage] {
        &self.stages
    }

    /// Whether the program has been linked
    pub const fn is_linked(&self) -> bool {
        self.linked.is_some()
    }

    /// Linked state, or an error if the program was never linked
    pub fn linked(&self) -> RenderResult<&LinkedProgram> {
        self.linked.as_ref().ok_or(RenderError::ProgramNotLinked(self.handle.raw()))
    }

    /// Mutable linked state, or an error if the program was never linked
    pub fn linked_mut(&mut self) -> RenderResult<&mut LinkedProgram> {
        self.linked.as_mut().ok_or(RenderError::ProgramNotLinked(self.handle.raw()))
    }

    /// Link the attached stages
    ///
    /// `replicas` is the number of swapchain images; each uniform block gets
    /// that many device-local copies plus one staging buffer.
    pub fn link<D: GpuDevice>(&mut self, device: &mut D, replicas: usize) -> RenderResult<()> {
        if self.linked.is_some() {
            return Err(RenderError::ProgramAlreadyLinked(self.handle.raw()));
        }
        if self.stages.is_empty() {
            return Err(RenderError::InvalidDescription(format!("{} has no attached stages", self.handle)));
        }

        let bindings = merge_layout_bindings(
            self.stages
                .iter()
                .map(|stage| (stage.stage.to_vulkan(), stage.reflection.bindings.as_slice())),
        );
        let vk_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings.iter().map(LayoutBinding::to_vulkan).collect();
        let set_layout = device.create_descriptor_set_layout(&vk_bindings)?;

        let mut linked = LinkedProgram {
            bindings,
            set_layout,
            uniform_buffers: Vec::new(),
            uniform_locations: HashMap::new(),
            push_constants: None,
        };

        let mut blocks: BTreeMap<u32, &UniformBlock> = BTreeMap::new();
        for stage in &self.stages {
            for block in &stage.reflection.uniform_blocks {
                blocks.entry(block.binding).or_insert(block);
            }
        }

        for block in blocks.into_values() {
            if block.size == 0 {
                log::warn!("[PROGRAM] Uniform block '{}' is empty; not allocating it", block.name);
                continue;
            }
            let buffer = match AutoUniformBuffer::new(device, block.binding, block.size as usize, replicas) {
                Ok(buffer) => buffer,
                Err(err) => {
                    linked.destroy(device);
                    return Err(err);
                }
            };
            let index = linked.uniform_buffers.len();
            for field in &block.fields {
                linked.uniform_locations.insert(
                    format!("{}.{}", block.name, field.name),
                    UniformLocation {
                        buffer: Some(index),
                        offset: field.offset as usize,
                        size: field.size as usize,
                    },
                );
            }
            linked.uniform_buffers.push(buffer);
        }

        let mut push_stages = vk::ShaderStageFlags::empty();
        let mut push_size = 0u32;
        for stage in &self.stages {
            if let Some(block) = &stage.reflection.push_constants {
                push_stages |= stage.stage.to_vulkan();
                push_size = push_size.max(block.size);
                for field in &block.fields {
                    linked
                        .uniform_locations
                        .entry(format!("{}.{}", block.name, field.name))
                        .or_insert(UniformLocation {
                            buffer: None,
                            offset: field.offset as usize,
                            size: field.size as usize,
                        });
                }
            }
        }
        if push_size > 0 {
            linked.push_constants = Some(PushConstantBlock {
                stages: push_stages,
                data: vec![0; push_size as usize],
            });
        }

        log::debug!(
            "[PROGRAM] Linked {}: {} bindings, {} uniform blocks, {} named uniforms",
            self.handle,
            linked.bindings.len(),
            linked.uniform_buffers.len(),
            linked.uniform_locations.len()
        );
        self.linked = Some(linked);
        Ok(())
    }

    /// Release the GPU state created by linking
    ///
    /// Shader modules belong to the registry and are left alone.
    pub fn destroy<D: GpuDevice>(self, device: &mut D) {
        if let Some(linked) = self.linked {
            linked.destroy(device);
        }
    }
}
