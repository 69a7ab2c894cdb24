//! Per-program descriptor set cache
//!
//! Each linked program gets one descriptor set per swapchain image, allocated
//! from the shared pool the first time the program is drawn. Set `i` points
//! every uniform buffer binding at the program's device-local replica `i`.

use ash::vk;
use std::collections::HashMap;

use crate::render::backends::device::{GpuDevice, UniformBufferWrite};
use crate::render::engine::program::Program;
use crate::render::engine::reflection::DescriptorKind;
use crate::render::error::{RenderError, RenderResult, VulkanError};
use crate::render::handle::ProgramHandle;

fn pool_error(err: VulkanError) -> RenderError {
    match err {
        VulkanError::Api(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
            RenderError::DescriptorPoolExhausted
        }
        other => other.into(),
    }
}

/// Memoized descriptor sets keyed by program
#[derive(Debug, Default)]
pub struct DescriptorSetCache {
    sets: HashMap<ProgramHandle, Vec<vk::DescriptorSet>>,
}

impl DescriptorSetCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of programs with allocated sets
    pub fn len(&self) -> usize {
        self.sets.len()
    }

    /// Whether no sets are allocated
    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// Descriptor set of `program` for one swapchain image
    pub fn find_or_create<D: GpuDevice>(
        &mut self,
        device: &mut D,
        handle: ProgramHandle,
        program: &Program,
        image_index: usize,
        image_count: usize,
    ) -> RenderResult<vk::DescriptorSet> {
        if !self.sets.contains_key(&handle) {
            let sets = Self::allocate(device, program, image_count)?;
            self.sets.insert(handle, sets);
        }

        self.sets
            .get(&handle)
            .and_then(|sets| sets.get(image_index))
            .copied()
            .ok_or_else(|| RenderError::InvalidDescription(format!("{handle} has no descriptor set for image {image_index}")))
    }

    fn allocate<D: GpuDevice>(device: &mut D, program: &Program, image_count: usize) -> RenderResult<Vec<vk::DescriptorSet>> {
        let linked = program.linked()?;
        let sets = device
            .allocate_descriptor_sets(linked.set_layout, image_count)
            .map_err(pool_error)?;

        let mut writes = Vec::new();
        for (image_index, &set) in sets.iter().enumerate() {
            for binding in &linked.bindings {
                match binding.kind {
                    DescriptorKind::UniformBuffer => {
                        let Some(buffer) = linked.uniform_buffer_at(binding.binding) else {
                            log::warn!("[DESCRIPTOR] No uniform buffer for binding {}", binding.binding);
                            continue;
                        };
                        writes.push(UniformBufferWrite {
                            set,
                            binding: binding.binding,
                            buffer: buffer.replica(image_index)?.buffer,
                            range: buffer.size() as vk::DeviceSize,
                        });
                    }
                    kind => {
                        log::error!(
                            "[DESCRIPTOR] {kind:?} at binding {} is not implemented; leaving it unwritten",
                            binding.binding
                        );
                    }
                }
            }
        }

        device.update_descriptor_sets(&writes);
        log::debug!("[DESCRIPTOR] Allocated {} sets with {} writes", sets.len(), writes.len());
        Ok(sets)
    }

    /// Free the sets of a deleted program
    pub fn remove_program<D: GpuDevice>(&mut self, device: &mut D, handle: ProgramHandle) -> RenderResult<()> {
        if let Some(sets) = self.sets.remove(&handle) {
            device.free_descriptor_sets(&sets)?;
        }
        Ok(())
    }

    /// Free every cached set
    pub fn clear<D: GpuDevice>(&mut self, device: &mut D) -> RenderResult<()> {
        for (_, sets) in self.sets.drain() {
            device.free_descriptor_sets(&sets)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::mock::{DeviceCall, MockDevice};
    use crate::render::backends::device::ShaderStageInfo;
    use crate::render::commands::ShaderStage;
    use crate::render::engine::program::ProgramStage;
    use crate::render::engine::reflection::reflect;
    use crate::render::engine::spirv_fixtures::{Member, ShaderFixture};
    use crate::render::handle::ShaderHandle;
    use ash::vk::Handle;
    use std::ffi::CString;

    fn program(device: &mut MockDevice, fixture: &ShaderFixture, replicas: usize) -> Program {
        let mut program = Program::new(ProgramHandle::new(1));
        program.attach(ProgramStage {
            shader: ShaderHandle::new(1),
            stage: ShaderStage::Fragment,
            info: ShaderStageInfo {
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: vk::ShaderModule::from_raw(1),
                entry_point: CString::new("main").unwrap(),
            },
            reflection: reflect(&fixture.build()).unwrap(),
        });
        program.link(device, replicas).unwrap();
        program
    }

    #[test]
    fn test_sets_point_at_matching_replicas() {
        let mut device = MockDevice::new();
        let fixture = ShaderFixture::new()
            .uniform_block(0, "U", &[("a", Member::Float, 0)])
            .combined_sampler(1, "tex");
        let program = program(&mut device, &fixture, 3);
        let mut cache = DescriptorSetCache::new();

        let set1 = cache.find_or_create(&mut device, ProgramHandle::new(1), &program, 1, 3).unwrap();
        let again = cache.find_or_create(&mut device, ProgramHandle::new(1), &program, 1, 3).unwrap();
        assert_eq!(set1, again);

        let updates = device.calls_matching(|call| matches!(call, DeviceCall::UpdateDescriptors(_)));
        assert_eq!(updates.len(), 1);
        let DeviceCall::UpdateDescriptors(writes) = &updates[0] else {
            unreachable!()
        };
        // The sampler binding is left unwritten
        assert_eq!(writes.len(), 3);
        let buffer = program.linked().unwrap().uniform_buffer_at(0).unwrap();
        assert_eq!(writes[1].set, set1);
        assert_eq!(writes[1].buffer, buffer.replica(1).unwrap().buffer);
        assert_eq!(writes[1].range, 4);
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let mut device = MockDevice::new().with_descriptor_capacity(2);
        let fixture = ShaderFixture::new().uniform_block(0, "U", &[("a", Member::Float, 0)]);
        let program = program(&mut device, &fixture, 3);
        let mut cache = DescriptorSetCache::new();

        let result = cache.find_or_create(&mut device, ProgramHandle::new(1), &program, 0, 3);
        assert!(matches!(result, Err(RenderError::DescriptorPoolExhausted)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_remove_program_frees_sets() {
        let mut device = MockDevice::new();
        let fixture = ShaderFixture::new().uniform_block(0, "U", &[("a", Member::Float, 0)]);
        let program = program(&mut device, &fixture, 2);
        let mut cache = DescriptorSetCache::new();
        cache.find_or_create(&mut device, ProgramHandle::new(1), &program, 0, 2).unwrap();

        cache.remove_program(&mut device, ProgramHandle::new(1)).unwrap();
        assert!(cache.is_empty());
        program.destroy(&mut device);
        assert_eq!(device.live_object_count(), 0);
    }
}
