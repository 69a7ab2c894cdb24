//! Graphics pipeline cache
//!
//! Pipelines are keyed structurally by everything that affects their
//! creation. Viewport and scissor are dynamic state, so a swapchain resize
//! does not change any key.

use ash::vk;
use std::collections::HashMap;

use crate::render::backends::device::{GpuDevice, PipelineDescription, RenderPassKind, ShaderStageInfo};
use crate::render::engine::program::Program;
use crate::render::error::RenderResult;
use crate::render::frame::{PrimitiveTopology, RenderState};
use crate::render::handle::ProgramHandle;
use crate::render::vertex_layout::{VertexInputDescription, VertexLayout};

/// Everything that selects a distinct graphics pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    /// Rasterizer and blend toggles
    pub state: RenderState,
    /// Input assembly topology
    pub topology: PrimitiveTopology,
    /// Vertex layout of the bound vertex buffer
    pub vertex_layout: VertexLayout,
    /// Program providing the shader stages
    pub program: ProgramHandle,
}

/// A cached pipeline and the layout it was built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicsPipeline {
    /// Pipeline handle
    pub pipeline: vk::Pipeline,
    /// Pipeline layout handle
    pub layout: vk::PipelineLayout,
}

/// Memoized graphics pipelines
#[derive(Debug, Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, GraphicsPipeline>,
}

impl PipelineCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a pipeline exists for `key`
    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.pipelines.contains_key(key)
    }

    /// Number of cached pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// Return the pipeline for `key`, building it on first use
    pub fn find_or_create<D: GpuDevice>(
        &mut self,
        device: &mut D,
        key: &PipelineKey,
        program: &Program,
        vertex_input: &VertexInputDescription,
    ) -> RenderResult<GraphicsPipeline> {
        if let Some(pipeline) = self.pipelines.get(key) {
            return Ok(*pipeline);
        }

        let linked = program.linked()?;
        let layout = device.create_pipeline_layout(linked.set_layout, &linked.push_constant_ranges())?;

        let stages: Vec<ShaderStageInfo> = program.stages().iter().map(|stage| stage.info.clone()).collect();
        let description = PipelineDescription {
            stages: &stages,
            vertex_input,
            topology: key.topology.to_vulkan(),
            state: key.state,
            layout,
            render_pass: device.render_pass(RenderPassKind::Clear),
        };

        let pipeline = match device.create_graphics_pipeline(&description) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                device.destroy_pipeline_layout(layout);
                return Err(err.into());
            }
        };

        log::debug!(
            "[PIPELINE] Built pipeline for {} ({:?}, {:?}, stride {}); {} cached",
            key.program,
            key.state,
            key.topology,
            key.vertex_layout.stride(),
            self.pipelines.len() + 1
        );
        let entry = GraphicsPipeline { pipeline, layout };
        self.pipelines.insert(key.clone(), entry);
        Ok(entry)
    }

    /// Destroy every pipeline built from a program
    pub fn remove_program<D: GpuDevice>(&mut self, device: &mut D, program: ProgramHandle) {
        let stale: Vec<PipelineKey> = self.pipelines.keys().filter(|key| key.program == program).cloned().collect();
        for key in stale {
            if let Some(entry) = self.pipelines.remove(&key) {
                destroy_entry(device, entry);
            }
        }
    }

    /// Destroy every cached pipeline
    pub fn clear<D: GpuDevice>(&mut self, device: &mut D) {
        for (_, entry) in self.pipelines.drain() {
            destroy_entry(device, entry);
        }
    }
}

fn destroy_entry<D: GpuDevice>(device: &mut D, entry: GraphicsPipeline) {
    device.destroy_pipeline(entry.pipeline);
    device.destroy_pipeline_layout(entry.layout);
}
