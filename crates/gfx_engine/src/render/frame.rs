//! Per-frame draw submissions
//!
//! A [`Frame`] is an ordered list of [`RenderQueue`]s, each an ordered list of
//! [`RenderItem`]s. Order is preserved all the way to the GPU.

use ash::vk;
use bitflags::bitflags;
use std::collections::HashMap;

use crate::render::handle::{FrameBufferHandle, IndexBufferHandle, ProgramHandle, VertexBufferHandle};
use crate::render::uniform::UniformValue;

bitflags! {
    /// Fixed-function state toggles of a draw
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct RenderState: u32 {
        /// Write RGBA to the colour attachment
        const COLOUR_WRITE = 1 << 0;
        /// Standard source-alpha blending
        const ALPHA_BLEND = 1 << 1;
        /// Cull back faces
        const CULL_BACK = 1 << 2;
    }
}

impl Default for RenderState {
    fn default() -> Self {
        Self::COLOUR_WRITE
    }
}

/// Primitive assembly mode of a draw
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveTopology {
    /// Independent triangles
    #[default]
    TriangleList,
    /// Independent line segments
    LineList,
    /// Points
    PointList,
}

impl PrimitiveTopology {
    /// Number of vertices consumed per primitive
    pub const fn vertices_per_primitive(self) -> u32 {
        match self {
            Self::TriangleList => 3,
            Self::LineList => 2,
            Self::PointList => 1,
        }
    }

    /// Vulkan topology
    pub const fn to_vulkan(self) -> vk::PrimitiveTopology {
        match self {
            Self::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            Self::LineList => vk::PrimitiveTopology::LINE_LIST,
            Self::PointList => vk::PrimitiveTopology::POINT_LIST,
        }
    }
}

/// A single draw submission
#[derive(Debug, Clone, PartialEq)]
pub struct RenderItem {
    /// Vertex source; items without one only update uniforms
    pub vertex_buffer: Option<VertexBufferHandle>,
    /// Byte offset into the vertex buffer
    pub vertex_buffer_offset: u64,
    /// Optional index source
    pub index_buffer: Option<IndexBufferHandle>,
    /// Byte offset into the index buffer
    pub index_buffer_offset: u64,
    /// Program to draw with
    pub program: ProgramHandle,
    /// Named uniform values, addressed as `"block.member"`
    pub uniforms: HashMap<String, UniformValue>,
    /// Fixed-function state
    pub state: RenderState,
    /// Primitive assembly mode
    pub topology: PrimitiveTopology,
    /// Number of primitives to draw
    pub primitive_count: u32,
}

impl RenderItem {
    /// Create an item drawing with `program` and default state
    pub fn new(program: ProgramHandle) -> Self {
        Self {
            vertex_buffer: None,
            vertex_buffer_offset: 0,
            index_buffer: None,
            index_buffer_offset: 0,
            program,
            uniforms: HashMap::new(),
            state: RenderState::default(),
            topology: PrimitiveTopology::default(),
            primitive_count: 0,
        }
    }

    /// Set the vertex source
    #[must_use]
    pub const fn with_vertex_buffer(mut self, handle: VertexBufferHandle, offset: u64) -> Self {
        self.vertex_buffer = Some(handle);
        self.vertex_buffer_offset = offset;
        self
    }

    /// Set the index source
    #[must_use]
    pub const fn with_index_buffer(mut self, handle: IndexBufferHandle, offset: u64) -> Self {
        self.index_buffer = Some(handle);
        self.index_buffer_offset = offset;
        self
    }

    /// Set the number of primitives
    #[must_use]
    pub const fn with_primitive_count(mut self, count: u32) -> Self {
        self.primitive_count = count;
        self
    }

    /// Set fixed-function state
    #[must_use]
    pub const fn with_state(mut self, state: RenderState) -> Self {
        self.state = state;
        self
    }

    /// Set the primitive topology
    #[must_use]
    pub const fn with_topology(mut self, topology: PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Assign a named uniform, replacing any previous value
    #[must_use]
    pub fn with_uniform(mut self, name: impl Into<String>, value: impl Into<UniformValue>) -> Self {
        self.set_uniform(name, value);
        self
    }

    /// Assign a named uniform, replacing any previous value
    pub fn set_uniform(&mut self, name: impl Into<String>, value: impl Into<UniformValue>) {
        self.uniforms.insert(name.into(), value.into());
    }

    /// Number of vertices (or indices) the draw consumes
    pub const fn element_count(&self) -> u32 {
        self.primitive_count * self.topology.vertices_per_primitive()
    }
}

/// Clear operations performed when a render queue begins
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearParameters {
    /// Clear the colour attachment
    pub clear_colour: bool,
    /// Clear colour (RGBA)
    pub colour: [f32; 4],
    /// Clear the depth attachment
    pub clear_depth: bool,
    /// Clear depth value
    pub depth: f32,
    /// Clear stencil value
    pub stencil: u32,
}

impl ClearParameters {
    /// Clear colour only
    pub const fn colour(colour: [f32; 4]) -> Self {
        Self {
            clear_colour: true,
            colour,
            clear_depth: false,
            depth: 1.0,
            stencil: 0,
        }
    }

    /// Also clear depth
    #[must_use]
    pub const fn with_depth(mut self, depth: f32, stencil: u32) -> Self {
        self.clear_depth = true;
        self.depth = depth;
        self.stencil = stencil;
        self
    }

    /// Vulkan clear values, colour entry first, depth entry second
    pub fn clear_values(&self) -> Vec<vk::ClearValue> {
        let mut values = Vec::with_capacity(2);
        if self.clear_colour {
            let mut value = vk::ClearValue::default();
            value.color = vk::ClearColorValue { float32: self.colour };
            values.push(value);
        }
        if self.clear_depth {
            // Start zeroed so the bytes past the depth-stencil pair are initialised
            let mut value = vk::ClearValue::default();
            value.depth_stencil = vk::ClearDepthStencilValue {
                depth: self.depth,
                stencil: self.stencil,
            };
            values.push(value);
        }
        values
    }
}

/// Ordered list of draws sharing a target and clear operation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RenderQueue {
    /// Draws in submission order
    pub items: Vec<RenderItem>,
    /// Clear operation at queue start
    pub clear: Option<ClearParameters>,
    /// Offscreen target; `None` renders to the backbuffer
    pub frame_buffer: Option<FrameBufferHandle>,
}

impl RenderQueue {
    /// Create an empty backbuffer queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the clear operation
    #[must_use]
    pub const fn with_clear(mut self, clear: ClearParameters) -> Self {
        self.clear = Some(clear);
        self
    }

    /// Render into an offscreen framebuffer
    #[must_use]
    pub const fn with_frame_buffer(mut self, handle: FrameBufferHandle) -> Self {
        self.frame_buffer = Some(handle);
        self
    }

    /// Append a draw
    pub fn push(&mut self, item: RenderItem) {
        self.items.push(item);
    }
}

/// Everything drawn in one presented frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    /// Render queues in execution order
    pub render_queues: Vec<RenderQueue>,
}

impl Frame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a render queue
    pub fn push(&mut self, queue: RenderQueue) {
        self.render_queues.push(queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colour_precedes_depth() {
        let values = ClearParameters::colour([0.1, 0.2, 0.3, 1.0]).with_depth(0.5, 7).clear_values();
        assert_eq!(values.len(), 2);
        // SAFETY: the variants written above are read back in the same order
        unsafe {
            assert_eq!(values[0].color.float32, [0.1, 0.2, 0.3, 1.0]);
            assert_eq!(values[1].depth_stencil.depth, 0.5);
            assert_eq!(values[1].depth_stencil.stencil, 7);
        }
    }

    #[test]
    fn test_depth_only_clear_is_compact() {
        let params = ClearParameters {
            clear_colour: false,
            ..ClearParameters::colour([0.0; 4]).with_depth(1.0, 0)
        };
        let values = params.clear_values();
        assert_eq!(values.len(), 1);
        // SAFETY: the only entry is the depth entry
        unsafe {
            assert_eq!(values[0].depth_stencil.depth, 1.0);
        }
    }

    #[test]
    fn test_element_count_follows_topology() {
        let program = ProgramHandle::new(1);
        assert_eq!(RenderItem::new(program).with_primitive_count(4).element_count(), 12);
        let lines = RenderItem::new(program)
            .with_primitive_count(4)
            .with_topology(PrimitiveTopology::LineList);
        assert_eq!(lines.element_count(), 8);
    }

    #[test]
    fn test_set_uniform_overwrites() {
        let mut item = RenderItem::new(ProgramHandle::new(1)).with_uniform("U.a", 1.0f32);
        item.set_uniform("U.a", 2.0f32);
        assert_eq!(item.uniforms.len(), 1);
        assert_eq!(item.uniforms["U.a"], UniformValue::Float(2.0));
    }
}
