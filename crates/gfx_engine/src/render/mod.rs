//! # Rendering
//!
//! Command execution and frame synchronization for a Vulkan backend.
//!
//! ## Architecture
//!
//! - **Commands**: [`RenderCommand`] creates and deletes GPU resources by
//!   caller-chosen handle
//! - **Frames**: a [`Frame`] is an ordered list of [`RenderQueue`]s of
//!   [`RenderItem`] draws
//! - **Engine**: [`RenderEngine`] applies command lists and records, submits
//!   and presents frames against any [`GpuDevice`]
//! - **Hand-off**: [`frame_channel`] carries packets from producer threads to
//!   the single consumer that owns the engine
//! - **Backends**: [`RenderContext`] pairs a window with an executor, either
//!   Vulkan or null

pub mod backends;
pub mod commands;
pub mod context;
pub mod engine;
pub mod error;
pub mod frame;
pub mod handle;
pub mod render_thread;
pub mod uniform;
pub mod vertex_layout;

pub use backends::device::GpuDevice;
pub use backends::null::NullRenderContext;
pub use backends::vulkan::{VulkanDevice, VulkanRenderContext, Window, WindowError, WindowEvent};
pub use commands::{IndexType, RenderCommand, ShaderStage};
pub use context::{create_render_context, RenderContext, RendererType};
pub use engine::RenderEngine;
pub use error::{RenderError, RenderResult, VulkanError, VulkanResult};
pub use frame::{ClearParameters, Frame, PrimitiveTopology, RenderItem, RenderQueue, RenderState};
pub use handle::{
    FrameBufferHandle, IndexBufferHandle, ProgramHandle, ResourceKind, ShaderHandle, TextureHandle, VertexBufferHandle,
};
pub use render_thread::{frame_channel, FrameChannelError, FrameExecutor, FramePacket, FrameReceiver, FrameSubmitter};
pub use uniform::UniformValue;
pub use vertex_layout::{AttributeType, VertexAttribute, VertexLayout};
