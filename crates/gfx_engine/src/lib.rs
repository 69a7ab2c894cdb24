//! # gfx_engine
//!
//! Command execution and frame synchronization engine for a Vulkan rendering
//! backend.
//!
//! Producers describe GPU resources with [`RenderCommand`]s and draws with
//! [`Frame`]s. A single consumer owns a [`RenderEngine`], which registers the
//! resources, reflects and links shader programs, caches pipelines and
//! descriptor sets, and paces frames with a fixed number of frames in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gfx_engine::prelude::*;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ApplicationConfig::load_validated("config/engine.toml")?;
//!     config.init_logging();
//!     let window = config.renderer.window.clone();
//!
//!     let mut context = create_render_context(RendererType::Vulkan, config.renderer);
//!     context.create_window(&window)?;
//!     context.start_rendering()?;
//!     while !context.is_window_closed() {
//!         context.process_events()?;
//!         context.frame(&Frame::new())?;
//!     }
//!     context.stop_rendering()?;
//!     context.destroy_window()?;
//!     Ok(())
//! }
//! ```
//!
//! [`RenderCommand`]: render::RenderCommand
//! [`Frame`]: render::Frame
//! [`RenderEngine`]: render::RenderEngine

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod config;
pub mod core;
pub mod foundation;
pub mod render;

/// Common imports for engine users
pub mod prelude {
    pub use crate::core::config::{ApplicationConfig, PresentModePreference, RendererConfig, WindowConfig};
    pub use crate::render::{
        create_render_context, frame_channel, ClearParameters, Frame, FramePacket, FrameExecutor, ProgramHandle,
        RenderCommand, RenderContext, RenderError, RenderItem, RenderQueue, RenderResult, RenderState, RendererType,
        UniformValue, VertexBufferHandle,
    };
}
