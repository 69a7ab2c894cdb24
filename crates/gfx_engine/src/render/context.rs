//! Backend selection
//!
//! A [`RenderContext`] owns a window and whatever executes frames for it. The
//! concrete backend is chosen once, at construction, through
//! [`create_render_context`].

use crate::core::config::{RendererConfig, WindowConfig};
use crate::render::backends::null::NullRenderContext;
use crate::render::backends::vulkan::render_context::VulkanRenderContext;
use crate::render::backends::vulkan::window::WindowEvent;
use crate::render::error::RenderResult;
use crate::render::render_thread::FrameExecutor;

/// Window management plus frame execution for one backend
///
/// Window methods belong on the thread that created the window. The
/// [`FrameExecutor`] half is driven by the render consumer.
pub trait RenderContext: FrameExecutor {
    /// Open a window and bring up the backend behind it
    fn create_window(&mut self, config: &WindowConfig) -> RenderResult<()>;

    /// Tear down the backend and close the window
    ///
    /// Does nothing when no window exists.
    fn destroy_window(&mut self) -> RenderResult<()>;

    /// Pump window events, reacting to surface size changes
    fn process_events(&mut self) -> RenderResult<Vec<WindowEvent>>;

    /// Whether the window has been asked to close (or never existed)
    fn is_window_closed(&self) -> bool;

    /// Client area size, if a window exists
    fn window_size(&self) -> Option<(u32, u32)>;

    /// Drawable size in pixels, if a window exists
    fn framebuffer_size(&self) -> Option<(u32, u32)>;

    /// Called on the render thread before its first frame
    fn start_rendering(&mut self) -> RenderResult<()>;

    /// Called on the render thread after its last frame
    fn stop_rendering(&mut self) -> RenderResult<()>;
}

/// Available backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererType {
    /// Accepts everything and draws nothing
    Null,
    /// GLFW window presented through Vulkan
    Vulkan,
}

/// Build the render context for a backend
pub fn create_render_context(renderer: RendererType, config: RendererConfig) -> Box<dyn RenderContext> {
    log::info!("[ENGINE] Selected {renderer:?} renderer");
    match renderer {
        RendererType::Null => Box::new(NullRenderContext::new()),
        RendererType::Vulkan => Box::new(VulkanRenderContext::new(config)),
    }
}
