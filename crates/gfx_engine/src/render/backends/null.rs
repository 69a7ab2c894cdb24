//! Backend that draws nothing
//!
//! Useful for headless runs and for exercising frontends without a GPU.

use crate::core::config::WindowConfig;
use crate::render::backends::vulkan::window::WindowEvent;
use crate::render::commands::RenderCommand;
use crate::render::context::RenderContext;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame::Frame;
use crate::render::render_thread::FrameExecutor;

/// [`RenderContext`] that accepts every command and frame without effect
#[derive(Debug, Default)]
pub struct NullRenderContext {
    window: Option<WindowConfig>,
    close_requested: bool,
    rendering: bool,
    commands_processed: usize,
    frames: usize,
}

impl NullRenderContext {
    /// Context with no window
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands consumed so far
    pub const fn commands_processed(&self) -> usize {
        self.commands_processed
    }

    /// Frames consumed so far
    pub const fn frames(&self) -> usize {
        self.frames
    }

    /// Mark the window as closed, as a user closing it would
    pub fn request_close(&mut self) {
        self.close_requested = true;
    }
}

impl FrameExecutor for NullRenderContext {
    fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()> {
        self.commands_processed += commands.len();
        Ok(())
    }

    fn frame(&mut self, _frame: &Frame) -> RenderResult<()> {
        self.frames += 1;
        Ok(())
    }
}

impl RenderContext for NullRenderContext {
    fn create_window(&mut self, config: &WindowConfig) -> RenderResult<()> {
        if self.window.is_some() {
            return Err(RenderError::InvalidDescription("a window already exists".to_string()));
        }
        log::debug!("[WINDOW] Null window '{}' {}x{}", config.title, config.width, config.height);
        self.window = Some(config.clone());
        self.close_requested = false;
        Ok(())
    }

    fn destroy_window(&mut self) -> RenderResult<()> {
        self.window = None;
        Ok(())
    }

    fn process_events(&mut self) -> RenderResult<Vec<WindowEvent>> {
        if self.close_requested {
            Ok(vec![WindowEvent::CloseRequested])
        } else {
            Ok(Vec::new())
        }
    }

    fn is_window_closed(&self) -> bool {
        self.window.is_none() || self.close_requested
    }

    fn window_size(&self) -> Option<(u32, u32)> {
        self.window.as_ref().map(|window| (window.width, window.height))
    }

    fn framebuffer_size(&self) -> Option<(u32, u32)> {
        self.window_size()
    }

    fn start_rendering(&mut self) -> RenderResult<()> {
        self.rendering = true;
        Ok(())
    }

    fn stop_rendering(&mut self) -> RenderResult<()> {
        if self.rendering {
            log::debug!(
                "[FRAME] Null renderer stopped after {} frames and {} commands",
                self.frames,
                self.commands_processed
            );
        }
        self.rendering = false;
        Ok(())
    }
}
