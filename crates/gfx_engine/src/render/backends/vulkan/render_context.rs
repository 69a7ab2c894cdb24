//! GLFW window plus the Vulkan engine behind it

use ash::vk;

use crate::core::config::{RendererConfig, WindowConfig};
use crate::render::backends::vulkan::device::VulkanDevice;
use crate::render::backends::vulkan::window::{Window, WindowEvent};
use crate::render::commands::RenderCommand;
use crate::render::context::RenderContext;
use crate::render::engine::RenderEngine;
use crate::render::error::{RenderError, RenderResult};
use crate::render::frame::Frame;
use crate::render::render_thread::FrameExecutor;

/// Latest non-zero framebuffer size reported in a batch of events
fn latest_resize(events: &[WindowEvent]) -> Option<vk::Extent2D> {
    events.iter().rev().find_map(|event| match *event {
        WindowEvent::FramebufferResized { width, height } if width > 0 && height > 0 => {
            Some(vk::Extent2D { width, height })
        }
        _ => None,
    })
}

/// [`RenderContext`] presenting through Vulkan
pub struct VulkanRenderContext {
    config: RendererConfig,
    // Declared before the window so the surface outlives the swapchain
    engine: Option<RenderEngine<VulkanDevice>>,
    window: Option<Window>,
}

impl VulkanRenderContext {
    /// Context with no window; call [`RenderContext::create_window`] next
    pub fn new(config: RendererConfig) -> Self {
        Self {
            config,
            engine: None,
            window: None,
        }
    }

    /// The engine, once a window exists
    pub const fn engine(&self) -> Option<&RenderEngine<VulkanDevice>> {
        self.engine.as_ref()
    }

    fn engine_mut(&mut self) -> RenderResult<&mut RenderEngine<VulkanDevice>> {
        self.engine.as_mut().ok_or(RenderError::NotInitialized)
    }

    fn resize_to_window(&mut self) -> RenderResult<()> {
        let Some((width, height)) = self.framebuffer_size() else {
            return Err(RenderError::NotInitialized);
        };
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.engine_mut()?.resize(vk::Extent2D { width, height })
    }
}

impl FrameExecutor for VulkanRenderContext {
    fn process_command_list(&mut self, commands: Vec<RenderCommand>) -> RenderResult<()> {
        self.engine_mut()?.process_command_list(commands)
    }

    fn frame(&mut self, frame: &Frame) -> RenderResult<()> {
        if matches!(self.framebuffer_size(), Some((0, _) | (_, 0))) {
            log::trace!("[FRAME] Skipping frame for a minimised window");
            return Ok(());
        }

        match self.engine_mut()?.frame(frame) {
            Err(err) if err.is_surface_out_of_date() => {
                log::debug!("[SWAPCHAIN] Surface out of date, recreating");
                self.resize_to_window()
            }
            result => result,
        }
    }
}

impl RenderContext for VulkanRenderContext {
    fn create_window(&mut self, config: &WindowConfig) -> RenderResult<()> {
        if self.window.is_some() {
            return Err(RenderError::InvalidDescription("a window already exists".to_string()));
        }

        let mut window = Window::new(config)?;
        let device = VulkanDevice::new(&mut window, &self.config)?;
        let engine = RenderEngine::new(device, &self.config)?;

        self.engine = Some(engine);
        self.window = Some(window);
        Ok(())
    }

    fn destroy_window(&mut self) -> RenderResult<()> {
        let shutdown = match self.engine.as_mut() {
            Some(engine) => engine.shutdown(),
            None => Ok(()),
        };
        self.engine = None;
        if self.window.take().is_some() {
            log::info!("[WINDOW] Destroyed");
        }
        shutdown
    }

    fn process_events(&mut self) -> RenderResult<Vec<WindowEvent>> {
        let Some(window) = self.window.as_mut() else {
            return Ok(Vec::new());
        };
        let events = window.poll_events();

        if let Some(extent) = latest_resize(&events) {
            self.engine_mut()?.resize(extent)?;
        }
        Ok(events)
    }

    fn is_window_closed(&self) -> bool {
        self.window.as_ref().map_or(true, Window::should_close)
    }

    fn window_size(&self) -> Option<(u32, u32)> {
        self.window.as_ref().map(Window::size)
    }

    fn framebuffer_size(&self) -> Option<(u32, u32)> {
        self.window.as_ref().map(Window::framebuffer_size)
    }

    fn start_rendering(&mut self) -> RenderResult<()> {
        self.engine_mut()?;
        log::info!("[ENGINE] Rendering started");
        Ok(())
    }

    fn stop_rendering(&mut self) -> RenderResult<()> {
        if let Some(engine) = self.engine.as_mut() {
            engine.wait_idle()?;
            log::info!("[ENGINE] Rendering stopped");
        }
        Ok(())
    }
}

impl Drop for VulkanRenderContext {
    fn drop(&mut self) {
        if let Err(err) = self.destroy_window() {
            log::error!("[ENGINE] Teardown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_non_zero_resize_wins() {
        let events = [
            WindowEvent::FramebufferResized { width: 800, height: 600 },
            WindowEvent::Focused(true),
            WindowEvent::FramebufferResized { width: 1024, height: 768 },
            WindowEvent::FramebufferResized { width: 0, height: 0 },
        ];
        assert_eq!(
            latest_resize(&events),
            Some(vk::Extent2D {
                width: 1024,
                height: 768
            })
        );
    }

    #[test]
    fn test_window_resize_alone_is_ignored() {
        let events = [WindowEvent::Resized { width: 640, height: 480 }];
        assert_eq!(latest_resize(&events), None);
    }

    #[test]
    fn test_calls_without_window_are_rejected() {
        let mut context = VulkanRenderContext::new(RendererConfig::default());
        assert!(context.engine().is_none());
        assert!(matches!(context.frame(&Frame::new()), Err(RenderError::NotInitialized)));
        assert!(matches!(
            context.process_command_list(Vec::new()),
            Err(RenderError::NotInitialized)
        ));
        assert!(matches!(context.start_rendering(), Err(RenderError::NotInitialized)));
        assert!(context.process_events().unwrap().is_empty());
        context.stop_rendering().unwrap();
        context.destroy_window().unwrap();
    }
}
