//! GLFW window used as the Vulkan presentation surface

use ash::vk;
use thiserror::Error;

use crate::core::config::WindowConfig;

/// Window management errors
#[derive(Error, Debug)]
pub enum WindowError {
    /// GLFW could not be initialised
    #[error("GLFW initialization failed")]
    InitializationFailed,

    /// The window could not be created
    #[error("Window creation failed")]
    CreationFailed,

    /// Any other GLFW failure
    #[error("GLFW error: {0}")]
    GlfwError(String),
}

/// Result type for window operations
pub type WindowResult<T> = Result<T, WindowError>;

/// Window system events the render context reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowEvent {
    /// The user asked to close the window
    CloseRequested,
    /// The client area changed size (screen coordinates)
    Resized {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// The drawable surface changed size (pixels)
    FramebufferResized {
        /// New width
        width: u32,
        /// New height
        height: u32,
    },
    /// Keyboard focus changed
    Focused(bool),
}

fn dimension(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// GLFW window wrapper
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Create a window without a client API so Vulkan can own the surface
    pub fn new(config: &WindowConfig) -> WindowResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors).map_err(|_| WindowError::InitializationFailed)?;

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(config.resizable));

        let (mut window, events) = glfw
            .create_window(config.width, config.height, &config.title, glfw::WindowMode::Windowed)
            .ok_or(WindowError::CreationFailed)?;

        window.set_close_polling(true);
        window.set_size_polling(true);
        window.set_framebuffer_size_polling(true);
        window.set_focus_polling(true);

        log::info!("[WINDOW] Created '{}' at {}x{}", config.title, config.width, config.height);
        Ok(Self { glfw, window, events })
    }

    /// Whether closing has been requested
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the window system and collect the events this crate cares about
    pub fn poll_events(&mut self) -> Vec<WindowEvent> {
        self.glfw.poll_events();
        glfw::flush_messages(&self.events)
            .filter_map(|(_, event)| match event {
                glfw::WindowEvent::Close => Some(WindowEvent::CloseRequested),
                glfw::WindowEvent::Size(width, height) => Some(WindowEvent::Resized {
                    width: dimension(width),
                    height: dimension(height),
                }),
                glfw::WindowEvent::FramebufferSize(width, height) => Some(WindowEvent::FramebufferResized {
                    width: dimension(width),
                    height: dimension(height),
                }),
                glfw::WindowEvent::Focus(focused) => Some(WindowEvent::Focused(focused)),
                _ => None,
            })
            .collect()
    }

    /// Client area size in screen coordinates
    pub fn size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_size();
        (dimension(width), dimension(height))
    }

    /// Drawable size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (dimension(width), dimension(height))
    }

    /// Block until the window system reports an event
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Vulkan instance extensions GLFW needs for surface creation
    pub fn required_instance_extensions(&self) -> WindowResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| WindowError::GlfwError("Vulkan is not supported by this window system".to_string()))
    }

    /// Create the presentation surface for this window
    pub fn create_surface(&mut self, instance: vk::Instance) -> WindowResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(WindowError::GlfwError(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}
