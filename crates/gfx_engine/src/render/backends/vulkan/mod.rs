//! Vulkan backend
//!
//! Window, instance and device bring-up, the swapchain, the [`GpuDevice`]
//! implementation and the render context tying them together.
//!
//! [`GpuDevice`]: crate::render::backends::device::GpuDevice

pub mod context;
pub mod device;
pub mod render_context;
pub mod swapchain;
pub mod window;

pub use device::VulkanDevice;
pub use render_context::VulkanRenderContext;
pub use window::{Window, WindowError, WindowEvent};
