//! Rendering backends and the device seam the engine runs on

pub mod device;
#[cfg(test)]
pub(crate) mod mock;
pub mod null;
pub mod vulkan;

pub use null::NullRenderContext;
