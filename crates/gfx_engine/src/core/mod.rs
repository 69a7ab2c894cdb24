//! Core engine settings

pub mod config;

pub use config::{
    ApplicationConfig, DescriptorPoolConfig, EngineConfig, PresentModePreference, RendererConfig,
    WindowConfig,
};
