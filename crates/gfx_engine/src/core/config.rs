//! # Engine Configuration
//!
//! Configuration for the renderer backend and the engine around it. Every
//! structure is serializable so a whole [`ApplicationConfig`] can be loaded
//! from a `.toml` or `.ron` file through the [`Config`] trait.
//!
//! ## Configuration Categories
//!
//! - **Window**: title, initial size, resizability
//! - **Renderer**: frames in flight, validation layers, present mode, descriptor pool sizing
//! - **Engine**: logging

use serde::{Deserialize, Serialize};

pub use crate::config::{Config, ConfigError};

/// Window creation parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial client width in screen coordinates
    pub width: u32,
    /// Initial client height in screen coordinates
    pub height: u32,
    /// Whether the user may resize the window
    pub resizable: bool,
}

impl WindowConfig {
    /// Create a window configuration
    pub fn new(title: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            title: title.into(),
            width,
            height,
            resizable: true,
        }
    }

    /// Set whether the window can be resized
    #[must_use]
    pub const fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self::new("gfx_engine", 1280, 720)
    }
}

/// Preferred swapchain presentation mode
///
/// The preferred mode is used when the surface supports it, otherwise FIFO
/// (always available) is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PresentModePreference {
    /// Triple-buffered low-latency presentation
    Mailbox,
    /// Vsync-locked presentation
    Fifo,
    /// Unsynchronized presentation, may tear
    Immediate,
}

/// Capacities of the preallocated descriptor pool
///
/// The pool is never grown; exhausting it is a fatal error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescriptorPoolConfig {
    /// Maximum number of descriptor sets
    pub max_sets: u32,
    /// Uniform buffer descriptors
    pub uniform_buffers: u32,
    /// Combined image sampler descriptors
    pub combined_image_samplers: u32,
    /// Sampled image descriptors
    pub sampled_images: u32,
    /// Sampler descriptors
    pub samplers: u32,
}

impl DescriptorPoolConfig {
    /// Maximum number of texture slots a program may use
    pub const MAX_TEXTURE_SLOTS: u32 = 16;

    fn validate(&self) -> Result<(), String> {
        let sizes = [
            ("max_sets", self.max_sets),
            ("uniform_buffers", self.uniform_buffers),
            ("combined_image_samplers", self.combined_image_samplers),
            ("sampled_images", self.sampled_images),
            ("samplers", self.samplers),
        ];
        for (name, size) in sizes {
            if size == 0 {
                return Err(format!("Descriptor pool size '{name}' must be non-zero"));
            }
        }
        Ok(())
    }
}

impl Default for DescriptorPoolConfig {
    fn default() -> Self {
        let image_descriptors = (10 * Self::MAX_TEXTURE_SLOTS) << 10;
        Self {
            max_sets: 10 << 10,
            uniform_buffers: 10 << 10,
            combined_image_samplers: image_descriptors,
            sampled_images: image_descriptors,
            samplers: image_descriptors,
        }
    }
}

/// # Renderer Configuration
///
/// Configuration of the Vulkan backend: instance metadata, frame pacing,
/// debug features and pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Number of frames the CPU may record ahead of the GPU
    pub frames_in_flight: usize,
    /// Whether to enable Vulkan validation layers (`None` follows the build type)
    pub enable_validation: Option<bool>,
    /// Preferred present mode
    pub present_mode: PresentModePreference,
    /// Descriptor pool capacities
    pub descriptor_pool: DescriptorPoolConfig,
    /// Window parameters
    pub window: WindowConfig,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            frames_in_flight: 2,
            enable_validation: None,
            present_mode: PresentModePreference::Mailbox,
            descriptor_pool: DescriptorPoolConfig::default(),
            window: WindowConfig::default(),
        }
    }

    /// Set the number of frames in flight
    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Set the preferred present mode
    #[must_use]
    pub const fn with_present_mode(mut self, mode: PresentModePreference) -> Self {
        self.present_mode = mode;
        self
    }

    /// Set the descriptor pool capacities
    #[must_use]
    pub fn with_descriptor_pool(mut self, pool: DescriptorPoolConfig) -> Self {
        self.descriptor_pool = pool;
        self
    }

    /// Set the window parameters
    #[must_use]
    pub fn with_window(mut self, window: WindowConfig) -> Self {
        self.window = window;
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.application_name.is_empty() {
            return Err("Application name cannot be empty".to_string());
        }

        if self.frames_in_flight == 0 {
            return Err("Frames in flight must be at least 1".to_string());
        }

        if self.frames_in_flight > 8 {
            return Err("Frames in flight should not exceed 8".to_string());
        }

        if self.window.width == 0 || self.window.height == 0 {
            return Err("Window dimensions must be non-zero".to_string());
        }

        self.descriptor_pool.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("gfx_engine application")
    }
}

/// Engine-wide settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Default log filter (`error`, `warn`, `info`, `debug`, `trace`)
    pub log_level: String,
}

impl EngineConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        match self.log_level.to_ascii_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => Ok(()),
            other => Err(format!("Unknown log level '{other}'")),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Top-level configuration file contents
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Engine settings
    pub engine: EngineConfig,
    /// Renderer settings
    pub renderer: RendererConfig,
}

impl ApplicationConfig {
    /// Load and validate a configuration file
    pub fn load_validated(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate().map_err(ConfigError::Invalid)?;
        Ok(config)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<(), String> {
        self.engine.validate()?;
        self.renderer.validate()
    }

    /// Install the logger with the configured level as its default filter
    pub fn init_logging(&self) {
        crate::foundation::logging::init_with_level(&self.engine.log_level);
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::Builder;

    #[test]
    fn test_default_config_is_valid() {
        let config = ApplicationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.renderer.frames_in_flight, 2);
        assert_eq!(config.renderer.descriptor_pool.uniform_buffers, 10 << 10);
        assert_eq!(config.renderer.descriptor_pool.samplers, 160 << 10);
    }

    #[test]
    fn test_frames_in_flight_bounds() {
        assert!(RendererConfig::default().with_frames_in_flight(0).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(9).validate().is_err());
        assert!(RendererConfig::default().with_frames_in_flight(3).validate().is_ok());
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let pool = DescriptorPoolConfig {
            max_sets: 0,
            ..DescriptorPoolConfig::default()
        };
        let err = RendererConfig::default().with_descriptor_pool(pool).validate().unwrap_err();
        assert!(err.contains("max_sets"));
    }

    #[test]
    fn test_unknown_log_level_rejected() {
        let engine = EngineConfig {
            log_level: "verbose".to_string(),
        };
        assert!(engine.validate().is_err());
    }

    #[test]
    fn test_init_logging_installs_configured_filter() {
        let mut config = ApplicationConfig::default();
        config.engine.log_level = "debug".to_string();
        config.init_logging();
        // A second install is ignored
        config.init_logging();
        assert_ne!(log::max_level(), log::LevelFilter::Off);
    }

    #[test]
    fn test_toml_round_trip() {
        let file = Builder::new().suffix(".toml").tempfile().unwrap();
        let mut config = ApplicationConfig::default();
        config.renderer = config
            .renderer
            .with_frames_in_flight(3)
            .with_present_mode(PresentModePreference::Fifo)
            .with_window(WindowConfig::new("Demo", 640, 480).with_resizable(false));

        config.save_to_file(file.path()).unwrap();
        let loaded = ApplicationConfig::load_validated(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let file = Builder::new().suffix(".ron").tempfile().unwrap();
        let config = ApplicationConfig::default();
        config.save_to_file(file.path()).unwrap();
        let loaded = ApplicationConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = Builder::new().suffix(".json").tempfile().unwrap();
        let result = ApplicationConfig::default().save_to_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_invalid_file_fails_validation() {
        let file = Builder::new().suffix(".toml").tempfile().unwrap();
        let mut config = ApplicationConfig::default();
        config.renderer.frames_in_flight = 0;
        config.save_to_file(file.path()).unwrap();
        let result = ApplicationConfig::load_validated(file.path());
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
