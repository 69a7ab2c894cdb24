//! Logging setup
//!
//! All subsystems log through the `log` facade and tag their messages with a
//! bracketed subsystem name (`[REGISTRY]`, `[PIPELINE]`, `[FRAME]`, ...).

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize logging with a default filter, still overridable through `RUST_LOG`
///
/// Safe to call more than once; later calls are ignored.
pub fn init_with_level(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env).try_init();
}
