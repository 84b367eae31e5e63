//! Layered configuration for the Gobby daemon.
//!
//! Embedded defaults merged with `~/.gobby/config.toml` and a small set
//! of environment overrides, validated after merge. The HTTP boundary's
//! template endpoints round-trip through [`template`], which persists
//! only values that differ from the defaults.

pub mod error;
pub mod loader;
pub mod template;
pub mod types;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::load;
pub use types::Config;
