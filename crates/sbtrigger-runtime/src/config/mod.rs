//! Host configuration.
//!
//! Sources are merged in this order, later ones winning:
//!
//! 1. Built-in defaults
//! 2. Configuration files (`sbtrigger.toml`, `sbtrigger.yaml`)
//! 3. Environment variables (`SBTRIGGER_` prefix, `__` for nesting)
//! 4. Programmatic overrides
//!
//! ```rust,ignore
//! use sbtrigger_runtime::config::ConfigLoader;
//!
//! let config = ConfigLoader::new()
//!     .file("sbtrigger.toml")
//!     .load()?;
//! let conn = config.connection("ServiceBus")?;
//! ```

mod error;
mod loader;
mod schema;
mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    DEFAULT_CONNECTION_NAME, LogFormat, LogLevel, LogOutput, LogRotation, LoggingConfig,
    SpanEventConfig, TriggerHostConfig,
};
pub use validation::validate_config;
