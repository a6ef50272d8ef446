//! Configuration for the tether runtime.
//!
//! Settings are layered by [`ConfigLoader`] from defaults, files and `TETHER_*` environment
//! variables, then checked by [`validate_config`].

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    ApiConfig, BotConfig, ConnectionConfig, LogFormat, LogLevel, LogOutput, LogRotation,
    LoggingConfig, ServerConfig, SpanEventConfig, TetherConfig,
};
pub use validation::validate_config;
