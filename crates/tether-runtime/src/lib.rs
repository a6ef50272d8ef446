//! # Tether Runtime
//!
//! Turns a configuration into a running bridge:
//!
//! - [`config`]: layered figment configuration (`tether.toml`, `TETHER_*` variables)
//! - [`logging`]: `tracing-subscriber` setup driven by the `[logging]` section
//! - [`TetherApp`]: builds the connection manager, correlator, bot, dispatcher and adapter
//!   once, then serves the reverse WebSocket endpoint until shutdown
//!
//! ```ignore
//! use tether_runtime::TetherApp;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = TetherApp::load()?;
//!     // register matchers on app.dispatcher() here
//!     app.run().await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod error;
pub mod logging;

pub use app::{AppBuilder, TetherApp};
pub use config::{ConfigError, ConfigLoader, ConfigResult, TetherConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};

// Re-export tracing for use by plugins
pub use tracing;
pub use tracing_subscriber;

/// Logging macros for plugin code.
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
