//! # Tether
//!
//! A bridge for the OneBot v11 reverse WebSocket protocol: the chat implementation connects
//! in, events flow through a prioritized matcher pipeline, and handlers call the API back over
//! the same connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ frames ┌───────────────────┐ Reply  ┌────────────┐
//! │ WebSocket │───────▶│ ConnectionManager │───────▶│ Correlator │◀── OneBotBot::call_api
//! │ endpoint  │◀───────│ one live session  │        └────────────┘
//! └───────────┘ queue  └───────────────────┘
//!                               │ Event
//!                               ▼
//!                        ┌────────────┐    ┌──────────┐    ┌──────────────────────┐
//!                        │ Dispatcher │───▶│middleware│───▶│ matchers by priority │──▶ handlers
//!                        └────────────┘    └──────────┘    └──────────────────────┘
//! ```
//!
//! - [`transport`]: session abstraction, the connection manager and the axum endpoint
//! - [`core`]: events, messages, wire envelopes and the [`Bot`](core::Bot) call surface
//! - [`framework`]: rules, permissions, matchers, middleware and parameter injection
//! - [`onebot`]: call correlation and frame routing
//! - [`runtime`]: configuration, logging and [`TetherApp`](runtime::TetherApp)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tether::prelude::*;
//!
//! async fn ping(event: MessageEvent, bot: BoxedBot) -> anyhow::Result<()> {
//!     bot.reply(&event, "pong").await?;
//!     Ok(())
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let app = TetherApp::load()?;
//!     app.dispatcher().register(app.command(["/ping"]).name("ping").handler(ping));
//!     app.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` *(default)*: TOML configuration files
//! - `yaml-config`: YAML configuration files
//! - `json-log`: JSON log format

pub use tether_adapter_onebot as onebot;
pub use tether_core as core;
pub use tether_framework as framework;
pub use tether_runtime as runtime;
pub use tether_transport as transport;

/// Commonly used types for writing handlers and starting the app.
///
/// ```rust,ignore
/// use tether::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use tether_runtime::{TetherApp, TetherConfig};

    // Matching
    pub use tether_framework::{
        DEFAULT_PRIORITY, Matcher, Permission, Predicate, Rule, all, any, not, permission, rule,
    };

    // Handler parameters
    pub use tether_framework::{
        CommandArgs, DispatchContext, MessageEvent, MetaEvent, NoticeEvent, RegexMatch,
        RequestEvent, Shared, Superusers,
    };

    // Middleware
    pub use tether_framework::{Middleware, Next, from_fn, middleware};

    // Calling the API
    pub use tether_core::{ApiError, Bot, BotExt, BoxedBot, InboundEvent, Message, Segment};
}
