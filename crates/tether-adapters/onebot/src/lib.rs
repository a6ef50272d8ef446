//! # OneBot v11 adapter
//!
//! Glues the connection manager to the dispatcher for the OneBot v11 reverse WebSocket
//! protocol:
//!
//! ```text
//! ConnectionManager ──frame──▶ OneBotAdapter ──Reply──▶ Correlator ──▶ waiting call
//!                                   │
//!                                   └──Event──▶ Dispatcher (own task, OneBotBot attached)
//! ```
//!
//! Outbound calls go the other way: [`OneBotBot::call_api`](tether_core::Bot::call_api) tags
//! the request with an `echo` token, enqueues it on the manager and waits for the reply that
//! carries the same token.

pub mod adapter;
pub mod bot;
pub mod correlator;

pub use adapter::OneBotAdapter;
pub use bot::{DEFAULT_API_TIMEOUT, OneBotBot};
pub use correlator::Correlator;
