//! # Tether Transport
//!
//! Session plumbing between the network and the protocol layer.
//!
//! - [`TransportSession`]: one duplex connection as a [`Frame`] sink plus a frame stream
//! - [`ConnectionManager`]: owns the single live session, replaces it on reconnect, runs the
//!   send/heartbeat and receive loops, and hands inbound payloads to a [`FrameHandler`]
//! - [`memory`]: an in-process transport for tests and embedding
//! - `server` *(feature `ws-server`, default)*: axum routes for the WebSocket upgrade endpoint and
//!   the liveness endpoint

pub mod manager;
pub mod memory;
pub mod session;

#[cfg(feature = "ws-server")]
pub mod server;
#[cfg(feature = "ws-server")]
pub mod websocket;

pub use manager::{CloseReason, ConnectionManager, ConnectionStats, FrameHandler, ManagerConfig};
pub use session::{Frame, FrameSink, FrameStream, SessionId, TransportSession};

#[cfg(feature = "ws-server")]
pub use server::{DEFAULT_WS_PATH, ServerState, router, serve};
