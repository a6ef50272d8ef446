//! Error types for the dispatch pipeline.

use std::time::Duration;

use thiserror::Error;

use crate::dependency::Capability;

/// Errors produced while dispatching one event.
///
/// All variants are scoped to a single dispatch cycle; none of them affect the session.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// No matcher accepted the event.
    #[error("no matcher accepted the event")]
    NoMatchingRule,

    /// A handler parameter could not be supplied; only that handler was skipped.
    #[error("handler '{handler}' could not resolve {capability}")]
    UnresolvedDependency {
        handler: String,
        capability: Capability,
    },

    /// A handler returned an error.
    #[error("handler '{handler}' failed: {error:#}")]
    Handler {
        handler: String,
        error: anyhow::Error,
    },

    /// A middleware rejected the event.
    #[error("middleware '{middleware}' rejected the event: {message}")]
    Middleware { middleware: String, message: String },

    /// The dispatch cycle exceeded its time limit.
    #[error("dispatch timed out after {0:?}")]
    TimedOut(Duration),

    /// The sender exceeded the configured rate.
    #[error("user {user_id} exceeded the rate limit")]
    RateLimited { user_id: i64 },

    /// A handler or middleware panicked.
    #[error("dispatch panicked: {0}")]
    Panicked(String),
}

impl DispatchError {
    /// Creates a middleware rejection.
    pub fn middleware(middleware: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Middleware {
            middleware: middleware.into(),
            message: message.into(),
        }
    }
}

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;
