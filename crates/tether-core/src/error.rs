//! Error types shared across the tether crates.
//!
//! The taxonomy follows the blast radius of each failure:
//!
//! - [`TransportError`]: socket-level failures. They end the session they occur on.
//! - [`DecodeError`]: one inbound frame could not be classified or parsed. Only that frame is lost.
//! - [`ApiError`]: one outbound call failed (backpressure, timeout, remote error).
//!
//! Dispatch-side errors live in `tether-framework`.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Transport
// =============================================================================

/// Errors raised by a transport session or the connection manager.
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    /// No session is currently live.
    #[error("no live session")]
    NotConnected,

    /// The bounded outbound queue is saturated.
    #[error("outbound queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },

    /// The remote end closed the connection.
    #[error("connection closed: {reason}")]
    ConnectionClosed { reason: String },

    /// Writing a frame to the socket failed.
    #[error("failed to send frame: {0}")]
    SendFailed(String),

    /// Reading a frame from the socket failed.
    #[error("failed to receive frame: {0}")]
    ReceiveFailed(String),

    /// A write did not complete within the write deadline.
    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

// =============================================================================
// Decoding
// =============================================================================

/// Errors raised while classifying or parsing an inbound frame.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    /// The frame is not a JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame carries a `post_type` this bridge does not know.
    #[error("unknown event kind '{0}'")]
    UnknownEventKind(String),

    /// The frame carries neither an `echo` nor a `post_type`.
    #[error("frame carries neither an echo nor a post_type")]
    Unclassified,

    /// The envelope was recognised but the variant body did not parse.
    #[error("invalid {kind} event: {reason}")]
    InvalidEvent { kind: &'static str, reason: String },

    /// The frame looked like an API reply but did not parse as one.
    #[error("invalid API reply: {0}")]
    InvalidReply(String),
}

impl DecodeError {
    pub(crate) fn invalid_event(kind: &'static str, err: impl std::fmt::Display) -> Self {
        Self::InvalidEvent {
            kind,
            reason: err.to_string(),
        }
    }
}

/// Result type for decoding operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

// =============================================================================
// API calls
// =============================================================================

/// Errors returned from an outbound API call.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// No session is live, or the session closed while the call was pending.
    #[error("bot is not connected")]
    NotConnected,

    /// The outbound queue was saturated; the request was never sent.
    #[error("outbound queue is full")]
    QueueFull,

    /// No reply arrived within the call timeout.
    #[error("call '{action}' timed out after {timeout:?}")]
    Timeout { action: String, timeout: Duration },

    /// The session the call was issued on was replaced before the reply arrived.
    #[error("session was replaced before the reply arrived")]
    SessionReplaced,

    /// The remote end answered with a failure status.
    #[error("API '{action}' failed with retcode {retcode}: {message}")]
    Failed {
        action: String,
        retcode: i64,
        message: String,
    },

    /// Parameters or response data could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A reply was requested for an event that has no chat to reply to.
    #[error("event has no chat to reply to")]
    MissingTarget,

    /// Any other transport failure.
    #[error(transparent)]
    Transport(TransportError),
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::QueueFull { .. } => Self::QueueFull,
            other => Self::Transport(other),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_backpressure_maps_to_api_queue_full() {
        let err: ApiError = TransportError::QueueFull { capacity: 4 }.into();
        assert!(matches!(err, ApiError::QueueFull));

        let err: ApiError = TransportError::NotConnected.into();
        assert!(matches!(err, ApiError::NotConnected));

        let err: ApiError = TransportError::SendFailed("broken pipe".into()).into();
        assert!(matches!(err, ApiError::Transport(_)));
    }
}
