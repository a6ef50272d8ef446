//! Transport sessions: one duplex connection seen as a frame sink plus a frame stream.

use std::fmt;
use std::pin::Pin;

use futures::{Sink, Stream};
use tether_core::{TransportError, TransportResult};

/// A transport frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

impl Frame {
    /// The application payload of a data frame.
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text) => Some(text.as_bytes()),
            Self::Binary(data) => Some(data),
            _ => None,
        }
    }
}

/// Outbound half of a session.
pub type FrameSink = Pin<Box<dyn Sink<Frame, Error = TransportError> + Send>>;

/// Inbound half of a session.
pub type FrameStream = Pin<Box<dyn Stream<Item = TransportResult<Frame>> + Send>>;

/// Identity of one accepted session, unique for the lifetime of a connection manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One physical duplex connection, not yet owned by a connection manager.
pub struct TransportSession {
    label: String,
    sink: FrameSink,
    stream: FrameStream,
}

impl TransportSession {
    /// Wraps a sink/stream pair. `label` describes the peer in logs.
    pub fn new<Si, St>(label: impl Into<String>, sink: Si, stream: St) -> Self
    where
        Si: Sink<Frame, Error = TransportError> + Send + 'static,
        St: Stream<Item = TransportResult<Frame>> + Send + 'static,
    {
        Self {
            label: label.into(),
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub(crate) fn into_parts(self) -> (FrameSink, FrameStream) {
        (self.sink, self.stream)
    }
}

impl fmt::Debug for TransportSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportSession")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}
