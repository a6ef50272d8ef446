//! In-process transport.
//!
//! [`pair`] returns a [`TransportSession`] for the connection manager and a [`MemoryPeer`] that
//! plays the remote end: it sees every frame the manager writes and can inject inbound frames.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use futures::Sink;
use futures::StreamExt;
use futures::channel::mpsc;
use tether_core::{TransportError, TransportResult};

use crate::session::{Frame, TransportSession};

/// The remote end of an in-memory session.
pub struct MemoryPeer {
    outbound: mpsc::UnboundedReceiver<Frame>,
    inbound: mpsc::UnboundedSender<TransportResult<Frame>>,
    closes: Arc<AtomicUsize>,
}

/// Creates a connected in-memory session and its peer.
pub fn pair(label: impl Into<String>) -> (TransportSession, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded();
    let (in_tx, in_rx) = mpsc::unbounded();
    let closes = Arc::new(AtomicUsize::new(0));

    let sink = MemorySink {
        tx: out_tx,
        closes: closes.clone(),
    };
    let session = TransportSession::new(label, sink, in_rx);
    let peer = MemoryPeer {
        outbound: out_rx,
        inbound: in_tx,
        closes,
    };
    (session, peer)
}

impl MemoryPeer {
    /// Delivers a frame to the session's receive side.
    pub fn push(&self, frame: Frame) -> bool {
        self.inbound.unbounded_send(Ok(frame)).is_ok()
    }

    /// Delivers a text frame.
    pub fn push_text(&self, text: impl Into<String>) -> bool {
        self.push(Frame::Text(text.into()))
    }

    /// Delivers a receive error.
    pub fn push_error(&self, error: TransportError) -> bool {
        self.inbound.unbounded_send(Err(error)).is_ok()
    }

    /// Waits for the next frame written by the session; `None` once the sink is closed.
    pub async fn next_frame(&mut self) -> Option<Frame> {
        self.outbound.next().await
    }

    /// Waits for the next data frame, skipping heartbeats.
    pub async fn next_text(&mut self) -> Option<String> {
        loop {
            match self.next_frame().await? {
                Frame::Text(text) => return Some(text),
                Frame::Binary(data) => return Some(String::from_utf8_lossy(&data).into_owned()),
                _ => continue,
            }
        }
    }

    /// Ends the inbound stream, as if the remote closed the socket.
    pub fn hang_up(&self) {
        self.inbound.close_channel();
    }

    /// How many times the session closed its sink.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct MemorySink {
    tx: mpsc::UnboundedSender<Frame>,
    closes: Arc<AtomicUsize>,
}

impl Sink<Frame> for MemorySink {
    type Error = TransportError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.tx.is_closed() {
            Poll::Ready(Err(TransportError::ConnectionClosed {
                reason: "peer dropped".into(),
            }))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<(), Self::Error> {
        self.tx
            .unbounded_send(item)
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.tx.close_channel();
        Poll::Ready(Ok(()))
    }
}
