//! Adapts an axum [`WebSocket`] into a [`TransportSession`].

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt, future};
use tether_core::TransportError;

use crate::session::{Frame, TransportSession};

/// Wraps an upgraded socket. `label` identifies the peer in logs.
pub fn from_websocket(socket: WebSocket, label: impl Into<String>) -> TransportSession {
    let (sink, stream) = socket.split();

    let sink = sink
        .sink_map_err(|e| TransportError::SendFailed(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(to_ws(frame))));
    let stream = stream.map(|message| {
        message
            .map(from_ws)
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))
    });

    TransportSession::new(label, sink, stream)
}

fn to_ws(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(data) => Message::Binary(data.into()),
        Frame::Ping(data) => Message::Ping(data.into()),
        Frame::Pong(data) => Message::Pong(data.into()),
        Frame::Close => Message::Close(None),
    }
}

fn from_ws(message: Message) -> Frame {
    match message {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(data) => Frame::Binary(data.to_vec()),
        Message::Ping(data) => Frame::Ping(data.to_vec()),
        Message::Pong(data) => Frame::Pong(data.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}
