//! # Tether Core
//!
//! Protocol-level building blocks shared by every tether crate.
//!
//! - **Messages**: [`Message`] and [`Segment`], with array and CQ-string wire forms
//! - **Events**: [`InboundEvent`], one sum type over message, notice, request and meta events
//! - **Codec**: [`decode`] classifies an inbound frame as an API reply or an event;
//!   [`ApiRequest`] / [`ApiResponse`] are the call envelopes
//! - **Call surface**: the [`Bot`] trait and its typed helpers in [`BotExt`]
//! - **Errors**: [`TransportError`], [`DecodeError`] and [`ApiError`]
//!
//! ```text
//! frame ──▶ decode ──┬──▶ Decoded::Reply(ApiResponse) ──▶ correlator
//!                    └──▶ Decoded::Event(InboundEvent) ──▶ dispatcher
//! ```

pub mod bot;
pub mod codec;
pub mod error;
pub mod event;
pub mod message;

pub use bot::{Bot, BotExt, BoxedBot, LoginInfo, MessageId};
pub use codec::{ApiRequest, ApiResponse, Decoded, decode};
pub use error::{
    ApiError, ApiResult, DecodeError, DecodeResult, TransportError, TransportResult,
};
pub use event::{
    EventHeader, EventKind, EventPayload, InboundEvent, MessagePayload, MessageType, MetaPayload,
    NoticePayload, RequestPayload, Role, Sender,
};
pub use message::{Message, Segment};
