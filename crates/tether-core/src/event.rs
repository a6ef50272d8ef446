//! Inbound protocol events.
//!
//! Every event is an [`InboundEvent`]: a shared [`EventHeader`] plus an [`EventPayload`] that is
//! discriminated by kind. Variant-specific fields are reached with an exhaustive `match` on the
//! payload, or through the `as_*` accessors.
//!
//! Events are immutable once decoded. Message payloads carry a lazily built [`Message`] view of
//! their raw `message` field that is computed at most once per event instance.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;
use crate::message::Message;

// =============================================================================
// Kind
// =============================================================================

/// The four event families, named after their `post_type` marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Message,
    Notice,
    Request,
    Meta,
}

impl EventKind {
    /// The `post_type` value on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Notice => "notice",
            Self::Request => "request",
            Self::Meta => "meta_event",
        }
    }
}

impl FromStr for EventKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // `message_sent` is how some implementations echo the bot's own messages.
            "message" | "message_sent" => Ok(Self::Message),
            "notice" => Ok(Self::Notice),
            "request" => Ok(Self::Request),
            "meta_event" => Ok(Self::Meta),
            other => Err(DecodeError::UnknownEventKind(other.to_string())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Event
// =============================================================================

/// Fields every event carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventHeader {
    /// The bot account that received the event.
    pub self_id: i64,
    /// Unix timestamp in seconds.
    pub time: i64,
}

/// Variant-specific event body.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Message(MessagePayload),
    Notice(NoticePayload),
    Request(RequestPayload),
    Meta(MetaPayload),
}

/// A decoded inbound event.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    header: EventHeader,
    payload: EventPayload,
}

impl InboundEvent {
    pub fn new(header: EventHeader, payload: EventPayload) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &EventHeader {
        &self.header
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Message(_) => EventKind::Message,
            EventPayload::Notice(_) => EventKind::Notice,
            EventPayload::Request(_) => EventKind::Request,
            EventPayload::Meta(_) => EventKind::Meta,
        }
    }

    pub fn self_id(&self) -> i64 {
        self.header.self_id
    }

    pub fn time(&self) -> i64 {
        self.header.time
    }

    /// The user the event originates from, if any.
    pub fn user_id(&self) -> Option<i64> {
        match &self.payload {
            EventPayload::Message(m) => Some(m.user_id),
            EventPayload::Notice(n) => n.user_id,
            EventPayload::Request(r) => Some(r.user_id),
            EventPayload::Meta(_) => None,
        }
    }

    /// The group the event belongs to, if any.
    pub fn group_id(&self) -> Option<i64> {
        match &self.payload {
            EventPayload::Message(m) => m.group_id,
            EventPayload::Notice(n) => n.group_id,
            EventPayload::Request(r) => r.group_id,
            EventPayload::Meta(_) => None,
        }
    }

    pub fn sub_type(&self) -> &str {
        match &self.payload {
            EventPayload::Message(m) => &m.sub_type,
            EventPayload::Notice(n) => &n.sub_type,
            EventPayload::Request(r) => &r.sub_type,
            EventPayload::Meta(m) => &m.sub_type,
        }
    }

    /// Raw message text; empty for non-message events.
    pub fn raw_text(&self) -> &str {
        match &self.payload {
            EventPayload::Message(m) => &m.raw_message,
            _ => "",
        }
    }

    /// Concatenated text segments; empty for non-message events.
    pub fn plain_text(&self) -> String {
        self.as_message()
            .map(|m| m.message().plain_text())
            .unwrap_or_default()
    }

    /// Whether this event happened in a group chat.
    pub fn is_to_group(&self) -> bool {
        match &self.payload {
            EventPayload::Message(m) => m.message_type == MessageType::Group,
            _ => self.group_id().is_some(),
        }
    }

    pub fn as_message(&self) -> Option<&MessagePayload> {
        match &self.payload {
            EventPayload::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_notice(&self) -> Option<&NoticePayload> {
        match &self.payload {
            EventPayload::Notice(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_request(&self) -> Option<&RequestPayload> {
        match &self.payload {
            EventPayload::Request(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_meta(&self) -> Option<&MetaPayload> {
        match &self.payload {
            EventPayload::Meta(m) => Some(m),
            _ => None,
        }
    }
}

// =============================================================================
// Message
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Private,
    Group,
    #[serde(other)]
    Other,
}

/// A chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct MessagePayload {
    pub message_type: MessageType,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub message_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub raw_message: String,
    #[serde(default)]
    pub font: i32,
    #[serde(default)]
    pub sender: Sender,
    #[serde(default, rename = "message")]
    raw: Value,
    #[serde(skip)]
    view: OnceLock<Message>,
}

impl MessagePayload {
    /// The raw `message` field as received.
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// Structured view of the message, built on first access and cached.
    ///
    /// Falls back to parsing `raw_message` as CQ text when the `message` field is absent.
    pub fn message(&self) -> &Message {
        self.view.get_or_init(|| match &self.raw {
            Value::Null => Message::from_cq_string(&self.raw_message),
            raw => Message::from_value(raw),
        })
    }
}

/// Sender details attached to a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sender {
    pub user_id: Option<i64>,
    pub nickname: Option<String>,
    pub card: Option<String>,
    pub sex: Option<String>,
    pub age: Option<i32>,
    pub area: Option<String>,
    pub level: Option<String>,
    pub role: Option<String>,
    pub title: Option<String>,
}

/// Group role of a sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Owner,
    Admin,
    Member,
}

impl Sender {
    /// Parsed group role; `None` for private messages or unknown roles.
    pub fn role(&self) -> Option<Role> {
        match self.role.as_deref()? {
            "owner" => Some(Role::Owner),
            "admin" => Some(Role::Admin),
            "member" => Some(Role::Member),
            _ => None,
        }
    }

    /// Group card if set, otherwise the nickname.
    pub fn display_name(&self) -> &str {
        self.card
            .as_deref()
            .filter(|c| !c.is_empty())
            .or(self.nickname.as_deref())
            .unwrap_or_default()
    }
}

// =============================================================================
// Notice / Request / Meta
// =============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct NoticePayload {
    pub notice_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub operator_id: Option<i64>,
    /// Remaining fields, which vary with `notice_type`.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestPayload {
    pub request_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub comment: String,
    /// Opaque token used to approve or reject the request.
    #[serde(default)]
    pub flag: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetaPayload {
    pub meta_event_type: String,
    #[serde(default)]
    pub sub_type: String,
    #[serde(default)]
    pub status: Map<String, Value>,
    /// Heartbeat interval in milliseconds.
    #[serde(default)]
    pub interval: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_event(raw: Value) -> InboundEvent {
        let payload: MessagePayload = serde_json::from_value(raw).unwrap();
        InboundEvent::new(
            EventHeader {
                self_id: 1,
                time: 2,
            },
            EventPayload::Message(payload),
        )
    }

    #[test]
    fn message_view_is_computed_once() {
        let event = message_event(json!({
            "message_type": "group",
            "user_id": 10,
            "group_id": 20,
            "raw_message": "hi",
            "message": [{"type": "text", "data": {"text": "hi"}}],
        }));
        let payload = event.as_message().unwrap();

        let first: *const Message = payload.message();
        let second: *const Message = payload.message();
        assert!(std::ptr::eq(first, second));
        assert_eq!(event.plain_text(), "hi");
        assert!(event.is_to_group());
        assert_eq!(event.group_id(), Some(20));
    }

    #[test]
    fn message_view_falls_back_to_raw_message() {
        let event = message_event(json!({
            "message_type": "private",
            "user_id": 10,
            "raw_message": "ping [CQ:face,id=1]",
        }));

        let message = event.as_message().unwrap().message();
        assert_eq!(message.len(), 2);
        assert_eq!(message.segments()[1].kind(), "face");
        assert!(!event.is_to_group());
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(matches!(
            "message_reaction".parse::<EventKind>(),
            Err(DecodeError::UnknownEventKind(k)) if k == "message_reaction"
        ));
        assert_eq!("meta_event".parse::<EventKind>().unwrap(), EventKind::Meta);
    }

    #[test]
    fn sender_role_and_name() {
        let sender: Sender = serde_json::from_value(json!({
            "nickname": "alice",
            "card": "",
            "role": "admin",
        }))
        .unwrap();

        assert_eq!(sender.role(), Some(Role::Admin));
        assert_eq!(sender.display_name(), "alice");
    }
}
