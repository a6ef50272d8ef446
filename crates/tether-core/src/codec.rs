//! Wire envelopes and the inbound frame decoder.
//!
//! Decoding is two-phase: the frame is first parsed into a loose JSON object to find its
//! discriminating fields, then the matching variant is parsed in full.
//!
//! | Field present     | Result                         |
//! |-------------------|--------------------------------|
//! | string `echo`     | [`Decoded::Reply`]             |
//! | `post_type`       | [`Decoded::Event`]             |
//! | neither           | [`DecodeError::Unclassified`]  |

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult, DecodeError, DecodeResult};
use crate::event::{EventHeader, EventKind, EventPayload, InboundEvent};

// =============================================================================
// Envelopes
// =============================================================================

/// Outbound API request: `{action, params, echo}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiRequest {
    pub action: String,
    #[serde(default)]
    pub params: Value,
    pub echo: String,
}

impl ApiRequest {
    /// Serializes the request to its JSON text form.
    pub fn to_json(&self) -> ApiResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound API reply: `{status, retcode, data, echo}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub retcode: i64,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub echo: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wording: Option<String>,
}

impl ApiResponse {
    /// Whether the remote end reported success.
    pub fn is_ok(&self) -> bool {
        self.retcode == 0 && self.status != "failed"
    }

    /// Human-readable failure description.
    pub fn error_message(&self) -> String {
        self.wording
            .clone()
            .or_else(|| self.message.clone())
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| self.status.clone())
    }

    /// Converts into `data`, turning a failure status into [`ApiError::Failed`].
    pub fn into_result(self, action: &str) -> ApiResult<Value> {
        if self.is_ok() {
            Ok(self.data)
        } else {
            Err(ApiError::Failed {
                action: action.to_string(),
                retcode: self.retcode,
                message: self.error_message(),
            })
        }
    }

    /// Re-decodes `data` into a typed response.
    pub fn data_as<T: DeserializeOwned>(&self) -> ApiResult<T> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

// =============================================================================
// Decoder
// =============================================================================

/// A classified inbound frame.
#[derive(Debug)]
pub enum Decoded {
    Reply(ApiResponse),
    Event(InboundEvent),
}

/// Classifies and parses one inbound frame.
pub fn decode(frame: &[u8]) -> DecodeResult<Decoded> {
    let envelope: Value =
        serde_json::from_slice(frame).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(mut fields) = envelope else {
        return Err(DecodeError::Malformed("frame is not a JSON object".into()));
    };

    if matches!(fields.get("echo"), Some(Value::String(_))) {
        return serde_json::from_value(Value::Object(fields))
            .map(Decoded::Reply)
            .map_err(|e| DecodeError::InvalidReply(e.to_string()));
    }

    let kind = match fields.remove("post_type") {
        Some(Value::String(post_type)) => post_type.parse::<EventKind>()?,
        Some(other) => return Err(DecodeError::UnknownEventKind(other.to_string())),
        None => return Err(DecodeError::Unclassified),
    };

    let header = EventHeader {
        self_id: take_i64(&mut fields, "self_id")
            .ok_or_else(|| DecodeError::invalid_event(kind.as_str(), "missing self_id"))?,
        time: take_i64(&mut fields, "time").unwrap_or_default(),
    };

    let payload = match kind {
        EventKind::Message => EventPayload::Message(parse_body(kind, fields)?),
        EventKind::Notice => EventPayload::Notice(parse_body(kind, fields)?),
        EventKind::Request => EventPayload::Request(parse_body(kind, fields)?),
        EventKind::Meta => EventPayload::Meta(parse_body(kind, fields)?),
    };

    Ok(Decoded::Event(InboundEvent::new(header, payload)))
}

fn parse_body<T: DeserializeOwned>(kind: EventKind, fields: Map<String, Value>) -> DecodeResult<T> {
    serde_json::from_value(Value::Object(fields))
        .map_err(|e| DecodeError::invalid_event(kind.as_str(), e))
}

/// Removes an integer field, accepting numeric strings as some implementations send them.
fn take_i64(fields: &mut Map<String, Value>, key: &str) -> Option<i64> {
    match fields.remove(key)? {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode_value(value: Value) -> DecodeResult<Decoded> {
        decode(value.to_string().as_bytes())
    }

    #[test]
    fn echo_marks_a_reply() {
        let decoded = decode_value(json!({
            "status": "ok",
            "retcode": 0,
            "data": {"message_id": 7},
            "echo": "send_msg-abc",
        }))
        .unwrap();

        let Decoded::Reply(reply) = decoded else {
            panic!("expected a reply");
        };
        assert_eq!(reply.echo, "send_msg-abc");
        assert!(reply.is_ok());
        assert_eq!(reply.data["message_id"], 7);
    }

    #[test]
    fn post_type_marks_an_event() {
        let decoded = decode_value(json!({
            "post_type": "message",
            "message_type": "private",
            "self_id": 100,
            "time": 1700000000,
            "user_id": 42,
            "message_id": 1,
            "raw_message": "hello",
            "message": [{"type": "text", "data": {"text": "hello"}}],
            "sender": {"user_id": 42, "nickname": "bob"},
        }))
        .unwrap();

        let Decoded::Event(event) = decoded else {
            panic!("expected an event");
        };
        assert_eq!(event.kind(), EventKind::Message);
        assert_eq!(event.self_id(), 100);
        assert_eq!(event.user_id(), Some(42));
        assert_eq!(event.plain_text(), "hello");
    }

    #[test]
    fn notice_extra_keeps_variant_fields_only() {
        let decoded = decode_value(json!({
            "post_type": "notice",
            "notice_type": "group_recall",
            "self_id": "100",
            "time": 1,
            "group_id": 5,
            "user_id": 6,
            "operator_id": 6,
            "message_id": 99,
        }))
        .unwrap();

        let Decoded::Event(event) = decoded else {
            panic!("expected an event");
        };
        let notice = event.as_notice().unwrap();
        assert_eq!(event.self_id(), 100);
        assert_eq!(notice.notice_type, "group_recall");
        assert_eq!(notice.operator_id, Some(6));
        assert_eq!(notice.extra.get("message_id"), Some(&json!(99)));
        assert!(!notice.extra.contains_key("post_type"));
        assert!(!notice.extra.contains_key("time"));
    }

    #[test]
    fn meta_event_carries_status() {
        let decoded = decode_value(json!({
            "post_type": "meta_event",
            "meta_event_type": "heartbeat",
            "self_id": 1,
            "time": 1,
            "interval": 5000,
            "status": {"online": true, "good": true},
        }))
        .unwrap();

        let Decoded::Event(event) = decoded else {
            panic!("expected an event");
        };
        let meta = event.as_meta().unwrap();
        assert_eq!(meta.interval, Some(5000));
        assert_eq!(meta.status.get("online"), Some(&json!(true)));
    }

    #[test]
    fn unknown_post_type_is_surfaced() {
        let err = decode_value(json!({"post_type": "reaction", "self_id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEventKind(k) if k == "reaction"));
    }

    #[test]
    fn frames_without_markers_are_unclassified() {
        let err = decode_value(json!({"hello": "world"})).unwrap_err();
        assert!(matches!(err, DecodeError::Unclassified));
    }

    #[test]
    fn malformed_frames_are_reported() {
        assert!(matches!(decode(b"{not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(decode(b"[1, 2]"), Err(DecodeError::Malformed(_))));
    }

    #[test]
    fn invalid_bodies_name_their_kind() {
        let err = decode_value(json!({"post_type": "request", "self_id": 1})).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidEvent { kind: "request", .. }));
    }

    #[test]
    fn failed_reply_becomes_api_error() {
        let reply = ApiResponse {
            status: "failed".into(),
            retcode: 100,
            wording: Some("group not found".into()),
            ..Default::default()
        };

        match reply.into_result("send_group_msg") {
            Err(ApiError::Failed {
                action,
                retcode,
                message,
            }) => {
                assert_eq!(action, "send_group_msg");
                assert_eq!(retcode, 100);
                assert_eq!(message, "group not found");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn request_serializes_to_envelope() {
        let request = ApiRequest {
            action: "get_login_info".into(),
            params: json!({}),
            echo: "get_login_info-1".into(),
        };
        let value: Value = serde_json::from_str(&request.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"action": "get_login_info", "params": {}, "echo": "get_login_info-1"})
        );
    }
}
