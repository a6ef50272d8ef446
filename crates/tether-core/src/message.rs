//! Message and segment model.
//!
//! A [`Message`] is an ordered list of [`Segment`]s; order is display order. A segment is a type
//! tag plus an open key/value payload, so segment kinds the bridge has never heard of survive a
//! decode/encode cycle untouched.
//!
//! Two wire formats are accepted on input:
//! - **Array format**: `[{"type": "text", "data": {"text": "hi"}}, ...]`
//! - **String format**: CQ-coded text such as `hi[CQ:at,qq=123]`
//!
//! Messages are always written back in array format.
//!
//! # Example
//!
//! ```rust,ignore
//! use tether_core::{Message, Segment};
//!
//! let msg = Message::new().text("Hello, ").at(10001000).text("!");
//! assert_eq!(msg.plain_text(), "Hello, !");
//! ```

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ============================================================================
// Segment
// ============================================================================

/// One element of a message: a type tag and its payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Map<String, Value>,
}

impl Segment {
    /// Creates a segment from a type tag and payload.
    pub fn new(kind: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    fn with(kind: &str, key: &str, value: impl Into<String>) -> Self {
        let mut data = Map::new();
        data.insert(key.to_string(), Value::String(value.into()));
        Self::new(kind, data)
    }

    /// Plain text.
    pub fn text(text: impl Into<String>) -> Self {
        Self::with("text", "text", text)
    }

    /// Mentions a user.
    pub fn at(target: impl fmt::Display) -> Self {
        Self::with("at", "qq", target.to_string())
    }

    /// Mentions everyone in the group.
    pub fn at_all() -> Self {
        Self::with("at", "qq", "all")
    }

    /// Built-in face/emoji.
    pub fn face(id: impl fmt::Display) -> Self {
        Self::with("face", "id", id.to_string())
    }

    /// Image by file name, URL or base64 URI.
    pub fn image(file: impl Into<String>) -> Self {
        Self::with("image", "file", file)
    }

    /// Voice recording.
    pub fn record(file: impl Into<String>) -> Self {
        Self::with("record", "file", file)
    }

    /// Quotes an earlier message.
    pub fn reply(message_id: impl fmt::Display) -> Self {
        Self::with("reply", "id", message_id.to_string())
    }

    /// The segment's type tag.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The segment's payload.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Looks up one payload field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Looks up one payload field as a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(Value::as_str)
    }

    /// Returns the text if this is a text segment.
    pub fn as_text(&self) -> Option<&str> {
        if self.kind == "text" {
            self.get_str("text")
        } else {
            None
        }
    }

    /// Renders this segment as CQ code (or escaped text for text segments).
    pub fn to_cq(&self) -> String {
        if let Some(text) = self.as_text() {
            return escape_cq_text(text);
        }
        let mut out = format!("[CQ:{}", self.kind);
        for (key, value) in &self.data {
            let value = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            out.push(',');
            out.push_str(key);
            out.push('=');
            out.push_str(&escape_cq_value(&value));
        }
        out.push(']');
        out
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_text() {
            Some(text) => f.write_str(text),
            None => write!(f, "[{}]", self.kind),
        }
    }
}

// ============================================================================
// Message
// ============================================================================

/// An ordered sequence of segments.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    segments: Vec<Segment>,
}

impl Message {
    /// Creates an empty message.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message from segments.
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    /// Parses a CQ-coded string.
    pub fn from_cq_string(input: &str) -> Self {
        Self::from_segments(parse_cq_string(input))
    }

    /// Builds a message from a raw wire value, which may be an array of segments or a CQ string.
    ///
    /// Anything else yields an empty message.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Self::from_cq_string(s),
            Value::Array(_) => Vec::<Segment>::deserialize(value)
                .map(Self::from_segments)
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }

    /// Appends a text segment.
    pub fn text(self, text: impl Into<String>) -> Self {
        self.segment(Segment::text(text))
    }

    /// Appends a mention.
    pub fn at(self, target: impl fmt::Display) -> Self {
        self.segment(Segment::at(target))
    }

    /// Appends an image.
    pub fn image(self, file: impl Into<String>) -> Self {
        self.segment(Segment::image(file))
    }

    /// Appends a face.
    pub fn face(self, id: impl fmt::Display) -> Self {
        self.segment(Segment::face(id))
    }

    /// Appends a reply reference.
    pub fn reply(self, message_id: impl fmt::Display) -> Self {
        self.segment(Segment::reply(message_id))
    }

    /// Appends an arbitrary segment.
    pub fn segment(mut self, segment: Segment) -> Self {
        self.segments.push(segment);
        self
    }

    /// Pushes a segment in place.
    pub fn push(&mut self, segment: Segment) -> &mut Self {
        self.segments.push(segment);
        self
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn into_segments(self) -> Vec<Segment> {
        self.segments
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Segment> {
        self.segments.iter()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Concatenates the text segments, dropping everything else.
    pub fn plain_text(&self) -> String {
        self.segments.iter().filter_map(Segment::as_text).collect()
    }

    /// Renders the whole message as a CQ string.
    pub fn to_cq_string(&self) -> String {
        self.segments.iter().map(Segment::to_cq).collect()
    }

    /// User ids mentioned by `at` segments, excluding `all`.
    pub fn mentioned_users(&self) -> Vec<i64> {
        self.segments
            .iter()
            .filter(|s| s.kind() == "at")
            .filter_map(|s| s.get_str("qq").and_then(|qq| qq.parse().ok()))
            .collect()
    }
}

impl Serialize for Message {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.segments.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire {
            Array(Vec<Segment>),
            String(String),
        }

        match Wire::deserialize(deserializer)? {
            Wire::Array(segments) => Ok(Self::from_segments(segments)),
            Wire::String(cq) => Ok(Self::from_cq_string(&cq)),
        }
    }
}

impl From<Vec<Segment>> for Message {
    fn from(segments: Vec<Segment>) -> Self {
        Self::from_segments(segments)
    }
}

impl From<Segment> for Message {
    fn from(segment: Segment) -> Self {
        Self::from_segments(vec![segment])
    }
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Self::new().text(text)
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Self::new().text(text)
    }
}

impl FromIterator<Segment> for Message {
    fn from_iter<T: IntoIterator<Item = Segment>>(iter: T) -> Self {
        Self::from_segments(iter.into_iter().collect())
    }
}

impl IntoIterator for Message {
    type Item = Segment;
    type IntoIter = std::vec::IntoIter<Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.into_iter()
    }
}

impl<'a> IntoIterator for &'a Message {
    type Item = &'a Segment;
    type IntoIter = std::slice::Iter<'a, Segment>;

    fn into_iter(self) -> Self::IntoIter {
        self.segments.iter()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.segments {
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

// ============================================================================
// CQ code
// ============================================================================

const CQ_OPEN: [char; 4] = ['[', 'C', 'Q', ':'];

/// Parses a CQ-coded string into segments.
///
/// Every CQ code becomes a segment of the same name with string-valued fields; the text between
/// codes becomes text segments.
pub fn parse_cq_string(input: &str) -> Vec<Segment> {
    let chars: Vec<char> = input.chars().collect();
    let len = chars.len();
    let opens_at = |pos: usize| pos + 4 <= len && chars[pos..pos + 4] == CQ_OPEN;

    let mut segments = Vec::new();
    let mut pos = 0;

    while pos < len {
        if opens_at(pos) {
            pos += 4;

            let kind_start = pos;
            while pos < len && chars[pos] != ',' && chars[pos] != ']' {
                pos += 1;
            }
            let kind: String = chars[kind_start..pos].iter().collect();

            let mut data = Map::new();
            while pos < len && chars[pos] == ',' {
                pos += 1;

                let key_start = pos;
                while pos < len && chars[pos] != '=' && chars[pos] != ']' && chars[pos] != ',' {
                    pos += 1;
                }
                let key: String = chars[key_start..pos].iter().collect();

                if pos < len && chars[pos] == '=' {
                    pos += 1;
                    let value_start = pos;
                    while pos < len && chars[pos] != ',' && chars[pos] != ']' {
                        pos += 1;
                    }
                    let value: String = chars[value_start..pos].iter().collect();
                    data.insert(key, Value::String(unescape_cq(&value)));
                }
            }

            if pos < len && chars[pos] == ']' {
                pos += 1;
            }

            segments.push(Segment::new(kind, data));
        } else {
            let start = pos;
            while pos < len && !opens_at(pos) {
                pos += 1;
            }
            let text: String = chars[start..pos].iter().collect();
            let text = unescape_cq(&text);
            if !text.is_empty() {
                segments.push(Segment::text(text));
            }
        }
    }

    segments
}

/// Escapes `&`, `[` and `]` in plain text.
pub fn escape_cq_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('[', "&#91;")
        .replace(']', "&#93;")
}

/// Escapes `&`, `[`, `]` and `,` in CQ parameter values.
pub fn escape_cq_value(value: &str) -> String {
    escape_cq_text(value).replace(',', "&#44;")
}

/// Reverses [`escape_cq_value`] (and therefore [`escape_cq_text`]).
pub fn unescape_cq(text: &str) -> String {
    text.replace("&#91;", "[")
        .replace("&#93;", "]")
        .replace("&#44;", ",")
        .replace("&amp;", "&")
}

// ============================================================================
// Tests
// ============================================================================
