//! Message envelope flowing between processing stages.

use crate::headers::{Headers, CONTENT_TYPE};
use crate::ids::{new_message_id, now_ms};
use bytes::Bytes;
use serde_json::Value as JsonValue;

/// Message body.
///
/// The variant records what the producer handed over; it is never changed
/// while headers are being propagated. Encoding to bytes happens at the
/// transport boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Opaque bytes, emitted unchanged.
    Bytes(Bytes),
    /// A string produced by a handler.
    Text(String),
    /// A structured value.
    Json(JsonValue),
}

impl Payload {
    /// Borrow the payload as text when it is a `Text` payload or UTF-8 bytes.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s.as_str()),
            Payload::Bytes(b) => std::str::from_utf8(b).ok(),
            Payload::Json(_) => None,
        }
    }

    /// Raw byte view without any content-type processing.
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        match self {
            Payload::Bytes(b) => Ok(b.clone()),
            Payload::Text(s) => Ok(Bytes::copy_from_slice(s.as_bytes())),
            Payload::Json(v) => serde_json::to_vec(v).map(Bytes::from),
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::Text(s.to_owned())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::Text(s)
    }
}

impl From<Bytes> for Payload {
    fn from(b: Bytes) -> Self {
        Payload::Bytes(b)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(b: Vec<u8>) -> Self {
        Payload::Bytes(Bytes::from(b))
    }
}

impl From<JsonValue> for Payload {
    fn from(v: JsonValue) -> Self {
        Payload::Json(v)
    }
}

/// A payload plus its headers.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Unique message id, regenerated for every message (never propagated).
    pub id: String,
    /// Creation timestamp in millis since epoch.
    pub timestamp_ms: u64,
    /// Out-of-band attributes.
    pub headers: Headers,
    /// Message body.
    pub payload: Payload,
}

impl Message {
    /// Construct a message with a fresh id and timestamp.
    pub fn new(payload: impl Into<Payload>, headers: Headers) -> Self {
        Self { id: new_message_id(), timestamp_ms: now_ms(), headers, payload: payload.into() }
    }

    /// Rebuild a message with a known identity (e.g. read back from a transport).
    pub fn from_parts(
        id: impl Into<String>,
        timestamp_ms: u64,
        headers: Headers,
        payload: Payload,
    ) -> Self {
        Self { id: id.into(), timestamp_ms, headers, payload }
    }

    /// Header value by exact name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Value of the `contentType` header, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE)
    }
}

/// Fluent construction of a [`Message`].
///
/// ```
/// use stream_core::{MessageBuilder, Payload};
///
/// let m = MessageBuilder::with_payload("{'name':'foo'}")
///     .content_type("application/json")
///     .header("foo", "fooValue")
///     .build();
/// assert_eq!(m.content_type(), Some("application/json"));
/// assert_eq!(m.payload, Payload::Text("{'name':'foo'}".into()));
/// ```
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    payload: Payload,
    headers: Headers,
}

impl MessageBuilder {
    /// Start a message with no headers.
    pub fn with_payload(payload: impl Into<Payload>) -> Self {
        Self { payload: payload.into(), headers: Headers::new() }
    }

    /// Set one header, replacing any earlier value.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Shorthand for the `contentType` header.
    pub fn content_type(self, value: impl Into<String>) -> Self {
        self.header(CONTENT_TYPE, value)
    }

    /// Finish with a fresh id and timestamp.
    pub fn build(self) -> Message {
        Message::new(self.payload, self.headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_messages_get_distinct_ids() {
        let a = Message::new("x", Headers::new());
        let b = Message::new("x", Headers::new());
        assert_ne!(a.id, b.id);
        assert!(a.timestamp_ms > 0);
    }

    #[test]
    fn raw_bytes_do_not_quote_text() {
        let p = Payload::from("abc");
        assert_eq!(&p.to_bytes().unwrap()[..], b"abc");
        let j = Payload::from(json!({"a": 1}));
        assert_eq!(&j.to_bytes().unwrap()[..], br#"{"a":1}"#);
    }

    #[test]
    fn utf8_bytes_read_as_text() {
        let p = Payload::from(b"hello".to_vec());
        assert_eq!(p.as_text(), Some("hello"));
        let bad = Payload::from(vec![0xff, 0xfe]);
        assert_eq!(bad.as_text(), None);
    }
}
