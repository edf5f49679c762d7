//! Line-oriented wire form used by the JSONL binder.

use crate::BinderError;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use stream_core::ids::{new_message_id, now_ms};
use stream_core::{Headers, Message, Payload};

/// One message per JSON line. UTF-8 payloads are stored in `payload`,
/// anything else base64-encoded in `payload_base64`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u64>,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload_base64: Option<String>,
}

impl WireMessage {
    /// Wire form of `message`, using the raw byte view of its payload.
    pub fn from_message(message: &Message) -> Result<Self, BinderError> {
        let raw = message.payload.to_bytes()?;
        let (payload, payload_base64) = match std::str::from_utf8(&raw) {
            Ok(s) => (Some(s.to_string()), None),
            Err(_) => (None, Some(STANDARD.encode(&raw))),
        };
        Ok(Self {
            id: Some(message.id.clone()),
            timestamp_ms: Some(message.timestamp_ms),
            headers: message.headers.clone(),
            payload,
            payload_base64,
        })
    }

    /// Decode into a message with a `Bytes` payload. Missing ids and
    /// timestamps are generated.
    pub fn into_message(self) -> Result<Message, BinderError> {
        let raw = match (self.payload_base64, self.payload) {
            (Some(b64), _) => Bytes::from(STANDARD.decode(b64.as_bytes())?),
            (None, Some(s)) => Bytes::from(s),
            (None, None) => Bytes::new(),
        };
        Ok(Message::from_parts(
            self.id.unwrap_or_else(new_message_id),
            self.timestamp_ms.unwrap_or_else(now_ms),
            self.headers,
            Payload::Bytes(raw),
        ))
    }

    pub fn to_line(&self) -> Result<String, BinderError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_line(line: &str) -> Result<Self, BinderError> {
        Ok(serde_json::from_str(line)?)
    }
}
