//! Content-type driven payload conversion at the transport boundary.
//!
//! Outbound, a `Text` payload is written as a quoted JSON string when the
//! content type is JSON and as raw UTF-8 otherwise; handlers that want their
//! string forwarded verbatim set `contentType: text/plain`. `Bytes` are never
//! touched. Inbound, textual content types turn UTF-8 bytes into `Text`.

use bytes::Bytes;
use stream_core::headers::CONTENT_TYPE;
use stream_core::mime::APPLICATION_JSON;
use stream_core::{Message, MimeError, MimeType, Payload};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("content type: {0}")]
    ContentType(#[from] MimeError),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Encodes and decodes payloads for one binding.
#[derive(Debug, Clone)]
pub struct PayloadConverter {
    default_content_type: String,
}

impl Default for PayloadConverter {
    fn default() -> Self {
        Self::new(APPLICATION_JSON)
    }
}

impl PayloadConverter {
    /// Converter applying `default_content_type` to messages that carry none.
    pub fn new(default_content_type: impl Into<String>) -> Self {
        Self { default_content_type: default_content_type.into() }
    }

    /// Turn the payload into bytes for the wire. A missing `contentType`
    /// header is filled in with the binding default.
    pub fn encode(&self, mut message: Message) -> Result<Message, ConvertError> {
        if !message.headers.contains_key(CONTENT_TYPE) {
            message.headers.insert(CONTENT_TYPE, self.default_content_type.clone());
        }
        let mime = MimeType::parse(message.content_type().unwrap_or_default())?;
        let raw = match &message.payload {
            Payload::Bytes(b) => b.clone(),
            Payload::Text(s) if mime.is_json() => Bytes::from(serde_json::to_vec(s)?),
            Payload::Text(s) => Bytes::copy_from_slice(s.as_bytes()),
            Payload::Json(v) => Bytes::from(serde_json::to_vec(v)?),
        };
        message.payload = Payload::Bytes(raw);
        Ok(message)
    }

    /// Present textual payloads to handlers as `Text`. Unknown or malformed
    /// content types leave the bytes as they are.
    pub fn decode(&self, mut message: Message) -> Message {
        let textual = message
            .content_type()
            .or(Some(self.default_content_type.as_str()))
            .and_then(|ct| MimeType::parse(ct).ok())
            .is_some_and(|m| m.is_textual());
        if !textual {
            return message;
        }
        let text = match &message.payload {
            Payload::Bytes(b) => std::str::from_utf8(b).ok().map(str::to_string),
            _ => None,
        };
        if let Some(s) = text {
            message.payload = Payload::Text(s);
        }
        message
    }
}
