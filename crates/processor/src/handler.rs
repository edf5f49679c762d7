//! Per-stage handler: derives the outbound payload and any headers it wants
//! to set from the inbound payload.

use propagation::HandlerOutput;
use stream_core::{Headers, Payload};
use thiserror::Error;

/// Failure raised by a handler. The stage never retries it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("handler failed: {0}")]
    Failed(String),
}

/// Transform applied to every consumed payload.
pub trait Handler: Send + Sync {
    fn handle(&self, payload: &Payload) -> Result<HandlerOutput, HandlerError>;
}

impl<F> Handler for F
where
    F: Fn(&Payload) -> Result<HandlerOutput, HandlerError> + Send + Sync,
{
    fn handle(&self, payload: &Payload) -> Result<HandlerOutput, HandlerError> {
        self(payload)
    }
}

/// Returns the payload unchanged, optionally setting fixed headers.
#[derive(Debug, Clone, Default)]
pub struct PassthroughHandler {
    headers: Headers,
}

impl PassthroughHandler {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl Handler for PassthroughHandler {
    fn handle(&self, payload: &Payload) -> Result<HandlerOutput, HandlerError> {
        Ok(HandlerOutput { payload: payload.clone(), headers: self.headers.clone() })
    }
}
