//! Transport binders.
//!
//! A binder attaches named destinations to the consumer side
//! ([`MessageSource`]) and producer side ([`MessageSink`]) of a processing
//! stage. Backends are chosen explicitly at startup through [`BinderKind`].

#![deny(unsafe_code)]

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use stream_core::Message;
use thiserror::Error;

pub mod jsonl;
pub mod memory;
pub mod wire;

pub use jsonl::JsonlBinder;
pub use memory::{CollectedQueue, InMemoryBinder, MessageCollector};
pub use wire::WireMessage;

/// Default bound for in-memory destination channels.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Errors emitted by binders.
#[derive(Debug, Error)]
pub enum BinderError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialize: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("destination '{0}' already has a consumer")]
    AlreadyBound(String),
    #[error("destination '{0}' is closed")]
    Closed(String),
    #[error("invalid destination name '{0}'")]
    InvalidDestination(String),
    #[error("unknown binder '{0}' (valid: memory|jsonl)")]
    UnknownBinder(String),
}

/// Consumer side of a destination.
#[async_trait]
pub trait MessageSource: Send {
    /// Next message, or `None` once the destination is exhausted.
    async fn recv(&mut self) -> Result<Option<Message>, BinderError>;
}

/// Producer side of a destination.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&self, message: Message) -> Result<(), BinderError>;
}

/// Pluggable transport backend.
pub trait Binder: Send + Sync {
    /// Short backend name for logging.
    fn name(&self) -> &'static str;

    fn bind_consumer(&self, destination: &str) -> Result<Box<dyn MessageSource>, BinderError>;

    fn bind_producer(&self, destination: &str) -> Result<Box<dyn MessageSink>, BinderError>;
}

/// Available binder backends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinderKind {
    #[default]
    Memory,
    Jsonl,
}

impl std::str::FromStr for BinderKind {
    type Err = BinderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(BinderKind::Memory),
            "jsonl" => Ok(BinderKind::Jsonl),
            other => Err(BinderError::UnknownBinder(other.to_string())),
        }
    }
}

/// Binder selection and backend settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BinderSettings {
    pub kind: BinderKind,
    /// Directory holding `<destination>.jsonl` files (JSONL binder).
    pub root: PathBuf,
    /// Channel bound per destination (in-memory binder).
    pub capacity: usize,
}

impl Default for BinderSettings {
    fn default() -> Self {
        Self { kind: BinderKind::Memory, root: PathBuf::from("."), capacity: DEFAULT_CAPACITY }
    }
}

impl BinderSettings {
    /// Instantiate the configured backend.
    pub fn build(&self) -> ConfiguredBinder {
        match self.kind {
            BinderKind::Memory => {
                ConfiguredBinder::Memory(Arc::new(InMemoryBinder::with_capacity(self.capacity)))
            }
            BinderKind::Jsonl => ConfiguredBinder::Jsonl(Arc::new(JsonlBinder::new(&self.root))),
        }
    }
}

/// Backend built from [`BinderSettings`]. The concrete handle is kept so an
/// in-memory binder can still be fed through [`InMemoryBinder::input_sender`].
#[derive(Clone)]
pub enum ConfiguredBinder {
    Memory(Arc<InMemoryBinder>),
    Jsonl(Arc<JsonlBinder>),
}

impl ConfiguredBinder {
    /// Type-erased handle for a stage.
    pub fn shared(&self) -> Arc<dyn Binder> {
        match self {
            ConfiguredBinder::Memory(b) => b.clone(),
            ConfiguredBinder::Jsonl(b) => b.clone(),
        }
    }

    pub fn memory(&self) -> Option<&Arc<InMemoryBinder>> {
        match self {
            ConfiguredBinder::Memory(b) => Some(b),
            ConfiguredBinder::Jsonl(_) => None,
        }
    }
}

pub(crate) fn check_destination(name: &str) -> Result<(), BinderError> {
    let bad = name.trim().is_empty()
        || name.contains('/')
        || name.contains('\\')
        || name == "."
        || name == "..";
    if bad {
        return Err(BinderError::InvalidDestination(name.to_string()));
    }
    Ok(())
}
