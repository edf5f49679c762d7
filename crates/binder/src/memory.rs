//! In-memory test binder.
//!
//! Consumer destinations are bounded tokio channels that tests feed through
//! [`InMemoryBinder::input_sender`]. Everything a stage produces is captured by
//! the binder's [`MessageCollector`] and can be polled with a timeout.

use crate::{check_destination, Binder, BinderError, MessageSink, MessageSource, DEFAULT_CAPACITY};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stream_core::Message;
use tokio::sync::mpsc;
use tracing::debug;

struct InputDestination {
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl InputDestination {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self { tx: Mutex::new(Some(tx)), rx: Mutex::new(Some(rx)) }
    }
}

/// Binder keeping every destination in process memory.
pub struct InMemoryBinder {
    capacity: usize,
    inputs: DashMap<String, InputDestination>,
    collector: MessageCollector,
}

impl Default for InMemoryBinder {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InMemoryBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, inputs: DashMap::new(), collector: MessageCollector::default() }
    }

    /// Sender feeding the consumer side of `destination`.
    pub fn input_sender(&self, destination: &str) -> Result<mpsc::Sender<Message>, BinderError> {
        check_destination(destination)?;
        let entry = self
            .inputs
            .entry(destination.to_string())
            .or_insert_with(|| InputDestination::new(self.capacity));
        let tx = entry.tx.lock().expect("input sender lock poisoned").clone();
        tx.ok_or_else(|| BinderError::Closed(destination.to_string()))
    }

    /// Stop accepting new input on `destination`. The consumer sees the end of
    /// the stream once every outstanding sender has been dropped.
    pub fn close_input(&self, destination: &str) {
        if let Some(entry) = self.inputs.get(destination) {
            entry.tx.lock().expect("input sender lock poisoned").take();
        }
    }

    /// Handle on everything produced through this binder.
    pub fn collector(&self) -> MessageCollector {
        self.collector.clone()
    }
}

impl Binder for InMemoryBinder {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn bind_consumer(&self, destination: &str) -> Result<Box<dyn MessageSource>, BinderError> {
        check_destination(destination)?;
        let entry = self
            .inputs
            .entry(destination.to_string())
            .or_insert_with(|| InputDestination::new(self.capacity));
        let rx = entry
            .rx
            .lock()
            .expect("input receiver lock poisoned")
            .take()
            .ok_or_else(|| BinderError::AlreadyBound(destination.to_string()))?;
        debug!(destination, "memory consumer bound");
        Ok(Box::new(MemorySource { rx }))
    }

    fn bind_producer(&self, destination: &str) -> Result<Box<dyn MessageSink>, BinderError> {
        check_destination(destination)?;
        let queue = self.collector.for_destination(destination);
        debug!(destination, "memory producer bound");
        Ok(Box::new(MemorySink { destination: destination.to_string(), queue }))
    }
}

struct MemorySource {
    rx: mpsc::Receiver<Message>,
}

#[async_trait]
impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Message>, BinderError> {
        Ok(self.rx.recv().await)
    }
}

struct MemorySink {
    destination: String,
    queue: CollectedQueue,
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn send(&self, message: Message) -> Result<(), BinderError> {
        self.queue.tx.send(message).map_err(|_| BinderError::Closed(self.destination.clone()))
    }
}

/// Captured output of an [`InMemoryBinder`], keyed by destination. Cheap to clone.
#[derive(Clone, Default)]
pub struct MessageCollector {
    queues: Arc<DashMap<String, CollectedQueue>>,
}

impl MessageCollector {
    /// Queue of messages produced to `destination` (created on first use).
    pub fn for_destination(&self, destination: &str) -> CollectedQueue {
        self.queues.entry(destination.to_string()).or_insert_with(CollectedQueue::new).clone()
    }
}

/// Messages produced to one destination, in production order.
#[derive(Clone)]
pub struct CollectedQueue {
    tx: mpsc::UnboundedSender<Message>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Message>>>,
}

impl CollectedQueue {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx: Arc::new(tokio::sync::Mutex::new(rx)) }
    }

    /// Wait at most `timeout` for the next produced message.
    pub async fn poll(&self, timeout: Duration) -> Option<Message> {
        let mut rx = self.rx.lock().await;
        tokio::time::timeout(timeout, rx.recv()).await.ok().flatten()
    }

    /// Next produced message if one is already waiting.
    pub fn try_poll(&self) -> Option<Message> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stream_core::MessageBuilder;

    #[tokio::test]
    async fn producer_output_reaches_collector() {
        let binder = InMemoryBinder::new();
        let sink = binder.bind_producer("output").unwrap();
        sink.send(MessageBuilder::with_payload("a").build()).await.unwrap();
        let got = binder.collector().for_destination("output").poll(Duration::from_secs(1)).await;
        assert_eq!(got.unwrap().payload.as_text(), Some("a"));
    }

    #[tokio::test]
    async fn poll_times_out_when_nothing_produced() {
        let binder = InMemoryBinder::new();
        let q = binder.collector().for_destination("output");
        assert!(q.poll(Duration::from_millis(20)).await.is_none());
        assert!(q.try_poll().is_none());
    }

    #[tokio::test]
    async fn consumer_receives_until_closed() {
        let binder = InMemoryBinder::new();
        let tx = binder.input_sender("input").unwrap();
        let mut source = binder.bind_consumer("input").unwrap();
        tx.send(MessageBuilder::with_payload("1").build()).await.unwrap();
        drop(tx);
        binder.close_input("input");
        assert!(source.recv().await.unwrap().is_some());
        assert!(source.recv().await.unwrap().is_none());
        assert!(matches!(binder.input_sender("input"), Err(BinderError::Closed(_))));
    }

    #[test]
    fn second_consumer_is_rejected() {
        let binder = InMemoryBinder::new();
        let _first = binder.bind_consumer("input").unwrap();
        assert!(matches!(binder.bind_consumer("input"), Err(BinderError::AlreadyBound(_))));
    }
}
