//! Selective header propagation
//!
//! A processing stage consumes a message, hands its payload to a handler and
//! produces whatever the handler returns. This crate decides which headers of
//! the consumed message survive into the produced one.
//!
//! Evaluation order for one hand-off:
//! 1) Invoke the handler on the inbound payload. Handler errors are returned
//!    to the caller unchanged; nothing is retried or caught.
//! 2) Copy every inbound header whose name is not excluded by the
//!    [`PropagationPolicy`].
//! 3) Merge the headers set by the handler on top. Handler headers always win
//!    and are never filtered, even when their name is excluded.
//! 4) Build the outbound message from the handler payload (byte-for-byte, no
//!    re-encoding) and the merged headers, with a fresh id and timestamp.
//!
//! The filter is a pure function over its inputs. The policy is immutable and
//! may be shared across threads behind an `Arc`.
//!
//! Observability:
//! - Every hand-off updates the process-global [`PropagationMetrics`].
//! - An optional [`PropagationObserver`] can be installed to observe outcomes
//!   in-process.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use stream_core::{Headers, Message, Payload};
use tracing::debug;

mod policy;

pub use policy::{header_list_or_default, HeaderList, PolicyError, PolicyFile, PropagationPolicy};

/// What a handler returns: the outbound payload and the headers it sets.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerOutput {
    /// Outbound payload, produced as-is.
    pub payload: Payload,
    /// Headers set explicitly by the handler.
    pub headers: Headers,
}

impl HandlerOutput {
    /// Output with no handler-set headers.
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self { payload: payload.into(), headers: Headers::new() }
    }

    /// Add a handler-set header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }
}

impl From<Payload> for HandlerOutput {
    fn from(payload: Payload) -> Self {
        Self::new(payload)
    }
}

/// Per-message summary of what the filter did with the headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationOutcome {
    /// Id of the produced message.
    pub message_id: String,
    /// Inbound headers copied to the outbound message and not overridden.
    pub propagated: usize,
    /// Inbound header names dropped by the policy.
    pub dropped: Vec<String>,
    /// Propagated header names replaced by a handler-set value.
    pub overridden: Vec<String>,
}

/// Observer invoked for each completed hand-off.
///
/// Implementations must be cheap and non-blocking.
pub trait PropagationObserver: Send + Sync {
    /// Called once per produced message.
    fn on_propagation(&self, outcome: &PropagationOutcome);
}

static OBSERVER: OnceLock<RwLock<Option<Arc<dyn PropagationObserver>>>> = OnceLock::new();

/// Install or clear the global propagation observer.
///
/// ```
/// struct Nop;
/// impl propagation::PropagationObserver for Nop {
///     fn on_propagation(&self, _: &propagation::PropagationOutcome) {}
/// }
/// propagation::set_observer(Some(Box::new(Nop)));
/// propagation::set_observer(None);
/// ```
pub fn set_observer(observer: Option<Box<dyn PropagationObserver>>) {
    let cell = OBSERVER.get_or_init(|| RwLock::new(None));
    let mut w = cell.write().expect("observer write lock poisoned");
    *w = observer.map(Arc::from);
}

/// In-process counters for header propagation. Not persisted across restarts.
#[derive(Debug, Default)]
pub struct PropagationMetrics {
    messages: AtomicU64,
    propagated: AtomicU64,
    dropped: AtomicU64,
    overridden: AtomicU64,
}

/// Point-in-time copy of [`PropagationMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Messages produced through the filter.
    pub messages: u64,
    /// Headers copied from inbound to outbound.
    pub headers_propagated: u64,
    /// Headers dropped by policy.
    pub headers_dropped: u64,
    /// Propagated headers overridden by the handler.
    pub headers_overridden: u64,
}

impl PropagationMetrics {
    /// Read all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            headers_propagated: self.propagated.load(Ordering::Relaxed),
            headers_dropped: self.dropped.load(Ordering::Relaxed),
            headers_overridden: self.overridden.load(Ordering::Relaxed),
        }
    }

    fn record(&self, o: &PropagationOutcome) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.propagated.fetch_add(o.propagated as u64, Ordering::Relaxed);
        self.dropped.fetch_add(o.dropped.len() as u64, Ordering::Relaxed);
        self.overridden.fetch_add(o.overridden.len() as u64, Ordering::Relaxed);
    }
}

static METRICS: OnceLock<PropagationMetrics> = OnceLock::new();

/// Access the global propagation metrics.
pub fn propagation_metrics() -> &'static PropagationMetrics {
    METRICS.get_or_init(PropagationMetrics::default)
}

fn notify(outcome: &PropagationOutcome) {
    propagation_metrics().record(outcome);
    if let Some(lock) = OBSERVER.get() {
        if let Ok(r) = lock.read() {
            if let Some(obs) = r.as_ref() {
                obs.on_propagation(outcome);
            }
        }
    }
}

/// Applies a [`PropagationPolicy`] at the consumer-to-producer boundary of a stage.
#[derive(Debug, Clone, Default)]
pub struct HeaderPropagationFilter {
    policy: Arc<PropagationPolicy>,
}

impl HeaderPropagationFilter {
    /// Filter sharing `policy`.
    pub fn new(policy: Arc<PropagationPolicy>) -> Self {
        Self { policy }
    }

    /// The policy in force.
    pub fn policy(&self) -> &PropagationPolicy {
        &self.policy
    }

    /// Inbound headers that survive the policy.
    pub fn propagate(&self, inbound: &Headers) -> Headers {
        if self.policy.is_empty() {
            return inbound.clone();
        }
        inbound.iter().filter(|(k, _)| !self.policy.is_excluded(k)).collect()
    }

    /// Merge handler-set headers over propagated ones; handler values win.
    pub fn merge(&self, mut propagated: Headers, additions: Headers) -> Headers {
        propagated.extend(additions);
        propagated
    }

    /// Run `handler` on the inbound payload and build the outbound message.
    ///
    /// ```
    /// use propagation::{HandlerOutput, HeaderPropagationFilter, PropagationPolicy};
    /// use std::sync::Arc;
    /// use stream_core::MessageBuilder;
    ///
    /// let policy = PropagationPolicy::from_comma_list("bar").unwrap();
    /// let filter = HeaderPropagationFilter::new(Arc::new(policy));
    /// let inbound = MessageBuilder::with_payload("p").header("foo", "1").header("bar", "2").build();
    /// let out = filter
    ///     .apply(&inbound, |p| Ok::<_, std::convert::Infallible>(HandlerOutput::new(p.clone())))
    ///     .unwrap();
    /// assert_eq!(out.header("foo"), Some("1"));
    /// assert!(out.header("bar").is_none());
    /// ```
    pub fn apply<H, E>(&self, inbound: &Message, handler: H) -> Result<Message, E>
    where
        H: FnOnce(&Payload) -> Result<HandlerOutput, E>,
    {
        let HandlerOutput { payload, headers: additions } = handler(&inbound.payload)?;

        let propagated = self.propagate(&inbound.headers);
        let dropped: Vec<String> = inbound
            .headers
            .keys()
            .filter(|k| !propagated.contains_key(k))
            .map(str::to_string)
            .collect();
        let overridden: Vec<String> =
            additions.keys().filter(|k| propagated.contains_key(k)).map(str::to_string).collect();
        let kept = propagated.len() - overridden.len();

        let outbound = Message::new(payload, self.merge(propagated, additions));
        if !dropped.is_empty() {
            debug!(message_id = %outbound.id, dropped = ?dropped, "headers not propagated");
        }
        notify(&PropagationOutcome {
            message_id: outbound.id.clone(),
            propagated: kept,
            dropped,
            overridden,
        });
        Ok(outbound)
    }
}
