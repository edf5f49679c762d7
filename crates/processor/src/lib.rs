//! Processor stage: consumes from an input destination, runs a handler
//! through the header propagation filter and produces to an output
//! destination.
//!
//! Wiring is explicit. A [`StageConfig`] names the destinations and the
//! propagation policy, a [`binder::Binder`] supplies the transport and a
//! [`Handler`] does the work:
//!
//! ```
//! use binder::InMemoryBinder;
//! use processor::{PassthroughHandler, ProcessorStage, StageConfig};
//! use propagation::PropagationPolicy;
//! use std::sync::Arc;
//!
//! let policy = PropagationPolicy::from_comma_list("bar,contentType").unwrap();
//! let stage = ProcessorStage::new(
//!     StageConfig::new("headers", Arc::new(policy)),
//!     Arc::new(InMemoryBinder::new()),
//!     Arc::new(PassthroughHandler::new()),
//! );
//! assert_eq!(stage.config().input, "input");
//! ```

#![deny(unsafe_code)]

use binder::{Binder, BinderError};
use propagation::{HeaderPropagationFilter, PropagationPolicy};
use std::future::Future;
use std::sync::Arc;
use stream_core::mime::APPLICATION_JSON;
use stream_core::Message;
use telemetry::StageMetrics;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};

pub mod config;
pub mod convert;
pub mod handler;

pub use config::{ConfigError, StreamConfig};
pub use convert::{ConvertError, PayloadConverter};
pub use handler::{Handler, HandlerError, PassthroughHandler};
pub use propagation::HandlerOutput;

/// Errors surfaced by a stage.
#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("conversion failed: {0}")]
    Convert(#[from] ConvertError),
    #[error("binder: {0}")]
    Binder(#[from] BinderError),
}

/// Explicit wiring for one stage.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Stage name used in logs and spans.
    pub name: String,
    pub input: String,
    pub output: String,
    /// Content type assumed for inbound messages that carry none.
    pub input_content_type: Option<String>,
    /// Content type applied to outbound messages that carry none.
    pub output_content_type: String,
    pub policy: Arc<PropagationPolicy>,
}

impl StageConfig {
    /// Defaults: `input` -> `output`, JSON content type.
    pub fn new(name: impl Into<String>, policy: Arc<PropagationPolicy>) -> Self {
        Self {
            name: name.into(),
            input: config::DEFAULT_INPUT.into(),
            output: config::DEFAULT_OUTPUT.into(),
            input_content_type: None,
            output_content_type: APPLICATION_JSON.into(),
            policy,
        }
    }

    #[must_use]
    pub fn with_input(mut self, destination: impl Into<String>) -> Self {
        self.input = destination.into();
        self
    }

    #[must_use]
    pub fn with_output(mut self, destination: impl Into<String>) -> Self {
        self.output = destination.into();
        self
    }

    #[must_use]
    pub fn with_output_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.output_content_type = content_type.into();
        self
    }
}

/// Totals reported when a stage stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageStats {
    pub processed: u64,
    pub failed: u64,
}

/// One consumer-to-producer hand-off point.
pub struct ProcessorStage {
    config: StageConfig,
    filter: HeaderPropagationFilter,
    binder: Arc<dyn Binder>,
    handler: Arc<dyn Handler>,
    inbound: PayloadConverter,
    outbound: PayloadConverter,
    metrics: StageMetrics,
}

impl ProcessorStage {
    pub fn new(config: StageConfig, binder: Arc<dyn Binder>, handler: Arc<dyn Handler>) -> Self {
        let filter = HeaderPropagationFilter::new(config.policy.clone());
        let inbound = PayloadConverter::new(
            config.input_content_type.clone().unwrap_or_else(|| APPLICATION_JSON.into()),
        );
        let outbound = PayloadConverter::new(config.output_content_type.clone());
        Self { config, filter, binder, handler, inbound, outbound, metrics: StageMetrics::new() }
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Shared counters for this stage.
    pub fn metrics(&self) -> StageMetrics {
        self.metrics.clone()
    }

    /// Decode, filter + handle, encode. Handler failures come back as
    /// [`StageError::Handler`] and no message is produced.
    pub fn process(&self, inbound: Message) -> Result<Message, StageError> {
        let inbound = self.inbound.decode(inbound);
        let produced = self.filter.apply(&inbound, |p| self.handler.handle(p))?;
        Ok(self.outbound.encode(produced)?)
    }

    /// Consume until the input is exhausted or `shutdown` resolves.
    ///
    /// Messages whose handler or conversion fails are logged, counted and
    /// skipped. Transport errors stop the loop.
    pub async fn run<S>(self, shutdown: S) -> Result<StageStats, StageError>
    where
        S: Future<Output = ()> + Send,
    {
        let mut source = self.binder.bind_consumer(&self.config.input)?;
        let sink = self.binder.bind_producer(&self.config.output)?;
        info!(
            stage = %self.config.name,
            input = %self.config.input,
            output = %self.config.output,
            binder = self.binder.name(),
            "stage started"
        );

        tokio::pin!(shutdown);
        loop {
            let next = tokio::select! {
                _ = &mut shutdown => {
                    info!(stage = %self.config.name, "shutdown requested");
                    break;
                }
                r = source.recv() => r?,
            };
            let Some(message) = next else {
                debug!(stage = %self.config.name, "input exhausted");
                break;
            };

            let span = info_span!("stage.process", stage = %self.config.name, message_id = %message.id);
            let result = span.in_scope(|| self.process(message));
            match result {
                Ok(out) => {
                    sink.send(out).instrument(span).await?;
                    self.metrics.record_processed();
                }
                Err(e) => {
                    warn!(parent: &span, error = %e, "message not produced");
                    self.metrics.record_failed();
                }
            }
        }

        let (processed, failed) = self.metrics.snapshot();
        info!(stage = %self.config.name, processed, failed, "stage stopped");
        Ok(StageStats { processed, failed })
    }
}
