//! Telemetry: JSON structured logging, stage counters and propagation
//! observers. OTel export is available behind the `otel` feature.

#![deny(unsafe_code)]

use propagation::{PropagationObserver, PropagationOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

#[cfg(feature = "otel")]
pub mod propagation_observer;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("otel setup failed: {0}")]
    Otel(String),
}

/// Initialize structured logging (JSON) with env filter.
/// Set RUST_LOG, e.g., "info,processor=debug".
pub fn init_json_logging() {
    let fmt_layer = fmt::layer().json().with_current_span(true).with_span_list(true);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).ok();
}

/// Initialize OpenTelemetry tracer (optional; behind `otel` feature). No tracing subscriber hookup.
#[cfg(feature = "otel")]
pub fn init_otel(service_name: &str) -> Result<(), TelemetryError> {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::trace as sdktrace;
    use opentelemetry_sdk::{runtime, Resource};

    let resource = Resource::new(vec![KeyValue::new("service.name", service_name.to_owned())]);
    let _tracer_provider = opentelemetry_otlp::new_pipeline()
        .tracing()
        .with_exporter(opentelemetry_otlp::new_exporter().http())
        .with_trace_config(sdktrace::config().with_resource(resource))
        .install_batch(runtime::Tokio)
        .map_err(|e| TelemetryError::Otel(e.to_string()))?;
    Ok(())
}

/// Per-stage message counters. Cheap to clone; clones share counts.
#[derive(Clone, Default, Debug)]
pub struct StageMetrics {
    processed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl StageMetrics {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn record_processed(&self) {
        let _ = self.processed.fetch_add(1, Ordering::Relaxed);
    }
    pub fn record_failed(&self) {
        let _ = self.failed.fetch_add(1, Ordering::Relaxed);
    }
    /// `(processed, failed)`
    pub fn snapshot(&self) -> (u64, u64) {
        (self.processed.load(Ordering::Relaxed), self.failed.load(Ordering::Relaxed))
    }
}

/// Observer that reports every hand-off as a `debug` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingPropagationObserver;

impl PropagationObserver for TracingPropagationObserver {
    fn on_propagation(&self, o: &PropagationOutcome) {
        tracing::debug!(
            message_id = %o.message_id,
            propagated = o.propagated,
            dropped = ?o.dropped,
            overridden = ?o.overridden,
            "headers propagated"
        );
    }
}
