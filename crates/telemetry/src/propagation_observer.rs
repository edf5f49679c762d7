#![allow(clippy::module_name_repetitions)]

use once_cell::sync::OnceCell;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use propagation::{PropagationObserver, PropagationOutcome};
use std::sync::atomic::{AtomicU64, Ordering};

struct Instruments {
    messages: Counter<u64>,
    dropped: Counter<u64>,
    overridden: Counter<u64>,
}

static INSTR: OnceCell<Instruments> = OnceCell::new();

// Test-visible mirrors to assert increments without exporter plumbing
static MESSAGES_ACC: AtomicU64 = AtomicU64::new(0);
static DROPPED_ACC: AtomicU64 = AtomicU64::new(0);

fn ensure_instruments() -> &'static Instruments {
    INSTR.get_or_init(|| {
        // Use the global meter provider (may be a no-op if OTLP not initialized).
        let meter: Meter = global::meter("stream.propagation");
        Instruments {
            messages: meter
                .u64_counter("propagation.messages")
                .with_description("Messages produced through the header filter")
                .init(),
            dropped: meter
                .u64_counter("propagation.headers.dropped")
                .with_description("Inbound headers dropped by policy")
                .init(),
            overridden: meter
                .u64_counter("propagation.headers.overridden")
                .with_description("Propagated headers replaced by handler values")
                .init(),
        }
    })
}

/// OTel-backed observer for header propagation.
#[derive(Clone, Copy, Debug, Default)]
pub struct OtelPropagationObserver;

impl PropagationObserver for OtelPropagationObserver {
    fn on_propagation(&self, o: &PropagationOutcome) {
        let inst = ensure_instruments();
        inst.messages.add(1, &[]);
        inst.dropped.add(o.dropped.len() as u64, &[]);
        inst.overridden.add(o.overridden.len() as u64, &[]);
        MESSAGES_ACC.fetch_add(1, Ordering::Relaxed);
        DROPPED_ACC.fetch_add(o.dropped.len() as u64, Ordering::Relaxed);
    }
}

/// Return an observer instance with instruments registered.
pub fn global() -> OtelPropagationObserver {
    let _ = ensure_instruments();
    OtelPropagationObserver
}

/// `(messages, headers_dropped)` seen by the OTel observer in this process.
pub fn snapshot_counters() -> (u64, u64) {
    (MESSAGES_ACC.load(Ordering::Relaxed), DROPPED_ACC.load(Ordering::Relaxed))
}
