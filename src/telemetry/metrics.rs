//! Metric instrument factories for eventgate.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"eventgate"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for eventgate instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("eventgate")
}

/// Counter: events offered to the audit store.
/// Labels: `source`, `result` ("ok" | "duplicate" | "error").
pub fn events_recorded() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.events.recorded")
        .with_description("Number of events offered to the audit store")
        .build()
}

/// Counter: event state transitions.
/// Labels: `from`, `to`.
pub fn event_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.events.state_transitions")
        .with_description("Number of event state transitions")
        .build()
}

/// Counter: bulk import item classifications.
/// Labels: `outcome` ("successful" | "failed" | "duplicate"), `dry_run`.
pub fn import_items() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.import.items")
        .with_description("Bulk import items by classification")
        .build()
}

/// Counter: completed job executions.
/// Labels: `status`, `trigger`.
pub fn job_executions() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.jobs.executions")
        .with_description("Number of completed job executions")
        .build()
}

/// Counter: firings dropped because the job was still running.
/// Labels: `trigger`.
pub fn job_firings_skipped() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.jobs.firings_skipped")
        .with_description("Job firings skipped while a previous execution was in flight")
        .build()
}

/// Counter: data-source fetches that hit the timeout.
/// Labels: `source_type`.
pub fn executor_timeouts() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.executor.timeouts")
        .with_description("Data-source fetches that exceeded their timeout")
        .build()
}

/// Counter: notifications enqueued.
/// Labels: `topic`.
pub fn notifications_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("eventgate.queue.enqueued")
        .with_description("Number of notifications enqueued")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("eventgate.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
