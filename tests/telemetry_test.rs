//! Integration tests for telemetry initialization and span helpers.

use eventgate::model::{ExecutionId, JobId, TriggerKind};
use eventgate::telemetry::{TelemetryConfig, init_telemetry, job, metrics};
use opentelemetry::KeyValue;

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process; a second
    // init returning Err is acceptable here.
    let _guard = init_telemetry(TelemetryConfig::new(None, "debug"));
}

#[test]
fn job_span_creates_and_records_status() {
    let span = job::start_job_span(
        JobId::new(),
        "orders-sync",
        ExecutionId::new(),
        TriggerKind::Scheduled,
    );
    job::record_execution_status(&span, "", "RUNNING");
    job::record_execution_status(&span, "RUNNING", "SUCCESS");
}

#[test]
fn instruments_accept_recordings_without_a_provider() {
    metrics::events_recorded().add(1, &[KeyValue::new("source", "push")]);
    metrics::job_firings_skipped().add(1, &[KeyValue::new("trigger", "SCHEDULED")]);
    metrics::operation_duration_ms().record(12.5, &[KeyValue::new("operation", "test")]);
}
