//! Job execution span helpers.
//!
//! Span creation and status recording for scheduled job executions.

use tracing::Span;

use crate::model::{ExecutionId, JobId, TriggerKind};

/// Start a span for one job execution.
///
/// The `job.status` field is declared empty and can be updated via
/// [`record_execution_status`].
pub fn start_job_span(
    job_id: JobId,
    job_name: &str,
    execution_id: ExecutionId,
    trigger: TriggerKind,
) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.id" = %job_id,
        "job.name" = job_name,
        "job.execution" = %execution_id,
        "job.trigger" = trigger.as_str(),
        "job.status" = tracing::field::Empty,
    )
}

/// Record a status change on the execution span.
pub fn record_execution_status(span: &Span, from: &str, to: &str) {
    span.record("job.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "execution_status");
    });
}
