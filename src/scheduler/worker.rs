//! One execution of a scheduled job: fetch, audit, enqueue, deliver.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use serde_json::json;
use tracing::Instrument;

use crate::audit::EventAuditStore;
use crate::dedup;
use crate::delivery::{DeliveryRequest, DeliveryTransport};
use crate::error::{Error, Result};
use crate::executor::{DataSourceFetch, JobContext, execute_with_timeout};
use crate::model::*;
use crate::queue::NotificationQueue;
use crate::store::JobStore;
use crate::telemetry::job::{record_execution_status, start_job_span};
use crate::telemetry::metrics;

/// Runs job executions. Every execution is bracketed by an execution log.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobStore>,
    audit: EventAuditStore,
    queue: NotificationQueue,
    fetcher: Arc<dyn DataSourceFetch>,
    transport: Arc<dyn DeliveryTransport>,
    executor_timeout: Duration,
}

impl JobRunner {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        audit: EventAuditStore,
        queue: NotificationQueue,
        fetcher: Arc<dyn DataSourceFetch>,
        transport: Arc<dyn DeliveryTransport>,
        executor_timeout: Duration,
    ) -> Self {
        Self {
            jobs,
            audit,
            queue,
            fetcher,
            transport,
            executor_timeout,
        }
    }

    pub(crate) fn jobs(&self) -> &Arc<dyn JobStore> {
        &self.jobs
    }

    pub(crate) fn fetcher(&self) -> &Arc<dyn DataSourceFetch> {
        &self.fetcher
    }

    /// Execute once and return the completed log.
    ///
    /// Failures end up in the log, never in the caller: the scheduler keeps
    /// firing regardless of how a run went.
    pub async fn run(
        &self,
        job: ScheduledJob,
        execution_id: ExecutionId,
        trigger: TriggerKind,
    ) -> JobExecutionLog {
        let span = start_job_span(job.id, &job.name, execution_id, trigger);

        async {
            let mut log = JobExecutionLog::running(execution_id, &job, trigger);
            if let Err(e) = self.jobs.insert_execution_log(&log).await {
                tracing::error!(error = %e, "could not open execution log");
            }
            record_execution_status(&span, "", ExecutionStatus::Running.as_str());

            let started = Instant::now();
            let mut fetched = 0;
            let result = self.poll(&job, execution_id, &mut fetched).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match &result {
                Ok(()) => {
                    log.succeed(fetched, duration_ms);
                    tracing::info!(records = fetched, duration_ms, "execution succeeded");
                }
                Err(e) => {
                    log.fail(e.to_string(), fetched, duration_ms);
                    tracing::error!(error = %e, records = fetched, duration_ms, "execution failed");
                }
            }
            record_execution_status(&span, ExecutionStatus::Running.as_str(), log.status.as_str());

            if let Err(e) = self.jobs.update_execution_log(&log).await {
                tracing::error!(error = %e, "could not close execution log");
            }

            metrics::job_executions().add(
                1,
                &[
                    KeyValue::new("status", log.status.as_str()),
                    KeyValue::new("trigger", trigger.as_str()),
                ],
            );
            metrics::operation_duration_ms().record(
                duration_ms as f64,
                &[KeyValue::new("operation", "job.execute")],
            );
            log
        }
        .instrument(span.clone())
        .await
    }

    async fn poll(
        &self,
        job: &ScheduledJob,
        execution_id: ExecutionId,
        fetched: &mut u64,
    ) -> Result<()> {
        let ctx = JobContext {
            job_id: Some(job.id),
            org_id: job.org_id.clone(),
            job_name: job.name.clone(),
            test_mode: false,
        };
        let result =
            execute_with_timeout(self.fetcher.as_ref(), &job.data_source, &ctx, self.executor_timeout)
                .await?;
        *fetched = result.len() as u64;
        if result.is_empty() {
            tracing::debug!("data source returned no records");
            return Ok(());
        }

        let event_type = format!("scheduled.{}", job.name);
        let payload = json!({ "records": result.records });
        // Identical results dedup: the key depends on content only.
        let event_key = dedup::compose_key(&[
            &event_type,
            &dedup::hash_payload(&payload),
            &job.org_id,
        ]);

        let new = NewEventAudit::new(&job.org_id, sources::poll(&job.name), &event_type, payload)
            .id_prefix("poll")
            .event_key(event_key)
            .source_id(execution_id.0.to_string());
        let record = match self.audit.record_event_audit(new).await {
            Ok(record) => record,
            Err(Error::DuplicateEvent {
                existing_event_id: Some(existing),
                ..
            }) => {
                let record = self.audit.get_event_audit_by_id(&job.org_id, &existing).await?;
                if record.status.is_terminal() {
                    tracing::info!(
                        event_id = %record.event_id,
                        status = %record.status,
                        "poll result unchanged since a settled run, nothing to deliver"
                    );
                    return Ok(());
                }
                tracing::info!(
                    event_id = %record.event_id,
                    status = %record.status,
                    "poll result unchanged but never delivered, resuming"
                );
                record
            }
            Err(e) => return Err(e),
        };

        self.deliver_record(job, record, &event_type, &result.records)
            .await
    }

    /// Drive a poll record from wherever it stands to `DELIVERED` or `FAILED`.
    async fn deliver_record(
        &self,
        job: &ScheduledJob,
        record: EventAuditRecord,
        event_type: &str,
        records: &[serde_json::Value],
    ) -> Result<()> {
        let org_id = job.org_id.as_str();
        let event_id = &record.event_id;
        let mut status = record.status;

        if status == EventStatus::Received {
            status = self
                .audit
                .transition(org_id, event_id, EventStatus::Validated, None)
                .await?
                .status;
        }
        if status == EventStatus::Validated {
            status = self.audit.mark_matched(org_id, event_id, 1).await?.status;
        }

        let body = json!({
            "jobId": job.id,
            "jobName": job.name,
            "eventId": event_id,
            "records": records,
        })
        .to_string();
        let item = self
            .queue
            .enqueue(
                NewNotification::new()
                    .org_id(org_id)
                    .topic(&job.target_url)
                    .transaction_type(event_type)
                    .message(body.clone())
                    .event_id(event_id.clone()),
            )
            .await?;

        // A run that died mid-delivery left the record in DELIVERING already.
        if status != EventStatus::Delivering {
            self.audit
                .transition(
                    org_id,
                    event_id,
                    EventStatus::Delivering,
                    Some(json!({ "target": job.target_url, "notificationId": item.id })),
                )
                .await?;
        }

        let response = self
            .transport
            .deliver(DeliveryRequest {
                url: job.target_url.clone(),
                method: job.http_method,
                headers: job.headers.clone(),
                body,
            })
            .await;
        let (delivered, detail) = match response {
            Ok(r) => (r.success, r.detail),
            Err(e) => (false, e.to_string()),
        };

        self.audit
            .record_delivery_outcome(org_id, event_id, delivered, Some(detail.clone()))
            .await?;
        if delivered {
            self.queue.mark_delivered(item.id).await?;
            Ok(())
        } else {
            self.queue.mark_failed(item.id, detail.clone()).await?;
            Err(Error::Delivery(detail))
        }
    }
}
