//! Event audit store: the event lifecycle, checkpoints and gap health.
//!
//! The audit store exclusively owns event records and source checkpoints.
//! Inserts go straight to the store's atomic insert-or-reject; every later
//! change is a conditional write against the status the change was computed
//! from, so concurrent writers cannot skip a state.

pub mod export;
pub mod gaps;

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use opentelemetry::KeyValue;
use serde_json::{Value, json};

use crate::dedup;
use crate::error::{Error, Result};
use crate::model::*;
use crate::source::SourceRegistry;
use crate::store::EventStore;
use crate::telemetry::metrics;

pub use export::{EventExport, ExportChunk, ExportProgress, ExportStream};
pub use gaps::{GapPolicy, detect_gaps};

/// Conditional writes retried after losing to a concurrent append.
const MAX_WRITE_ATTEMPTS: u32 = 10;

/// Longest look-back accepted for gap and health queries.
pub const MAX_HOURS_BACK: u32 = 24 * 90;

#[derive(Clone)]
pub struct EventAuditStore {
    events: Arc<dyn EventStore>,
    sources: Arc<SourceRegistry>,
    gap_policy: GapPolicy,
}

impl EventAuditStore {
    pub fn new(events: Arc<dyn EventStore>) -> Self {
        Self {
            events,
            sources: Arc::new(SourceRegistry::empty()),
            gap_policy: GapPolicy::default(),
        }
    }

    pub fn with_sources(mut self, sources: Arc<SourceRegistry>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_gap_policy(mut self, policy: GapPolicy) -> Self {
        self.gap_policy = policy;
        self
    }

    /// Record a newly sighted event in state `RECEIVED`.
    ///
    /// Fails with `Error::DuplicateEvent` when the org already holds the event
    /// key; callers classify that outcome rather than treat it as a failure.
    /// A successful insert advances the source checkpoint.
    pub async fn record_event_audit(&self, new: NewEventAudit) -> Result<EventAuditRecord> {
        if new.org_id.trim().is_empty() {
            return Err(Error::Validation("orgId is required".into()));
        }
        if new.event_type.trim().is_empty() {
            return Err(Error::Validation("eventType is required".into()));
        }

        let received_at = new.received_at.unwrap_or_else(Utc::now);
        let event_id = new
            .event_id
            .unwrap_or_else(|| EventId::generate(new.id_prefix));
        let event_key = new
            .event_key
            .unwrap_or_else(|| dedup::derive_event_key(&new.event_type, &new.payload, &new.org_id));

        let mut record = EventAuditRecord {
            event_id,
            org_id: new.org_id,
            source: new.source,
            source_id: new.source_id,
            event_type: new.event_type,
            event_key,
            payload_hash: dedup::hash_payload(&new.payload),
            payload_size: dedup::payload_size(&new.payload),
            payload_summary: dedup::extract_safe_payload(&new.payload),
            status: EventStatus::Received,
            received_at,
            received_at_bucket: dedup::get_bucket_timestamp(received_at),
            timeline: Vec::new(),
            delivery_status: DeliveryStatus::default(),
            skip_category: None,
            skip_reason: None,
            processing_time_ms: None,
        };
        record.push_timeline(
            received_at,
            EventStatus::Received.as_str(),
            Some(json!({ "source": record.source })),
        );

        let result = self.events.insert_event(&record).await;
        let outcome = match &result {
            Ok(()) => "ok",
            Err(e) if e.is_duplicate() => "duplicate",
            Err(_) => "error",
        };
        metrics::events_recorded().add(
            1,
            &[
                KeyValue::new("source", source_label(&record.source)),
                KeyValue::new("result", outcome),
            ],
        );
        result?;

        tracing::debug!(
            event_id = %record.event_id,
            org_id = %record.org_id,
            source = %record.source,
            "event recorded"
        );
        self.advance_checkpoint(&record).await;
        Ok(record)
    }

    /// Checkpoints are observability only; a failed upsert never fails ingestion.
    async fn advance_checkpoint(&self, record: &EventAuditRecord) {
        let checkpoint = SourceCheckpoint {
            org_id: record.org_id.clone(),
            source: record.source.clone(),
            last_seen_at: record.received_at,
            last_seen_event_id: record.event_id.clone(),
            expected_interval_ms: self
                .sources
                .expected_interval(&record.org_id, &record.source),
            event_count: 1,
        };
        if let Err(e) = self.events.upsert_checkpoint(&checkpoint).await {
            tracing::warn!(
                org_id = %record.org_id,
                source = %record.source,
                error = %e,
                "failed to advance source checkpoint"
            );
        }
    }

    pub async fn get_event_audit_by_id(
        &self,
        org_id: &str,
        event_id: &EventId,
    ) -> Result<EventAuditRecord> {
        self.events
            .get_event(org_id, event_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("event {event_id}")))
    }

    /// Filtered page, newest first, with a total/page-count envelope.
    pub async fn list_event_audit(
        &self,
        org_id: &str,
        filters: &EventFilters,
        pagination: Pagination,
    ) -> Result<Page<EventAuditRecord>> {
        if let (Some(start), Some(end)) = (filters.start_date, filters.end_date) {
            if start > end {
                return Err(Error::Validation("startDate must not be after endDate".into()));
            }
        }
        let total = self.events.count_events(org_id, filters).await?;
        let items = self
            .events
            .find_events(
                org_id,
                filters,
                pagination.skip(),
                u64::from(pagination.limit),
            )
            .await?;
        Ok(Page::new(items, total, pagination))
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Load, apply `change`, and write back conditionally on the loaded
    /// version. A write that lost only to a concurrent timeline append is
    /// retried against the fresh record.
    async fn modify<F>(
        &self,
        org_id: &str,
        event_id: &EventId,
        mut change: F,
    ) -> Result<EventAuditRecord>
    where
        F: FnMut(&mut EventAuditRecord) -> Result<()>,
    {
        let mut attempt = 1;
        loop {
            let mut record = self.get_event_audit_by_id(org_id, event_id).await?;
            let expected = RecordVersion::of(&record);
            change(&mut record)?;
            if record.status != expected.status && record.status.ends_attempt() {
                let elapsed = Utc::now() - record.received_at;
                record.processing_time_ms = Some(elapsed.num_milliseconds().max(0) as u64);
            }

            match self.events.update_event(&record, expected).await {
                Ok(()) => {}
                Err(Error::Conflict(_)) if attempt < MAX_WRITE_ATTEMPTS => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            if record.status != expected.status {
                metrics::event_state_transitions().add(
                    1,
                    &[
                        KeyValue::new("from", expected.status.as_str()),
                        KeyValue::new("to", record.status.as_str()),
                    ],
                );
            }
            return Ok(record);
        }
    }

    /// Move an event along its state machine, appending a timeline entry.
    pub async fn transition(
        &self,
        org_id: &str,
        event_id: &EventId,
        to: EventStatus,
        details: Option<Value>,
    ) -> Result<EventAuditRecord> {
        self.modify(org_id, event_id, |record| {
            apply_transition(record, to, details.clone())
        })
        .await
    }

    /// Terminate an event as `SKIPPED` with its category and reason.
    pub async fn mark_skipped(
        &self,
        org_id: &str,
        event_id: &EventId,
        category: SkipCategory,
        reason: impl Into<String>,
    ) -> Result<EventAuditRecord> {
        let reason = reason.into();
        self.modify(org_id, event_id, |record| {
            apply_transition(
                record,
                EventStatus::Skipped,
                Some(json!({ "category": category.as_str(), "reason": reason })),
            )?;
            record.skip_category = Some(category);
            record.skip_reason = Some(reason.clone());
            Ok(())
        })
        .await
    }

    /// `VALIDATED → MATCHED` with the number of integrations that matched.
    pub async fn mark_matched(
        &self,
        org_id: &str,
        event_id: &EventId,
        integrations: u32,
    ) -> Result<EventAuditRecord> {
        if integrations == 0 {
            return Err(Error::Validation(
                "an event matches at least one integration".into(),
            ));
        }
        self.modify(org_id, event_id, |record| {
            apply_transition(
                record,
                EventStatus::Matched,
                Some(json!({ "integrationsMatched": integrations })),
            )?;
            record.delivery_status.integrations_matched = integrations;
            Ok(())
        })
        .await
    }

    /// Close out a `DELIVERING` event as `DELIVERED` or `FAILED`.
    ///
    /// A `FAILED` event may re-enter `DELIVERING` for another attempt; the
    /// counters accumulate across attempts.
    pub async fn record_delivery_outcome(
        &self,
        org_id: &str,
        event_id: &EventId,
        delivered: bool,
        detail: Option<String>,
    ) -> Result<EventAuditRecord> {
        self.modify(org_id, event_id, |record| {
            let to = if delivered {
                EventStatus::Delivered
            } else {
                EventStatus::Failed
            };
            apply_transition(record, to, detail.as_ref().map(|d| json!({ "detail": d })))?;
            if delivered {
                record.delivery_status.delivered_count += 1;
            } else {
                record.delivery_status.failed_count += 1;
            }
            Ok(())
        })
        .await
    }

    /// Append a non-transition stage (for example `QUEUED`).
    pub async fn append_timeline(
        &self,
        org_id: &str,
        event_id: &EventId,
        stage: &str,
        details: Option<Value>,
    ) -> Result<EventAuditRecord> {
        self.modify(org_id, event_id, |record| {
            record.push_timeline(Utc::now(), stage, details.clone());
            Ok(())
        })
        .await
    }

    // -----------------------------------------------------------------------
    // Checkpoints and gaps
    // -----------------------------------------------------------------------

    pub async fn get_source_checkpoints(
        &self,
        org_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<SourceCheckpoint>> {
        self.events.list_checkpoints(org_id, source).await
    }

    pub async fn get_source_gaps(
        &self,
        org_id: &str,
        source: &str,
        hours_back: u32,
    ) -> Result<Vec<SourceGap>> {
        Ok(self.get_source_health(org_id, source, hours_back).await?.gaps)
    }

    /// Checkpoint plus the gaps observed over the last `hours_back` hours.
    pub async fn get_source_health(
        &self,
        org_id: &str,
        source: &str,
        hours_back: u32,
    ) -> Result<SourceHealth> {
        if source.trim().is_empty() {
            return Err(Error::Validation("source is required".into()));
        }
        if hours_back == 0 || hours_back > MAX_HOURS_BACK {
            return Err(Error::Validation(format!(
                "hoursBack must be between 1 and {MAX_HOURS_BACK}"
            )));
        }

        let window_end = Utc::now();
        let window_start = window_end - ChronoDuration::hours(i64::from(hours_back));

        let checkpoint = self
            .events
            .list_checkpoints(org_id, Some(source))
            .await?
            .into_iter()
            .next();
        let expected = checkpoint
            .as_ref()
            .and_then(|c| c.expected_interval_ms)
            .or_else(|| self.sources.expected_interval(org_id, source));
        let threshold_ms = self.gap_policy.threshold_ms(expected);

        let arrivals = self
            .events
            .event_arrivals(org_id, source, window_start, window_end)
            .await?;

        Ok(SourceHealth {
            org_id: org_id.to_string(),
            source: source.to_string(),
            checkpoint,
            gaps: detect_gaps(org_id, source, &arrivals, threshold_ms),
            window_start,
            window_end,
            events_in_window: arrivals.len() as u64,
        })
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Resumable export over the filtered set, for callers that drive it directly.
    pub fn exporter(&self, org_id: &str, filters: EventFilters) -> EventExport {
        EventExport::new(self.events.clone(), org_id, filters)
    }

    /// Stream the filtered set as CSV, optionally bounded by a deadline.
    pub fn export(
        &self,
        org_id: &str,
        filters: EventFilters,
        deadline: Option<Duration>,
    ) -> ExportStream {
        ExportStream::spawn(self.exporter(org_id, filters), deadline)
    }
}

fn apply_transition(
    record: &mut EventAuditRecord,
    to: EventStatus,
    details: Option<Value>,
) -> Result<()> {
    if !record.status.can_transition_to(to) {
        return Err(Error::InvalidTransition {
            from: record.status.to_string(),
            to: to.to_string(),
        });
    }
    record.status = to;
    record.push_timeline(Utc::now(), to.as_str(), details);
    Ok(())
}

/// Poll sources carry the job name; collapse them for metric cardinality.
fn source_label(source: &str) -> String {
    if source.starts_with("poll:") {
        "poll".to_string()
    } else {
        source.to_string()
    }
}
