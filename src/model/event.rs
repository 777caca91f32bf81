//! Event audit records, checkpoints and gaps.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Event identifier. Generated with a source-specific prefix, or supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    /// Generate a globally unique id such as `evt_3f2a...`.
    pub fn generate(prefix: &str) -> Self {
        Self(format!("{prefix}_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EventId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Well-known source names.
pub mod sources {
    pub const PUSH: &str = "push";
    pub const BULK_IMPORT: &str = "bulk-import";

    /// Source name for events produced by a scheduled poll.
    pub fn poll(job_name: &str) -> String {
        format!("poll:{job_name}")
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle state of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventStatus {
    /// First sight of the event. Universal initial state.
    Received,
    /// Shape checked, ready for routing.
    Validated,
    /// Not routed anywhere. Terminal.
    Skipped,
    /// One or more integrations matched.
    Matched,
    /// Outbound delivery in progress.
    Delivering,
    /// Delivered. Terminal.
    Delivered,
    /// Delivery attempt failed. Ends the attempt; only a redelivery may follow.
    Failed,
}

impl EventStatus {
    pub const ALL: [EventStatus; 7] = [
        EventStatus::Received,
        EventStatus::Validated,
        EventStatus::Skipped,
        EventStatus::Matched,
        EventStatus::Delivering,
        EventStatus::Delivered,
        EventStatus::Failed,
    ];

    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: EventStatus) -> bool {
        use EventStatus::*;
        matches!(
            (self, to),
            (Received, Validated)
                | (Received, Skipped)
                | (Validated, Matched)
                | (Validated, Skipped)  // no integration matched
                | (Matched, Delivering)
                | (Matched, Skipped)    // every matched integration filtered it out
                | (Delivering, Delivered)
                | (Delivering, Failed)
                | (Failed, Delivering)  // redelivery
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(self, EventStatus::Delivered | EventStatus::Skipped)
    }

    /// Does reaching this state end a processing attempt?
    pub fn ends_attempt(self) -> bool {
        self.is_terminal() || self == EventStatus::Failed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventStatus::Received => "RECEIVED",
            EventStatus::Validated => "VALIDATED",
            EventStatus::Skipped => "SKIPPED",
            EventStatus::Matched => "MATCHED",
            EventStatus::Delivering => "DELIVERING",
            EventStatus::Delivered => "DELIVERED",
            EventStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for EventStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        EventStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Validation(format!("unknown event status: {s}")))
    }
}

/// Why an event was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipCategory {
    Duplicate,
    NoMatchingIntegration,
    Filtered,
    InvalidPayload,
    IntegrationInactive,
}

impl SkipCategory {
    pub const ALL: [SkipCategory; 5] = [
        SkipCategory::Duplicate,
        SkipCategory::NoMatchingIntegration,
        SkipCategory::Filtered,
        SkipCategory::InvalidPayload,
        SkipCategory::IntegrationInactive,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SkipCategory::Duplicate => "DUPLICATE",
            SkipCategory::NoMatchingIntegration => "NO_MATCHING_INTEGRATION",
            SkipCategory::Filtered => "FILTERED",
            SkipCategory::InvalidPayload => "INVALID_PAYLOAD",
            SkipCategory::IntegrationInactive => "INTEGRATION_INACTIVE",
        }
    }
}

impl std::fmt::Display for SkipCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SkipCategory {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SkipCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Validation(format!("unknown skip category: {s}")))
    }
}

// ---------------------------------------------------------------------------
// Event Audit Record
// ---------------------------------------------------------------------------

/// One stage in an event's timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub ts: DateTime<Utc>,
    pub stage: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// The stored state a conditional write was computed from.
///
/// The timeline only grows, so its length orders writes made at one status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordVersion {
    pub status: EventStatus,
    pub timeline_len: usize,
}

impl RecordVersion {
    pub fn of(record: &EventAuditRecord) -> Self {
        Self {
            status: record.status,
            timeline_len: record.timeline.len(),
        }
    }
}

/// Delivery counters across the integrations an event matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryStatus {
    pub integrations_matched: u32,
    pub delivered_count: u32,
    pub failed_count: u32,
}

/// The durable record of one ingested event and its delivery lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAuditRecord {
    pub event_id: EventId,
    pub org_id: String,
    /// `push`, `poll:<job>`, or `bulk-import`.
    pub source: String,
    pub source_id: Option<String>,
    pub event_type: String,
    /// Dedup key, unique per org.
    pub event_key: String,
    pub payload_hash: String,
    pub payload_size: u64,
    /// Redacted projection of the payload, safe to display.
    pub payload_summary: serde_json::Value,
    pub status: EventStatus,
    pub received_at: DateTime<Utc>,
    /// `received_at` floored to the hour, for indexed range pre-filtering.
    pub received_at_bucket: DateTime<Utc>,
    /// Append-only, non-decreasing in time.
    pub timeline: Vec<TimelineEntry>,
    pub delivery_status: DeliveryStatus,
    pub skip_category: Option<SkipCategory>,
    pub skip_reason: Option<String>,
    pub processing_time_ms: Option<u64>,
}

impl EventAuditRecord {
    /// Append a timeline stage, clamping its timestamp so the timeline never goes backwards.
    pub fn push_timeline(
        &mut self,
        ts: DateTime<Utc>,
        stage: impl Into<String>,
        details: Option<serde_json::Value>,
    ) {
        let ts = match self.timeline.last() {
            Some(last) if last.ts > ts => last.ts,
            _ => ts,
        };
        self.timeline.push(TimelineEntry {
            ts,
            stage: stage.into(),
            details,
        });
    }

    /// Does the record match a free-text search? Case-insensitive over
    /// id, type, source id, skip reason and the redacted payload summary.
    pub fn matches_search(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        let hit = |s: &str| s.to_lowercase().contains(&needle);
        hit(self.event_id.as_str())
            || hit(&self.event_type)
            || self.source_id.as_deref().is_some_and(hit)
            || self.skip_reason.as_deref().is_some_and(hit)
            || hit(&self.payload_summary.to_string())
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a new event. The audit store's public API for recording events.
#[derive(Debug, Clone)]
pub struct NewEventAudit {
    pub(crate) org_id: String,
    pub(crate) source: String,
    pub(crate) event_type: String,
    pub(crate) payload: serde_json::Value,
    pub(crate) event_id: Option<EventId>,
    pub(crate) id_prefix: &'static str,
    pub(crate) source_id: Option<String>,
    pub(crate) event_key: Option<String>,
    pub(crate) received_at: Option<DateTime<Utc>>,
}

impl NewEventAudit {
    pub fn new(
        org_id: impl Into<String>,
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            source: source.into(),
            event_type: event_type.into(),
            payload,
            event_id: None,
            id_prefix: "evt",
            source_id: None,
            event_key: None,
            received_at: None,
        }
    }

    /// Use a caller-supplied event id instead of generating one.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Prefix for generated ids (`evt`, `imp`, `poll`).
    pub fn id_prefix(mut self, prefix: &'static str) -> Self {
        self.id_prefix = prefix;
        self
    }

    pub fn source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    /// Override the derived dedup key.
    pub fn event_key(mut self, key: impl Into<String>) -> Self {
        self.event_key = Some(key.into());
        self
    }

    pub fn received_at(mut self, at: DateTime<Utc>) -> Self {
        self.received_at = Some(at);
        self
    }
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// Filters for listing events. All present filters compose by logical AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilters {
    pub status: Option<EventStatus>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub skip_category: Option<SkipCategory>,
    pub search: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
}

impl EventFilters {
    /// Evaluate the filters against a record in memory.
    pub fn matches(&self, record: &EventAuditRecord) -> bool {
        self.status.is_none_or(|s| record.status == s)
            && self
                .event_type
                .as_deref()
                .is_none_or(|t| record.event_type == t)
            && self.source.as_deref().is_none_or(|s| record.source == s)
            && self
                .skip_category
                .is_none_or(|c| record.skip_category == Some(c))
            && self.start_date.is_none_or(|d| record.received_at >= d)
            && self.end_date.is_none_or(|d| record.received_at <= d)
            && self
                .search
                .as_deref()
                .filter(|s| !s.trim().is_empty())
                .is_none_or(|s| record.matches_search(s.trim()))
    }
}

/// Keyset position for resumable scans: the last `(received_at, event_id)` emitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportCursor {
    pub received_at: DateTime<Utc>,
    pub event_id: EventId,
}

impl ExportCursor {
    pub fn of(record: &EventAuditRecord) -> Self {
        Self {
            received_at: record.received_at,
            event_id: record.event_id.clone(),
        }
    }

    /// Is `record` strictly after this cursor in scan order?
    pub fn precedes(&self, record: &EventAuditRecord) -> bool {
        (record.received_at, &record.event_id) > (self.received_at, &self.event_id)
    }
}

// ---------------------------------------------------------------------------
// Checkpoints and gaps
// ---------------------------------------------------------------------------

/// Last-known-good ingestion marker for one `(org, source)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCheckpoint {
    pub org_id: String,
    pub source: String,
    pub last_seen_at: DateTime<Utc>,
    pub last_seen_event_id: EventId,
    pub expected_interval_ms: Option<u64>,
    /// Events ingested from this source since the checkpoint was created.
    pub event_count: u64,
}

/// An interval between two consecutive events whose width exceeded the threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceGap {
    pub org_id: String,
    pub source: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: u64,
    pub threshold_ms: u64,
}

/// Read-only health view of one source over a look-back window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub org_id: String,
    pub source: String,
    pub checkpoint: Option<SourceCheckpoint>,
    pub gaps: Vec<SourceGap>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub events_in_window: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for from in EventStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
            for to in EventStatus::ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn failed_only_leads_to_redelivery() {
        let exits: Vec<_> = EventStatus::ALL
            .into_iter()
            .filter(|to| EventStatus::Failed.can_transition_to(*to))
            .collect();
        assert_eq!(exits, [EventStatus::Delivering]);
        assert!(EventStatus::Failed.ends_attempt());
        assert!(!EventStatus::Failed.is_terminal());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in EventStatus::ALL {
            assert_eq!(status.as_str().parse::<EventStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<EventStatus>().is_err());
        assert_eq!("delivered".parse::<EventStatus>().unwrap(), EventStatus::Delivered);
    }

    #[test]
    fn timeline_never_goes_backwards() {
        let now = Utc::now();
        let mut record = EventAuditRecord {
            event_id: EventId::from("evt_1"),
            org_id: "org".into(),
            source: "push".into(),
            source_id: None,
            event_type: "order.created".into(),
            event_key: "k".into(),
            payload_hash: "h".into(),
            payload_size: 0,
            payload_summary: serde_json::json!({}),
            status: EventStatus::Received,
            received_at: now,
            received_at_bucket: now,
            timeline: vec![],
            delivery_status: DeliveryStatus::default(),
            skip_category: None,
            skip_reason: None,
            processing_time_ms: None,
        };
        record.push_timeline(now, "RECEIVED", None);
        record.push_timeline(now - chrono::Duration::seconds(5), "VALIDATED", None);
        assert_eq!(record.timeline[1].ts, now);
    }
}
