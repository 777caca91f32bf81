//! Event audit records and source checkpoints.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder};

use crate::dedup::get_bucket_timestamp;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::EventStore;

const EVENT_COLUMNS: &str = "event_id, org_id, source, source_id, event_type, event_key, \
     payload_hash, payload_size, payload_summary, status, received_at, received_at_bucket, \
     timeline, integrations_matched, delivered_count, failed_count, skip_category, \
     skip_reason, processing_time_ms";

/// Append the filter predicates to a query already scoped by `org_id`.
fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, filters: &EventFilters) {
    if let Some(status) = filters.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(event_type) = &filters.event_type {
        qb.push(" AND event_type = ").push_bind(event_type.clone());
    }
    if let Some(source) = &filters.source {
        qb.push(" AND source = ").push_bind(source.clone());
    }
    if let Some(category) = filters.skip_category {
        qb.push(" AND skip_category = ").push_bind(category.as_str());
    }
    if let Some(start) = filters.start_date {
        // Indexed bucket pre-filter, then the exact bound.
        qb.push(" AND received_at_bucket >= ")
            .push_bind(get_bucket_timestamp(start));
        qb.push(" AND received_at >= ").push_bind(start);
    }
    if let Some(end) = filters.end_date {
        qb.push(" AND received_at_bucket <= ")
            .push_bind(get_bucket_timestamp(end));
        qb.push(" AND received_at <= ").push_bind(end);
    }
    if let Some(search) = filters.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let pattern = format!("%{}%", escape_like(search));
        qb.push(" AND (event_id ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR event_type ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR source_id ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR skip_reason ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR payload_summary::text ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[async_trait]
impl EventStore for super::Db {
    async fn insert_event(&self, record: &EventAuditRecord) -> Result<()> {
        // The unique index on (org_id, event_key) and the (org_id, event_id)
        // primary key make this an atomic insert-or-reject.
        let inserted: Option<(String,)> = sqlx::query_as(
            "INSERT INTO events (event_id, org_id, source, source_id, event_type, event_key, payload_hash, payload_size, payload_summary, status, received_at, received_at_bucket, timeline, integrations_matched, delivered_count, failed_count, skip_category, skip_reason, processing_time_ms)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
             ON CONFLICT DO NOTHING
             RETURNING event_id",
        )
        .bind(record.event_id.as_str())
        .bind(&record.org_id)
        .bind(&record.source)
        .bind(&record.source_id)
        .bind(&record.event_type)
        .bind(&record.event_key)
        .bind(&record.payload_hash)
        .bind(record.payload_size as i64)
        .bind(&record.payload_summary)
        .bind(record.status.as_str())
        .bind(record.received_at)
        .bind(record.received_at_bucket)
        .bind(Json(&record.timeline))
        .bind(record.delivery_status.integrations_matched as i32)
        .bind(record.delivery_status.delivered_count as i32)
        .bind(record.delivery_status.failed_count as i32)
        .bind(record.skip_category.map(SkipCategory::as_str))
        .bind(&record.skip_reason)
        .bind(record.processing_time_ms.map(|ms| ms as i64))
        .fetch_optional(self.pool())
        .await?;

        if inserted.is_some() {
            return Ok(());
        }

        // Conflict: find the record that already owns the key.
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT event_id FROM events
             WHERE org_id = $1 AND (event_key = $2 OR event_id = $3)
             ORDER BY (event_key = $2) DESC
             LIMIT 1",
        )
        .bind(&record.org_id)
        .bind(&record.event_key)
        .bind(record.event_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        Err(Error::DuplicateEvent {
            event_key: record.event_key.clone(),
            existing_event_id: existing.map(|(id,)| EventId(id)),
        })
    }

    async fn get_event(
        &self,
        org_id: &str,
        event_id: &EventId,
    ) -> Result<Option<EventAuditRecord>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE org_id = $1 AND event_id = $2"
        ))
        .bind(org_id)
        .bind(event_id.as_str())
        .fetch_optional(self.pool())
        .await?;

        row.map(EventRow::try_into_record).transpose()
    }

    async fn update_event(
        &self,
        record: &EventAuditRecord,
        expected: RecordVersion,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE events SET status = $1, timeline = $2, integrations_matched = $3, delivered_count = $4,
                 failed_count = $5, skip_category = $6, skip_reason = $7, processing_time_ms = $8
             WHERE org_id = $9 AND event_id = $10 AND status = $11
               AND jsonb_array_length(timeline) = $12",
        )
        .bind(record.status.as_str())
        .bind(Json(&record.timeline))
        .bind(record.delivery_status.integrations_matched as i32)
        .bind(record.delivery_status.delivered_count as i32)
        .bind(record.delivery_status.failed_count as i32)
        .bind(record.skip_category.map(SkipCategory::as_str))
        .bind(&record.skip_reason)
        .bind(record.processing_time_ms.map(|ms| ms as i64))
        .bind(&record.org_id)
        .bind(record.event_id.as_str())
        .bind(expected.status.as_str())
        .bind(expected.timeline_len as i32)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected > 0 {
            return Ok(());
        }

        let current: Option<(String,)> =
            sqlx::query_as("SELECT status FROM events WHERE org_id = $1 AND event_id = $2")
                .bind(&record.org_id)
                .bind(record.event_id.as_str())
                .fetch_optional(self.pool())
                .await?;

        match current {
            Some((from,)) if from == expected.status.as_str() => {
                Err(Error::Conflict(format!("event {}", record.event_id)))
            }
            Some((from,)) => Err(Error::InvalidTransition {
                from,
                to: record.status.to_string(),
            }),
            None => Err(Error::NotFound(format!("event {}", record.event_id))),
        }
    }

    async fn find_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE org_id = "
        ));
        qb.push_bind(org_id.to_string());
        push_filters(&mut qb, filters);
        qb.push(" ORDER BY received_at DESC, event_id DESC LIMIT ")
            .push_bind(limit as i64)
            .push(" OFFSET ")
            .push_bind(skip as i64);

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        rows.into_iter().map(EventRow::try_into_record).collect()
    }

    async fn count_events(&self, org_id: &str, filters: &EventFilters) -> Result<u64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events WHERE org_id = ");
        qb.push_bind(org_id.to_string());
        push_filters(&mut qb, filters);

        let (count,): (i64,) = qb.build_query_as().fetch_one(self.pool()).await?;
        Ok(count as u64)
    }

    async fn scan_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        after: Option<&ExportCursor>,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>> {
        let mut qb = QueryBuilder::<Postgres>::new(format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE org_id = "
        ));
        qb.push_bind(org_id.to_string());
        push_filters(&mut qb, filters);
        if let Some(cursor) = after {
            qb.push(" AND (received_at, event_id) > (")
                .push_bind(cursor.received_at)
                .push(", ")
                .push_bind(cursor.event_id.0.clone())
                .push(")");
        }
        qb.push(" ORDER BY received_at ASC, event_id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(self.pool()).await?;
        rows.into_iter().map(EventRow::try_into_record).collect()
    }

    async fn event_arrivals(
        &self,
        org_id: &str,
        source: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
            "SELECT received_at FROM events
             WHERE org_id = $1 AND source = $2
               AND received_at_bucket >= $3 AND received_at >= $4 AND received_at <= $5
             ORDER BY received_at ASC",
        )
        .bind(org_id)
        .bind(source)
        .bind(get_bucket_timestamp(since))
        .bind(since)
        .bind(until)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(|(at,)| at).collect())
    }

    async fn upsert_checkpoint(&self, checkpoint: &SourceCheckpoint) -> Result<()> {
        sqlx::query(
            "INSERT INTO source_checkpoints (org_id, source, last_seen_at, last_seen_event_id, expected_interval_ms, event_count)
             VALUES ($1, $2, $3, $4, $5, $6)
             ON CONFLICT (org_id, source) DO UPDATE SET
                 event_count = source_checkpoints.event_count + 1,
                 expected_interval_ms = COALESCE(EXCLUDED.expected_interval_ms, source_checkpoints.expected_interval_ms),
                 last_seen_event_id = CASE WHEN EXCLUDED.last_seen_at >= source_checkpoints.last_seen_at
                     THEN EXCLUDED.last_seen_event_id ELSE source_checkpoints.last_seen_event_id END,
                 last_seen_at = GREATEST(source_checkpoints.last_seen_at, EXCLUDED.last_seen_at)",
        )
        .bind(&checkpoint.org_id)
        .bind(&checkpoint.source)
        .bind(checkpoint.last_seen_at)
        .bind(checkpoint.last_seen_event_id.as_str())
        .bind(checkpoint.expected_interval_ms.map(|ms| ms as i64))
        .bind(checkpoint.event_count as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn list_checkpoints(
        &self,
        org_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<SourceCheckpoint>> {
        let rows: Vec<CheckpointRow> = sqlx::query_as(
            "SELECT org_id, source, last_seen_at, last_seen_event_id, expected_interval_ms, event_count
             FROM source_checkpoints
             WHERE org_id = $1 AND ($2::text IS NULL OR source = $2)
             ORDER BY source",
        )
        .bind(org_id)
        .bind(source)
        .fetch_all(self.pool())
        .await?;

        Ok(rows.into_iter().map(CheckpointRow::into_checkpoint).collect())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct EventRow {
    event_id: String,
    org_id: String,
    source: String,
    source_id: Option<String>,
    event_type: String,
    event_key: String,
    payload_hash: String,
    payload_size: i64,
    payload_summary: serde_json::Value,
    status: String,
    received_at: DateTime<Utc>,
    received_at_bucket: DateTime<Utc>,
    timeline: Json<Vec<TimelineEntry>>,
    integrations_matched: i32,
    delivered_count: i32,
    failed_count: i32,
    skip_category: Option<String>,
    skip_reason: Option<String>,
    processing_time_ms: Option<i64>,
}

impl EventRow {
    fn try_into_record(self) -> Result<EventAuditRecord> {
        Ok(EventAuditRecord {
            event_id: EventId(self.event_id),
            org_id: self.org_id,
            source: self.source,
            source_id: self.source_id,
            event_type: self.event_type,
            event_key: self.event_key,
            payload_hash: self.payload_hash,
            payload_size: self.payload_size as u64,
            payload_summary: self.payload_summary,
            status: self.status.parse()?,
            received_at: self.received_at,
            received_at_bucket: self.received_at_bucket,
            timeline: self.timeline.0,
            delivery_status: DeliveryStatus {
                integrations_matched: self.integrations_matched as u32,
                delivered_count: self.delivered_count as u32,
                failed_count: self.failed_count as u32,
            },
            skip_category: self.skip_category.map(|c| c.parse()).transpose()?,
            skip_reason: self.skip_reason,
            processing_time_ms: self.processing_time_ms.map(|ms| ms as u64),
        })
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    org_id: String,
    source: String,
    last_seen_at: DateTime<Utc>,
    last_seen_event_id: String,
    expected_interval_ms: Option<i64>,
    event_count: i64,
}

impl CheckpointRow {
    fn into_checkpoint(self) -> SourceCheckpoint {
        SourceCheckpoint {
            org_id: self.org_id,
            source: self.source,
            last_seen_at: self.last_seen_at,
            last_seen_event_id: EventId(self.last_seen_event_id),
            expected_interval_ms: self.expected_interval_ms.map(|ms| ms as u64),
            event_count: self.event_count as u64,
        }
    }
}
