//! In-memory storage for tests and single-process deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::model::*;

use super::{EventStore, JobStore, QueueStore};

#[derive(Default)]
struct EventTable {
    /// Event ids are unique per org, not globally.
    by_id: HashMap<(String, EventId), EventAuditRecord>,
    /// Unique index on `(org_id, event_key)`.
    by_key: HashMap<(String, String), EventId>,
}

/// Process-local store implementing every collection.
///
/// Uniqueness checks and inserts happen under a single write lock, giving the
/// same insert-or-reject atomicity as a unique index.
#[derive(Default)]
pub struct MemoryStore {
    events: RwLock<EventTable>,
    checkpoints: RwLock<HashMap<(String, String), SourceCheckpoint>>,
    jobs: RwLock<HashMap<JobId, ScheduledJob>>,
    executions: RwLock<Vec<JobExecutionLog>>,
    notifications: RwLock<Vec<NotificationItem>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn insert_event(&self, record: &EventAuditRecord) -> Result<()> {
        let mut table = self.events.write().await;
        let key = (record.org_id.clone(), record.event_key.clone());
        let id = (record.org_id.clone(), record.event_id.clone());

        if let Some(existing) = table.by_key.get(&key) {
            return Err(Error::DuplicateEvent {
                event_key: record.event_key.clone(),
                existing_event_id: Some(existing.clone()),
            });
        }
        if table.by_id.contains_key(&id) {
            return Err(Error::DuplicateEvent {
                event_key: record.event_key.clone(),
                existing_event_id: Some(record.event_id.clone()),
            });
        }

        table.by_key.insert(key, record.event_id.clone());
        table.by_id.insert(id, record.clone());
        Ok(())
    }

    async fn get_event(
        &self,
        org_id: &str,
        event_id: &EventId,
    ) -> Result<Option<EventAuditRecord>> {
        let table = self.events.read().await;
        Ok(table
            .by_id
            .get(&(org_id.to_string(), event_id.clone()))
            .cloned())
    }

    async fn update_event(
        &self,
        record: &EventAuditRecord,
        expected: RecordVersion,
    ) -> Result<()> {
        let mut table = self.events.write().await;
        let stored = table
            .by_id
            .get_mut(&(record.org_id.clone(), record.event_id.clone()))
            .ok_or_else(|| Error::NotFound(format!("event {}", record.event_id)))?;

        if stored.status != expected.status {
            return Err(Error::InvalidTransition {
                from: stored.status.to_string(),
                to: record.status.to_string(),
            });
        }
        if stored.timeline.len() != expected.timeline_len {
            return Err(Error::Conflict(format!("event {}", record.event_id)));
        }
        *stored = record.clone();
        Ok(())
    }

    async fn find_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>> {
        let table = self.events.read().await;
        let mut matched: Vec<&EventAuditRecord> = table
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && filters.matches(r))
            .collect();
        matched.sort_by(|a, b| {
            (b.received_at, &b.event_id).cmp(&(a.received_at, &a.event_id))
        });
        Ok(matched
            .into_iter()
            .skip(skip as usize)
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn count_events(&self, org_id: &str, filters: &EventFilters) -> Result<u64> {
        let table = self.events.read().await;
        Ok(table
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && filters.matches(r))
            .count() as u64)
    }

    async fn scan_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        after: Option<&ExportCursor>,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>> {
        let table = self.events.read().await;
        let mut matched: Vec<&EventAuditRecord> = table
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && filters.matches(r))
            .filter(|r| after.is_none_or(|cursor| cursor.precedes(r)))
            .collect();
        matched.sort_by(|a, b| {
            (a.received_at, &a.event_id).cmp(&(b.received_at, &b.event_id))
        });
        Ok(matched
            .into_iter()
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn event_arrivals(
        &self,
        org_id: &str,
        source: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>> {
        let table = self.events.read().await;
        let mut arrivals: Vec<DateTime<Utc>> = table
            .by_id
            .values()
            .filter(|r| r.org_id == org_id && r.source == source)
            .map(|r| r.received_at)
            .filter(|at| *at >= since && *at <= until)
            .collect();
        arrivals.sort();
        Ok(arrivals)
    }

    async fn upsert_checkpoint(&self, checkpoint: &SourceCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        let key = (checkpoint.org_id.clone(), checkpoint.source.clone());
        match checkpoints.get_mut(&key) {
            Some(existing) => {
                existing.event_count += 1;
                if checkpoint.expected_interval_ms.is_some() {
                    existing.expected_interval_ms = checkpoint.expected_interval_ms;
                }
                if checkpoint.last_seen_at >= existing.last_seen_at {
                    existing.last_seen_at = checkpoint.last_seen_at;
                    existing.last_seen_event_id = checkpoint.last_seen_event_id.clone();
                }
            }
            None => {
                checkpoints.insert(key, checkpoint.clone());
            }
        }
        Ok(())
    }

    async fn list_checkpoints(
        &self,
        org_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<SourceCheckpoint>> {
        let checkpoints = self.checkpoints.read().await;
        let mut out: Vec<SourceCheckpoint> = checkpoints
            .values()
            .filter(|c| c.org_id == org_id && source.is_none_or(|s| c.source == s))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.source.cmp(&b.source));
        Ok(out)
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(Error::Other(format!("job {} already exists", job.id)));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &ScheduledJob) -> Result<()> {
        let mut jobs = self.jobs.write().await;
        match jobs.get_mut(&job.id).filter(|j| j.org_id == job.org_id) {
            Some(stored) => {
                *stored = job.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("scheduled job {}", job.id))),
        }
    }

    async fn delete_job(&self, org_id: &str, id: JobId) -> Result<bool> {
        let mut jobs = self.jobs.write().await;
        if jobs.get(&id).is_some_and(|j| j.org_id == org_id) {
            jobs.remove(&id);
            return Ok(true);
        }
        Ok(false)
    }

    async fn get_job(&self, org_id: &str, id: JobId) -> Result<Option<ScheduledJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id).filter(|j| j.org_id == org_id).cloned())
    }

    async fn list_jobs(&self, org_id: &str) -> Result<Vec<ScheduledJob>> {
        let jobs = self.jobs.read().await;
        let mut out: Vec<ScheduledJob> = jobs
            .values()
            .filter(|j| j.org_id == org_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(out)
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.values().filter(|j| j.is_active).cloned().collect())
    }

    async fn insert_execution_log(&self, log: &JobExecutionLog) -> Result<()> {
        self.executions.write().await.push(log.clone());
        Ok(())
    }

    async fn update_execution_log(&self, log: &JobExecutionLog) -> Result<()> {
        let mut executions = self.executions.write().await;
        match executions.iter_mut().find(|l| l.id == log.id) {
            Some(stored) => {
                *stored = log.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("execution log {}", log.id))),
        }
    }

    async fn list_execution_logs(
        &self,
        org_id: &str,
        job_id: JobId,
        limit: u64,
    ) -> Result<Vec<JobExecutionLog>> {
        let executions = self.executions.read().await;
        Ok(executions
            .iter()
            .rev()
            .filter(|l| l.org_id == org_id && l.integration_id == job_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn insert_notification(&self, item: &NotificationItem) -> Result<()> {
        self.notifications.write().await.push(item.clone());
        Ok(())
    }

    async fn update_notification(&self, item: &NotificationItem) -> Result<()> {
        let mut notifications = self.notifications.write().await;
        match notifications.iter_mut().find(|n| n.id == item.id) {
            Some(stored) => {
                *stored = item.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("notification {}", item.id))),
        }
    }

    async fn get_notification(&self, id: NotificationId) -> Result<Option<NotificationItem>> {
        let notifications = self.notifications.read().await;
        Ok(notifications.iter().find(|n| n.id == id).cloned())
    }

    async fn list_notifications(
        &self,
        org_id: &str,
        status: Option<NotificationStatus>,
        limit: u64,
    ) -> Result<Vec<NotificationItem>> {
        let notifications = self.notifications.read().await;
        Ok(notifications
            .iter()
            .filter(|n| n.org_id == org_id && status.is_none_or(|s| n.status == s))
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, key: &str, org: &str) -> EventAuditRecord {
        let now = Utc::now();
        EventAuditRecord {
            event_id: EventId::from(id),
            org_id: org.into(),
            source: "push".into(),
            source_id: None,
            event_type: "t".into(),
            event_key: key.into(),
            payload_hash: "h".into(),
            payload_size: 2,
            payload_summary: json!({}),
            status: EventStatus::Received,
            received_at: now,
            received_at_bucket: crate::dedup::get_bucket_timestamp(now),
            timeline: vec![],
            delivery_status: DeliveryStatus::default(),
            skip_category: None,
            skip_reason: None,
            processing_time_ms: None,
        }
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_per_org() {
        let store = MemoryStore::new();
        store.insert_event(&record("e1", "k", "org-a")).await.unwrap();

        let err = store
            .insert_event(&record("e2", "k", "org-a"))
            .await
            .unwrap_err();
        match err {
            Error::DuplicateEvent {
                existing_event_id, ..
            } => assert_eq!(existing_event_id, Some(EventId::from("e1"))),
            other => panic!("expected DuplicateEvent, got {other:?}"),
        }

        // Same key in another org is a different event.
        store.insert_event(&record("e3", "k", "org-b")).await.unwrap();
    }

    #[tokio::test]
    async fn update_is_conditional_on_status() {
        let store = MemoryStore::new();
        let mut r = record("e1", "k", "org");
        store.insert_event(&r).await.unwrap();

        let received = RecordVersion::of(&r);
        r.status = EventStatus::Validated;
        store.update_event(&r, received).await.unwrap();

        r.status = EventStatus::Matched;
        let err = store.update_event(&r, received).await.unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn update_is_conditional_on_timeline_length() {
        let store = MemoryStore::new();
        let r = record("e1", "k", "org");
        store.insert_event(&r).await.unwrap();
        let loaded = RecordVersion::of(&r);

        let mut first = r.clone();
        first.push_timeline(Utc::now(), "QUEUED", None);
        store.update_event(&first, loaded).await.unwrap();

        let mut second = r.clone();
        second.push_timeline(Utc::now(), "NOTE", None);
        let err = store.update_event(&second, loaded).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        let stored = store.get_event("org", &r.event_id).await.unwrap().unwrap();
        assert_eq!(stored.timeline.last().unwrap().stage, "QUEUED");
    }

    #[tokio::test]
    async fn event_ids_are_scoped_per_org() {
        let store = MemoryStore::new();
        store.insert_event(&record("ext-1", "k1", "org-a")).await.unwrap();
        store.insert_event(&record("ext-1", "k2", "org-b")).await.unwrap();

        let a = store.get_event("org-a", &EventId::from("ext-1")).await.unwrap().unwrap();
        let b = store.get_event("org-b", &EventId::from("ext-1")).await.unwrap().unwrap();
        assert_eq!(a.event_key, "k1");
        assert_eq!(b.event_key, "k2");
    }
}
