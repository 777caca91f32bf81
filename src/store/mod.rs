//! Storage contracts.
//!
//! The gateway treats persistence as an abstract document store. Each
//! collection has its own trait so backends can be mixed; [`Stores`] bundles
//! one of each. The store, not the caller, is the arbiter of duplicates:
//! [`EventStore::insert_event`] is an atomic insert-or-reject.

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::db::Db;
use crate::error::Result;
use crate::model::*;

pub use memory::MemoryStore;

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert a new record. Fails with `Error::DuplicateEvent` when the org
    /// already holds the event id or the event key.
    async fn insert_event(&self, record: &EventAuditRecord) -> Result<()>;

    async fn get_event(&self, org_id: &str, event_id: &EventId)
    -> Result<Option<EventAuditRecord>>;

    /// Replace a record, provided the stored one is still at `expected`.
    /// Fails with `Error::InvalidTransition` when the status moved on,
    /// `Error::Conflict` when only the timeline grew, `Error::NotFound` if absent.
    async fn update_event(&self, record: &EventAuditRecord, expected: RecordVersion)
    -> Result<()>;

    /// Filtered page, newest first.
    async fn find_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        skip: u64,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>>;

    async fn count_events(&self, org_id: &str, filters: &EventFilters) -> Result<u64>;

    /// Keyset scan in `(received_at, event_id)` ascending order, strictly after `after`.
    async fn scan_events(
        &self,
        org_id: &str,
        filters: &EventFilters,
        after: Option<&ExportCursor>,
        limit: u64,
    ) -> Result<Vec<EventAuditRecord>>;

    /// Arrival times for one source within `[since, until]`, ascending.
    async fn event_arrivals(
        &self,
        org_id: &str,
        source: &str,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>>;

    /// Create or advance a checkpoint. Never moves `last_seen_at` backwards.
    async fn upsert_checkpoint(&self, checkpoint: &SourceCheckpoint) -> Result<()>;

    async fn list_checkpoints(
        &self,
        org_id: &str,
        source: Option<&str>,
    ) -> Result<Vec<SourceCheckpoint>>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()>;

    /// Replace an existing job. `Error::NotFound` if absent.
    async fn update_job(&self, job: &ScheduledJob) -> Result<()>;

    /// Returns whether a job was deleted.
    async fn delete_job(&self, org_id: &str, id: JobId) -> Result<bool>;

    async fn get_job(&self, org_id: &str, id: JobId) -> Result<Option<ScheduledJob>>;

    async fn list_jobs(&self, org_id: &str) -> Result<Vec<ScheduledJob>>;

    /// Active jobs across every org, for re-registration at startup.
    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>>;

    async fn insert_execution_log(&self, log: &JobExecutionLog) -> Result<()>;

    async fn update_execution_log(&self, log: &JobExecutionLog) -> Result<()>;

    /// Most recent first.
    async fn list_execution_logs(
        &self,
        org_id: &str,
        job_id: JobId,
        limit: u64,
    ) -> Result<Vec<JobExecutionLog>>;
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    async fn insert_notification(&self, item: &NotificationItem) -> Result<()>;

    async fn update_notification(&self, item: &NotificationItem) -> Result<()>;

    async fn get_notification(&self, id: NotificationId) -> Result<Option<NotificationItem>>;

    /// Oldest first.
    async fn list_notifications(
        &self,
        org_id: &str,
        status: Option<NotificationStatus>,
        limit: u64,
    ) -> Result<Vec<NotificationItem>>;
}

/// One backend per collection.
#[derive(Clone)]
pub struct Stores {
    pub events: Arc<dyn EventStore>,
    pub jobs: Arc<dyn JobStore>,
    pub notifications: Arc<dyn QueueStore>,
}

impl Stores {
    /// All collections in a single in-process store.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            events: store.clone(),
            jobs: store.clone(),
            notifications: store,
        }
    }

    /// All collections in Postgres.
    pub fn postgres(db: Arc<Db>) -> Self {
        Self {
            events: db.clone(),
            jobs: db.clone(),
            notifications: db,
        }
    }
}
