//! Notification queue persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::QueueStore;

const NOTIFICATION_COLUMNS: &str = "id, org_id, topic, transaction_type, message, event_id, \
     status, retry_count, created_at, delivered_at, last_checked_at, last_error";

#[async_trait]
impl QueueStore for super::Db {
    async fn insert_notification(&self, item: &NotificationItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications (id, org_id, topic, transaction_type, message, event_id, status, retry_count, created_at, delivered_at, last_checked_at, last_error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(item.id.0)
        .bind(&item.org_id)
        .bind(&item.topic)
        .bind(&item.transaction_type)
        .bind(&item.message)
        .bind(item.event_id.as_ref().map(EventId::as_str))
        .bind(item.status.as_str())
        .bind(item.retry_count as i32)
        .bind(item.created_at)
        .bind(item.delivered_at)
        .bind(item.last_checked_at)
        .bind(&item.last_error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn update_notification(&self, item: &NotificationItem) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE notifications SET status = $1, retry_count = $2, delivered_at = $3, last_checked_at = $4, last_error = $5
             WHERE id = $6",
        )
        .bind(item.status.as_str())
        .bind(item.retry_count as i32)
        .bind(item.delivered_at)
        .bind(item.last_checked_at)
        .bind(&item.last_error)
        .bind(item.id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("notification {}", item.id)));
        }
        Ok(())
    }

    async fn get_notification(&self, id: NotificationId) -> Result<Option<NotificationItem>> {
        let row: Option<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;

        row.map(NotificationRow::try_into_item).transpose()
    }

    async fn list_notifications(
        &self,
        org_id: &str,
        status: Option<NotificationStatus>,
        limit: u64,
    ) -> Result<Vec<NotificationItem>> {
        let rows: Vec<NotificationRow> = sqlx::query_as(&format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notifications
             WHERE org_id = $1 AND ($2::text IS NULL OR status = $2)
             ORDER BY created_at ASC LIMIT $3"
        ))
        .bind(org_id)
        .bind(status.map(NotificationStatus::as_str))
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(NotificationRow::try_into_item).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    org_id: String,
    topic: String,
    transaction_type: String,
    message: String,
    event_id: Option<String>,
    status: String,
    retry_count: i32,
    created_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
    last_checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl NotificationRow {
    fn try_into_item(self) -> Result<NotificationItem> {
        Ok(NotificationItem {
            id: NotificationId(self.id),
            org_id: self.org_id,
            topic: self.topic,
            transaction_type: self.transaction_type,
            message: self.message,
            event_id: self.event_id.map(EventId),
            status: self.status.parse()?,
            retry_count: self.retry_count as u32,
            created_at: self.created_at,
            delivered_at: self.delivered_at,
            last_checked_at: self.last_checked_at,
            last_error: self.last_error,
        })
    }
}
