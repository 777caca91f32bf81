//! Delivery work queue producer.
//!
//! Enqueue validates required fields before anything is persisted: a field
//! that was never set is an error, an explicitly empty string is a value.

use std::sync::Arc;

use chrono::Utc;
use opentelemetry::KeyValue;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::QueueStore;
use crate::telemetry::metrics;

#[derive(Clone)]
pub struct NotificationQueue {
    store: Arc<dyn QueueStore>,
}

impl NotificationQueue {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Persist a `PENDING` item with zero retries and no delivery timestamps.
    pub async fn enqueue(&self, new: NewNotification) -> Result<NotificationItem> {
        let missing = new.missing_fields();
        if !missing.is_empty() {
            return Err(Error::Validation(format!(
                "notification is missing required fields: {}",
                missing.join(", ")
            )));
        }

        let (Some(org_id), Some(topic), Some(transaction_type), Some(message)) =
            (new.org_id, new.topic, new.transaction_type, new.message)
        else {
            return Err(Error::Validation("notification is incomplete".into()));
        };

        let item = NotificationItem {
            id: NotificationId::new(),
            org_id,
            topic,
            transaction_type,
            message,
            event_id: new.event_id,
            status: NotificationStatus::Pending,
            retry_count: 0,
            created_at: Utc::now(),
            delivered_at: None,
            last_checked_at: None,
            last_error: None,
        };
        self.store.insert_notification(&item).await?;

        metrics::notifications_enqueued().add(1, &[KeyValue::new("topic", topic_label(&item.topic))]);
        tracing::debug!(notification_id = %item.id, topic = %item.topic, "notification enqueued");
        Ok(item)
    }

    pub async fn get(&self, id: NotificationId) -> Result<NotificationItem> {
        self.store
            .get_notification(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("notification {id}")))
    }

    pub async fn mark_delivered(&self, id: NotificationId) -> Result<NotificationItem> {
        let mut item = self.get(id).await?;
        let now = Utc::now();
        item.status = NotificationStatus::Delivered;
        item.delivered_at = Some(now);
        item.last_checked_at = Some(now);
        item.last_error = None;
        self.store.update_notification(&item).await?;
        Ok(item)
    }

    /// Record a failed attempt. Retry scheduling belongs to the consumer.
    pub async fn mark_failed(
        &self,
        id: NotificationId,
        error: impl Into<String>,
    ) -> Result<NotificationItem> {
        let mut item = self.get(id).await?;
        item.status = NotificationStatus::Failed;
        item.retry_count += 1;
        item.last_checked_at = Some(Utc::now());
        item.last_error = Some(error.into());
        self.store.update_notification(&item).await?;
        Ok(item)
    }

    pub async fn list(
        &self,
        org_id: &str,
        status: Option<NotificationStatus>,
        limit: u64,
    ) -> Result<Vec<NotificationItem>> {
        self.store.list_notifications(org_id, status, limit).await
    }
}

/// Poll deliveries use the target URL as topic; keep the metric label bounded.
fn topic_label(topic: &str) -> String {
    if topic.starts_with("http://") || topic.starts_with("https://") {
        "webhook".to_string()
    } else {
        topic.to_string()
    }
}
