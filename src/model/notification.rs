//! Delivery work items handed to downstream consumers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::EventId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(pub Uuid);

impl NotificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NotificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationStatus::Pending => "PENDING",
            NotificationStatus::Delivered => "DELIVERED",
            NotificationStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NotificationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(NotificationStatus::Pending),
            "DELIVERED" => Ok(NotificationStatus::Delivered),
            "FAILED" => Ok(NotificationStatus::Failed),
            _ => Err(Error::Validation(format!("unknown notification status: {s}"))),
        }
    }
}

/// A queued delivery work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationItem {
    pub id: NotificationId,
    pub org_id: String,
    pub topic: String,
    pub transaction_type: String,
    /// Serialized message body.
    pub message: String,
    pub event_id: Option<EventId>,
    pub status: NotificationStatus,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Builder for enqueueing a notification.
///
/// Required fields stay `None` until set; enqueue rejects any that are still
/// unset. An explicitly empty string is a value, not a missing field.
#[derive(Debug, Clone, Default)]
pub struct NewNotification {
    pub(crate) org_id: Option<String>,
    pub(crate) topic: Option<String>,
    pub(crate) transaction_type: Option<String>,
    pub(crate) message: Option<String>,
    pub(crate) event_id: Option<EventId>,
}

impl NewNotification {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn org_id(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn transaction_type(mut self, transaction_type: impl Into<String>) -> Self {
        self.transaction_type = Some(transaction_type.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Names of required fields that were never set.
    pub fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("orgId", self.org_id.is_none()),
            ("topic", self.topic.is_none()),
            ("transactionType", self.transaction_type.is_none()),
            ("message", self.message.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect()
    }
}
