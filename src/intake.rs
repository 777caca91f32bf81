//! Push intake: the inbound webhook path.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::audit::EventAuditStore;
use crate::error::{Error, Result};
use crate::model::*;
use crate::queue::NotificationQueue;

/// Topic for events accepted through push intake.
pub const INGESTED_TOPIC: &str = "events.ingested";

const QUEUED_STAGE: &str = "QUEUED";

/// Recorded by push but stopped before its notification was queued.
fn awaits_queueing(record: &EventAuditRecord) -> bool {
    record.source == sources::PUSH
        && matches!(record.status, EventStatus::Received | EventStatus::Validated)
        && !record.timeline.iter().any(|t| t.stage == QUEUED_STAGE)
}

/// Inbound event as posted by a caller.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEvent {
    pub event_type: Option<String>,
    pub payload: Option<Value>,
    /// Caller-supplied id, used as the event id when present.
    pub event_id: Option<String>,
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Accepted,
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushReceipt {
    pub event_id: EventId,
    pub status: PushStatus,
}

#[derive(Clone)]
pub struct EventIntake {
    audit: EventAuditStore,
    queue: NotificationQueue,
}

impl EventIntake {
    pub fn new(audit: EventAuditStore, queue: NotificationQueue) -> Self {
        Self { audit, queue }
    }

    /// Record, validate and enqueue one pushed event.
    ///
    /// A duplicate submission is not an error: the receipt names the event
    /// that already holds the key. When the earlier attempt recorded the
    /// event but failed before queueing it, the duplicate finishes the job.
    pub async fn push(&self, org_id: &str, event: PushEvent) -> Result<PushReceipt> {
        let event_type = event
            .event_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::Validation("eventType is required".into()))?;
        let payload = match event.payload {
            Some(payload @ Value::Object(_)) => payload,
            _ => return Err(Error::Validation("payload must be an object".into())),
        };

        let mut new = NewEventAudit::new(org_id, sources::PUSH, &event_type, payload.clone());
        if let Some(id) = event.event_id.filter(|id| !id.trim().is_empty()) {
            new = new.event_id(EventId(id));
        }
        if let Some(source_id) = event.source_id {
            new = new.source_id(source_id);
        }

        let record = match self.audit.record_event_audit(new).await {
            Ok(record) => record,
            Err(Error::DuplicateEvent {
                existing_event_id: Some(existing),
                ..
            }) => {
                let record = self.audit.get_event_audit_by_id(org_id, &existing).await?;
                if !awaits_queueing(&record) {
                    tracing::debug!(org_id, event_id = %existing, "duplicate push absorbed");
                    return Ok(PushReceipt {
                        event_id: existing,
                        status: PushStatus::Duplicate,
                    });
                }
                // An earlier attempt recorded the event but never queued it.
                tracing::info!(org_id, event_id = %existing, status = %record.status, "finishing an unqueued push");
                let queued = self.queue_event(org_id, record, &event_type, &payload).await?;
                return Ok(PushReceipt {
                    event_id: existing,
                    status: if queued {
                        PushStatus::Accepted
                    } else {
                        PushStatus::Duplicate
                    },
                });
            }
            Err(e) => return Err(e),
        };

        let event_id = record.event_id.clone();
        self.queue_event(org_id, record, &event_type, &payload).await?;
        Ok(PushReceipt {
            event_id,
            status: PushStatus::Accepted,
        })
    }

    /// `VALIDATED`, enqueue, then the `QUEUED` stage. Returns false when a
    /// concurrent attempt validated the event first and owns the queueing.
    async fn queue_event(
        &self,
        org_id: &str,
        record: EventAuditRecord,
        event_type: &str,
        payload: &Value,
    ) -> Result<bool> {
        if record.status == EventStatus::Received {
            match self
                .audit
                .transition(org_id, &record.event_id, EventStatus::Validated, None)
                .await
            {
                Ok(_) => {}
                Err(Error::InvalidTransition { .. }) => return Ok(false),
                Err(e) => return Err(e),
            }
        }

        let message = json!({
            "eventId": record.event_id,
            "eventType": event_type,
            "payload": payload,
        });
        let item = self
            .queue
            .enqueue(
                NewNotification::new()
                    .org_id(org_id)
                    .topic(INGESTED_TOPIC)
                    .transaction_type(event_type)
                    .message(message.to_string())
                    .event_id(record.event_id.clone()),
            )
            .await?;

        self.audit
            .append_timeline(
                org_id,
                &record.event_id,
                QUEUED_STAGE,
                Some(json!({ "notificationId": item.id, "topic": INGESTED_TOPIC })),
            )
            .await?;
        Ok(true)
    }
}
