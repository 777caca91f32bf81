use eventgate::model::*;
use eventgate::queue::NotificationQueue;
use eventgate::store::Stores;

fn test_queue() -> NotificationQueue {
    NotificationQueue::new(Stores::in_memory().notifications)
}

fn complete() -> NewNotification {
    NewNotification::new()
        .org_id("acme")
        .topic("events.ingested")
        .transaction_type("order.created")
        .message(r#"{"eventId":"evt_1"}"#)
}

#[tokio::test]
async fn enqueue_persists_a_pending_item() {
    let queue = test_queue();
    let item = queue
        .enqueue(complete().event_id(EventId("evt_1".into())))
        .await
        .unwrap();

    assert_eq!(item.status, NotificationStatus::Pending);
    assert_eq!(item.retry_count, 0);
    assert!(item.delivered_at.is_none());
    assert!(item.last_checked_at.is_none());
    assert_eq!(item.event_id, Some(EventId("evt_1".into())));

    let fetched = queue.get(item.id).await.unwrap();
    assert_eq!(fetched.topic, "events.ingested");
}

#[tokio::test]
async fn every_missing_field_is_named() {
    let queue = test_queue();
    let err = queue
        .enqueue(NewNotification::new().topic("events.ingested"))
        .await
        .unwrap_err();

    assert_eq!(err.code(), "VALIDATION_ERROR");
    let message = err.to_string();
    for field in ["orgId", "transactionType", "message"] {
        assert!(message.contains(field), "{message}");
    }
    assert!(!message.contains("topic"));
    assert!(queue.list("acme", None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_strings_are_values() {
    let queue = test_queue();
    let item = queue
        .enqueue(
            NewNotification::new()
                .org_id("acme")
                .topic("")
                .transaction_type("")
                .message(""),
        )
        .await
        .unwrap();
    assert_eq!(item.topic, "");
}

#[tokio::test]
async fn failures_count_retries_and_delivery_clears_the_error() {
    let queue = test_queue();
    let item = queue.enqueue(complete()).await.unwrap();

    queue.mark_failed(item.id, "connection refused").await.unwrap();
    let failed = queue.mark_failed(item.id, "HTTP 503").await.unwrap();
    assert_eq!(failed.status, NotificationStatus::Failed);
    assert_eq!(failed.retry_count, 2);
    assert_eq!(failed.last_error.as_deref(), Some("HTTP 503"));
    assert!(failed.last_checked_at.is_some());

    let delivered = queue.mark_delivered(item.id).await.unwrap();
    assert_eq!(delivered.status, NotificationStatus::Delivered);
    assert!(delivered.delivered_at.is_some());
    assert!(delivered.last_error.is_none());
    assert_eq!(delivered.retry_count, 2);
}

#[tokio::test]
async fn list_filters_by_org_and_status() {
    let queue = test_queue();
    let a = queue.enqueue(complete()).await.unwrap();
    queue.enqueue(complete()).await.unwrap();
    queue.enqueue(complete().org_id("globex")).await.unwrap();
    queue.mark_delivered(a.id).await.unwrap();

    assert_eq!(queue.list("acme", None, 10).await.unwrap().len(), 2);
    let pending = queue
        .list("acme", Some(NotificationStatus::Pending), 10)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(queue.list("globex", None, 10).await.unwrap().len(), 1);
    assert_eq!(queue.list("acme", None, 1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn unknown_notification_is_not_found() {
    let queue = test_queue();
    let err = queue.mark_delivered(NotificationId::new()).await.unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}
