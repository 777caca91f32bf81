//! Integration tests for the bulk import pipeline.

use eventgate::audit::EventAuditStore;
use eventgate::import::*;
use eventgate::model::*;
use eventgate::store::Stores;
use serde_json::{Value, json};

fn test_importer() -> (BulkImporter, EventAuditStore) {
    let stores = Stores::in_memory();
    let audit = EventAuditStore::new(stores.events);
    (BulkImporter::new(audit.clone()), audit)
}

fn valid(i: usize) -> Value {
    json!({"eventType": "order.created", "payload": {"orderId": format!("o-{i}")}})
}

async fn stored(audit: &EventAuditStore) -> u64 {
    audit
        .list_event_audit("acme", &EventFilters::default(), Pagination::default())
        .await
        .unwrap()
        .total
}

#[tokio::test]
async fn partial_failure_classifies_each_item_once() {
    let (importer, audit) = test_importer();
    let batch = vec![
        valid(0),
        json!({"payload": {"orderId": "o-1"}}),
        valid(2),
    ];

    let report = importer
        .import("acme", batch, ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(
        report.summary,
        ImportSummary {
            total: 3,
            successful: 2,
            failed: 1,
            duplicates: 0
        }
    );
    assert!(!report.success);
    assert_eq!(report.results.failed.len(), 1);
    assert_eq!(report.results.failed[0].index, 1);
    assert_eq!(report.results.failed[0].code, "VALIDATION_ERROR");
    assert!(report.results.successful.iter().all(|s| s.index != 1));
    assert_eq!(report.outcome(), ImportOutcome::Partial);
    assert_eq!(stored(&audit).await, 2);
}

#[tokio::test]
async fn over_cap_batch_fails_before_persisting() {
    let (importer, audit) = test_importer();
    let batch: Vec<Value> = (0..MAX_IMPORT_BATCH + 1).map(valid).collect();

    let err = importer
        .import("acme", batch, ImportOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().contains("1001"));
    assert_eq!(stored(&audit).await, 0);
}

#[tokio::test]
async fn batch_at_cap_succeeds() {
    let (importer, _) = test_importer();
    let batch: Vec<Value> = (0..MAX_IMPORT_BATCH).map(valid).collect();

    let report = importer
        .import("acme", batch, ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.successful, MAX_IMPORT_BATCH);
    assert!(report.success);
    assert_eq!(report.outcome(), ImportOutcome::Complete);
}

#[tokio::test]
async fn reimport_is_classified_duplicate() {
    let (importer, audit) = test_importer();
    let batch = vec![valid(0), valid(1)];
    let first = importer
        .import("acme", batch.clone(), ImportOptions::default())
        .await
        .unwrap();

    let second = importer
        .import("acme", batch, ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(second.summary.duplicates, 2);
    assert_eq!(second.summary.failed, 0);
    assert!(second.success);
    // All duplicates is still a complete, successful import.
    assert_eq!(second.outcome(), ImportOutcome::Complete);
    assert_eq!(
        second.results.duplicates[0].existing_event_id,
        first.results.successful[0].event_id
    );
    assert_eq!(stored(&audit).await, 2);
}

#[tokio::test]
async fn duplicates_within_one_batch() {
    let (importer, _) = test_importer();
    let report = importer
        .import("acme", vec![valid(7), valid(7)], ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.duplicates, 1);
    assert_eq!(report.results.duplicates[0].index, 1);
    assert!(report.is_partial());
}

#[tokio::test]
async fn dry_run_persists_nothing() {
    let (importer, audit) = test_importer();
    let options = ImportOptions {
        dry_run: true,
        ..Default::default()
    };
    let report = importer
        .import("acme", vec![valid(0), json!({"eventType": "x"})], options)
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.results.successful[0].status, EventStatus::Validated);
    assert!(report.results.successful[0].event_id.is_none());
    assert_eq!(stored(&audit).await, 0);
}

#[tokio::test]
async fn stop_on_error_marks_rest_not_processed() {
    let (importer, audit) = test_importer();
    let options = ImportOptions {
        continue_on_error: false,
        ..Default::default()
    };
    let batch = vec![valid(0), json!({"eventType": "order.created", "payload": "text"}), valid(2), valid(3)];

    let report = importer.import("acme", batch, options).await.unwrap();
    assert_eq!(report.summary.total, 4);
    assert_eq!(report.summary.successful, 1);
    assert_eq!(report.summary.failed, 3);
    let codes: Vec<_> = report.results.failed.iter().map(|f| (f.index, f.code.as_str())).collect();
    assert_eq!(
        codes,
        [(1, "VALIDATION_ERROR"), (2, NOT_PROCESSED), (3, NOT_PROCESSED)]
    );
    assert_eq!(stored(&audit).await, 1);
}

#[tokio::test]
async fn nothing_succeeding_is_rejected() {
    let (importer, _) = test_importer();
    let report = importer
        .import("acme", vec![json!({}), json!(42)], ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.outcome(), ImportOutcome::Rejected);
    assert_eq!(report.summary.failed, 2);
}

#[tokio::test]
async fn optional_fields_are_carried_over() {
    let (importer, audit) = test_importer();
    let item = json!({
        "eventType": "order.created",
        "payload": {"orderId": "o-1"},
        "source": "legacy-erp",
        "sourceId": 1234,
        "receivedAt": "2026-03-01T10:15:00Z"
    });
    let report = importer
        .import("acme", vec![item], ImportOptions::default())
        .await
        .unwrap();
    let id = report.results.successful[0].event_id.clone().unwrap();
    assert!(id.as_str().starts_with("imp_"));

    let record = audit.get_event_audit_by_id("acme", &id).await.unwrap();
    assert_eq!(record.source, "legacy-erp");
    assert_eq!(record.source_id.as_deref(), Some("1234"));
    assert_eq!(record.received_at.to_rfc3339(), "2026-03-01T10:15:00+00:00");
    assert_eq!(record.status, EventStatus::Received);
}

#[tokio::test]
async fn bad_timestamp_fails_the_item() {
    let (importer, _) = test_importer();
    let item = json!({"eventType": "a", "payload": {}, "receivedAt": "yesterday"});
    let report = importer
        .import("acme", vec![item], ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.failed, 1);
    assert!(report.results.failed[0].error.contains("receivedAt"));
}

#[tokio::test]
async fn csv_body_imports_and_reports_parse_errors() {
    let (importer, audit) = test_importer();
    let body = "eventType,payload,source\n\
                order.created,\"{\"\"orderId\"\":\"\"c-1\"\"}\",erp\n\
                order.created,{not json},erp\n\
                order.created,\"{\"\"orderId\"\":\"\"c-2\"\"}\",\n";

    let report = importer
        .import_body("acme", ImportFormat::Csv, body.as_bytes(), ImportOptions::default())
        .await
        .unwrap();

    assert_eq!(report.summary.successful, 2);
    assert_eq!(report.parse_errors.len(), 1);
    assert_eq!(report.parse_errors[0].line, 3);

    let bulk = EventFilters {
        source: Some(sources::BULK_IMPORT.into()),
        ..Default::default()
    };
    let page = audit
        .list_event_audit("acme", &bulk, Pagination::default())
        .await
        .unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn json_envelope_body_is_accepted() {
    let (importer, _) = test_importer();
    let body = json!({"events": [valid(0), valid(1)]}).to_string();
    let format = ImportFormat::detect(None, body.as_bytes());
    assert_eq!(format, ImportFormat::Json);

    let report = importer
        .import_body("acme", format, body.as_bytes(), ImportOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.successful, 2);
}

#[test]
fn report_serializes_in_camel_case() {
    let report = ImportReport {
        success: true,
        dry_run: false,
        summary: ImportSummary::default(),
        results: ImportResults::default(),
        parse_errors: Vec::new(),
    };
    let value = serde_json::to_value(&report).unwrap();
    assert!(value.get("dryRun").is_some());
    assert!(value.get("parseErrors").is_none());
}
