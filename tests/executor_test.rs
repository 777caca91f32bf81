//! Data-source executor tests: timeouts, test runs and the file adapter.

use std::io::Write;
use std::time::Duration;

use async_trait::async_trait;
use eventgate::error::{Error, Result};
use eventgate::executor::*;
use eventgate::model::DataSourceConfig;
use serde_json::{Value, json};

/// Sleeps before returning a fixed set of records.
struct SlowFetcher {
    delay: Duration,
    records: usize,
}

#[async_trait]
impl DataSourceFetch for SlowFetcher {
    async fn execute(&self, _: &DataSourceConfig, _: &JobContext) -> Result<FetchResult> {
        tokio::time::sleep(self.delay).await;
        Ok(FetchResult {
            records: (0..self.records).map(|i| json!({"n": i})).collect(),
        })
    }
}

struct FailingFetcher;

#[async_trait]
impl DataSourceFetch for FailingFetcher {
    async fn execute(&self, _: &DataSourceConfig, _: &JobContext) -> Result<FetchResult> {
        Err(Error::Other("upstream returned 503".into()))
    }
}

fn http_config() -> DataSourceConfig {
    DataSourceConfig::new("HTTP", json!({"url": "https://api.example.com/orders"}))
}

fn file_config(path: &std::path::Path, format: Option<&str>) -> DataSourceConfig {
    let mut settings = json!({"path": path.to_string_lossy()});
    if let Some(format) = format {
        settings["format"] = Value::String(format.to_string());
    }
    DataSourceConfig::new("FILE", settings)
}

fn temp_file(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test(start_paused = true)]
async fn slow_fetch_times_out() {
    let fetcher = SlowFetcher {
        delay: Duration::from_secs(60),
        records: 1,
    };
    let err = execute_with_timeout(
        &fetcher,
        &http_config(),
        &JobContext::for_test("acme"),
        Duration::from_secs(5),
    )
    .await
    .unwrap_err();

    assert_eq!(err.code(), "TIMEOUT");
    match err {
        Error::Timeout { timeout_ms, .. } => assert_eq!(timeout_ms, 5_000),
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn fast_fetch_beats_the_timer() {
    let fetcher = SlowFetcher {
        delay: Duration::from_millis(10),
        records: 3,
    };
    let fetched = execute_with_timeout(
        &fetcher,
        &http_config(),
        &JobContext::for_test("acme"),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert_eq!(fetched.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_run_caps_records() {
    let fetcher = SlowFetcher {
        delay: Duration::ZERO,
        records: 120,
    };
    let run = test_execute(
        &fetcher,
        &http_config(),
        &JobContext::for_test("acme"),
        Duration::from_secs(5),
    )
    .await;

    assert!(run.success);
    assert_eq!(run.total_records, 120);
    assert_eq!(run.records.len(), TEST_MAX_RECORDS);
    assert!(run.truncated);
    assert!(run.error.is_none());
}

#[tokio::test]
async fn test_run_reports_errors_instead_of_failing() {
    let run = test_execute(
        &FailingFetcher,
        &http_config(),
        &JobContext::for_test("acme"),
        Duration::from_secs(5),
    )
    .await;

    assert!(!run.success);
    assert!(run.records.is_empty());
    assert!(run.error.unwrap().contains("503"));
}

#[tokio::test]
async fn file_source_reads_json_array() {
    let file = temp_file(".json", r#"[{"id": 1}, {"id": 2}]"#);
    let fetched = DataSourceExecutor::new()
        .execute(&file_config(file.path(), None), &JobContext::for_test("acme"))
        .await
        .unwrap();
    assert_eq!(fetched.records, vec![json!({"id": 1}), json!({"id": 2})]);
}

#[tokio::test]
async fn file_source_reads_ndjson_by_extension() {
    let file = temp_file(".ndjson", "{\"id\": 1}\n\n{\"id\": 2}\n{\"id\": 3}\n");
    let fetched = DataSourceExecutor::new()
        .execute(&file_config(file.path(), None), &JobContext::for_test("acme"))
        .await
        .unwrap();
    assert_eq!(fetched.len(), 3);
}

#[tokio::test]
async fn file_source_reads_csv_with_explicit_format() {
    let file = temp_file(".txt", "orderId,total\nA-1,10\nA-2,20\n");
    let fetched = DataSourceExecutor::new()
        .execute(
            &file_config(file.path(), Some("CSV")),
            &JobContext::for_test("acme"),
        )
        .await
        .unwrap();
    assert_eq!(fetched.len(), 2);
    assert_eq!(fetched.records[1], json!({"orderId": "A-2", "total": "20"}));
}

#[tokio::test]
async fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = DataSourceExecutor::new()
        .execute(
            &file_config(&dir.path().join("absent.json"), None),
            &JobContext::for_test("acme"),
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn unknown_source_type_is_a_validation_error() {
    let config = DataSourceConfig::new("SFTP", json!({"host": "files.example.com"}));
    let err = DataSourceExecutor::new()
        .execute(&config, &JobContext::for_test("acme"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
}

#[test]
fn database_source_rejects_writes() {
    let config = DataSourceConfig::new(
        "database",
        json!({"connectionUrl": "postgres://localhost/erp", "query": "DELETE FROM orders"}),
    );
    assert!(DataSource::parse(&config).is_err());

    let config = DataSourceConfig::new(
        "database",
        json!({"connectionUrl": "postgres://localhost/erp", "query": "SELECT id FROM orders"}),
    );
    assert_eq!(DataSource::parse(&config).unwrap().kind(), "DATABASE");
}
