//! Data-source executor.
//!
//! A data source is selected by the type tag of its configuration and fetched
//! by the matching adapter. Callers always bound a fetch with
//! [`execute_with_timeout`], which races the adapter against a timer whatever
//! the adapter does internally.

pub mod file;
pub mod http;
pub mod query;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::model::{DataSourceConfig, JobId};
use crate::telemetry::metrics;

pub use file::{FileFormat, FileSource};
pub use http::HttpSource;
pub use query::DatabaseSource;

/// Records returned by a test run.
pub const TEST_MAX_RECORDS: usize = 50;
/// Serialized size cap for a test run's records.
pub const TEST_MAX_BYTES: usize = 64 * 1024;

/// Who is asking for the fetch.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Absent for ad hoc test runs of an unsaved configuration.
    pub job_id: Option<JobId>,
    pub org_id: String,
    pub job_name: String,
    pub test_mode: bool,
}

impl JobContext {
    pub fn for_test(org_id: impl Into<String>) -> Self {
        Self {
            job_id: None,
            org_id: org_id.into(),
            job_name: "test".to_string(),
            test_mode: true,
        }
    }
}

/// Records produced by one fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchResult {
    pub records: Vec<Value>,
}

impl FetchResult {
    /// An array yields its elements, `null` nothing, anything else one record.
    pub fn from_value(value: Value) -> Self {
        let records = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Typed data-source configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataSource {
    Http(HttpSource),
    Database(DatabaseSource),
    File(FileSource),
}

impl DataSource {
    pub const KINDS: [&'static str; 3] = ["HTTP", "DATABASE", "FILE"];

    /// Parse and validate an opaque configuration.
    pub fn parse(config: &DataSourceConfig) -> Result<Self> {
        let kind = config.kind.trim().to_ascii_uppercase();
        if !Self::KINDS.contains(&kind.as_str()) {
            return Err(Error::Validation(format!(
                "dataSource.type must be one of {} (got {})",
                Self::KINDS.join(", "),
                config.kind
            )));
        }

        let mut object = config.settings.clone();
        object.insert("type".to_string(), Value::String(kind));
        let source: DataSource = serde_json::from_value(Value::Object(object))
            .map_err(|e| Error::Validation(format!("invalid dataSource: {e}")))?;

        match &source {
            DataSource::Http(s) => s.validate()?,
            DataSource::Database(s) => s.validate()?,
            DataSource::File(s) => s.validate()?,
        }
        Ok(source)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DataSource::Http(_) => "HTTP",
            DataSource::Database(_) => "DATABASE",
            DataSource::File(_) => "FILE",
        }
    }
}

/// Fetch records for a job.
#[async_trait]
pub trait DataSourceFetch: Send + Sync {
    async fn execute(&self, config: &DataSourceConfig, ctx: &JobContext) -> Result<FetchResult>;
}

/// Dispatches to the built-in adapters.
pub struct DataSourceExecutor {
    client: reqwest::Client,
}

impl DataSourceExecutor {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for DataSourceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataSourceFetch for DataSourceExecutor {
    async fn execute(&self, config: &DataSourceConfig, ctx: &JobContext) -> Result<FetchResult> {
        let source = DataSource::parse(config)?;
        tracing::debug!(
            org_id = %ctx.org_id,
            job = %ctx.job_name,
            source_type = source.kind(),
            test_mode = ctx.test_mode,
            "fetching data source"
        );
        let value = match &source {
            DataSource::Http(s) => http::fetch(&self.client, s).await?,
            DataSource::Database(s) => query::fetch(s).await?,
            DataSource::File(s) => file::fetch(s).await?,
        };
        Ok(FetchResult::from_value(value))
    }
}

/// Run a fetch, failing with `Error::Timeout` once `timeout` elapses.
pub async fn execute_with_timeout(
    fetcher: &dyn DataSourceFetch,
    config: &DataSourceConfig,
    ctx: &JobContext,
    timeout: Duration,
) -> Result<FetchResult> {
    match tokio::time::timeout(timeout, fetcher.execute(config, ctx)).await {
        Ok(result) => result,
        Err(_) => {
            metrics::executor_timeouts()
                .add(1, &[KeyValue::new("source_type", config.kind.to_ascii_uppercase())]);
            tracing::warn!(
                org_id = %ctx.org_id,
                job = %ctx.job_name,
                timeout_ms = timeout.as_millis() as u64,
                "data source fetch timed out"
            );
            Err(Error::Timeout {
                operation: format!("{} data source fetch", config.kind.to_ascii_uppercase()),
                timeout_ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// Outcome of a test fetch, capped for display.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub success: bool,
    pub records: Vec<Value>,
    pub total_records: usize,
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Fetch once in test mode. Never fails: errors are reported in the run.
pub async fn test_execute(
    fetcher: &dyn DataSourceFetch,
    config: &DataSourceConfig,
    ctx: &JobContext,
    timeout: Duration,
) -> TestRun {
    let started = Instant::now();
    let result = execute_with_timeout(fetcher, config, ctx, timeout).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    match result {
        Ok(fetched) => {
            let total_records = fetched.len();
            let (records, truncated) = cap_records(fetched.records);
            TestRun {
                success: true,
                records,
                total_records,
                truncated,
                error: None,
                duration_ms,
            }
        }
        Err(e) => TestRun {
            success: false,
            records: Vec::new(),
            total_records: 0,
            truncated: false,
            error: Some(e.to_string()),
            duration_ms,
        },
    }
}

/// Keep at most [`TEST_MAX_RECORDS`] records within [`TEST_MAX_BYTES`].
fn cap_records(mut records: Vec<Value>) -> (Vec<Value>, bool) {
    let mut truncated = false;
    if records.len() > TEST_MAX_RECORDS {
        records.truncate(TEST_MAX_RECORDS);
        truncated = true;
    }

    let mut size = 2;
    let mut keep = 0;
    for record in &records {
        let next = record.to_string().len() + 1;
        if size + next > TEST_MAX_BYTES {
            break;
        }
        size += next;
        keep += 1;
    }
    if keep < records.len() {
        records.truncate(keep);
        truncated = true;
    }
    (records, truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fetch_result_normalizes_shapes() {
        assert_eq!(FetchResult::from_value(json!([1, 2])).len(), 2);
        assert_eq!(FetchResult::from_value(json!({"a": 1})).len(), 1);
        assert!(FetchResult::from_value(Value::Null).is_empty());
    }

    #[test]
    fn parse_selects_variant_case_insensitively() {
        let config = DataSourceConfig::new("http", json!({"url": "https://api.example.com/orders"}));
        assert_eq!(DataSource::parse(&config).unwrap().kind(), "HTTP");

        let unknown = DataSourceConfig::new("FTP", json!({}));
        assert!(DataSource::parse(&unknown).is_err());

        let missing_url = DataSourceConfig::new("HTTP", json!({}));
        assert!(DataSource::parse(&missing_url).is_err());
    }

    #[test]
    fn cap_limits_count_and_size() {
        let many: Vec<Value> = (0..80).map(|i| json!({"i": i})).collect();
        let (kept, truncated) = cap_records(many);
        assert_eq!(kept.len(), TEST_MAX_RECORDS);
        assert!(truncated);

        let big = "x".repeat(20 * 1024);
        let heavy: Vec<Value> = (0..5).map(|_| json!({"blob": big})).collect();
        let (kept, truncated) = cap_records(heavy);
        assert_eq!(kept.len(), 3);
        assert!(truncated);
    }
}
