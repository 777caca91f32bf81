//! Scheduled jobs and their execution logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Minimum allowed period for interval schedules.
pub const MIN_INTERVAL_MS: u64 = 60_000;

/// Newtype for scheduled job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| Error::Validation(format!("invalid job id: {s}")))
    }
}

/// Newtype for execution log IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// When a job fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Schedule {
    /// Cron calendar, 5 fields or 6 with leading seconds.
    Cron {
        expression: String,
        /// IANA timezone; scheduler default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
    /// Fixed period; first firing one period after scheduling.
    Interval {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
    },
}

impl Schedule {
    pub fn kind(&self) -> &'static str {
        match self {
            Schedule::Cron { .. } => "CRON",
            Schedule::Interval { .. } => "INTERVAL",
        }
    }
}

/// Distinguishes scheduled jobs from push/realtime integrations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    #[default]
    Scheduled,
}

/// Method used to deliver poll results to the target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Post,
    Put,
    Patch,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
        }
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            _ => Err(Error::Validation(format!(
                "httpMethod must be one of POST, PUT, PATCH (got {s})"
            ))),
        }
    }
}

/// Data source configuration: a type tag plus type-specific settings.
///
/// Interpreted by the executor; the model keeps it opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSourceConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub settings: serde_json::Map<String, serde_json::Value>,
}

impl DataSourceConfig {
    pub fn new(kind: impl Into<String>, settings: serde_json::Value) -> Self {
        let settings = match settings {
            serde_json::Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        Self {
            kind: kind.into(),
            settings,
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduled Job
// ---------------------------------------------------------------------------

/// A tenant-owned, cron- or interval-triggered data pull with a delivery target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJob {
    pub id: JobId,
    pub org_id: String,
    pub name: String,
    pub direction: Direction,
    pub schedule: Schedule,
    pub data_source: DataSourceConfig,
    pub target_url: String,
    pub http_method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution Log
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "RUNNING" => Ok(ExecutionStatus::Running),
            "SUCCESS" => Ok(ExecutionStatus::Success),
            "FAILED" => Ok(ExecutionStatus::Failed),
            _ => Err(Error::Other(format!("unknown execution status: {s}"))),
        }
    }
}

/// What started an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKind {
    Scheduled,
    Manual,
}

impl TriggerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerKind::Scheduled => "SCHEDULED",
            TriggerKind::Manual => "MANUAL",
        }
    }
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SCHEDULED" => Ok(TriggerKind::Scheduled),
            "MANUAL" => Ok(TriggerKind::Manual),
            _ => Err(Error::Other(format!("unknown trigger kind: {s}"))),
        }
    }
}

/// One record per execution attempt. Written `RUNNING` at start, then
/// completed exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionLog {
    pub id: ExecutionId,
    pub integration_id: JobId,
    pub org_id: String,
    pub status: ExecutionStatus,
    pub trigger: TriggerKind,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub records_fetched: u64,
    pub error: Option<String>,
}

impl JobExecutionLog {
    pub fn running(id: ExecutionId, job: &ScheduledJob, trigger: TriggerKind) -> Self {
        Self {
            id,
            integration_id: job.id,
            org_id: job.org_id.clone(),
            status: ExecutionStatus::Running,
            trigger,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
            records_fetched: 0,
            error: None,
        }
    }

    pub fn succeed(&mut self, records_fetched: u64, duration_ms: u64) {
        self.finish(ExecutionStatus::Success, records_fetched, duration_ms, None);
    }

    pub fn fail(&mut self, error: impl Into<String>, records_fetched: u64, duration_ms: u64) {
        self.finish(
            ExecutionStatus::Failed,
            records_fetched,
            duration_ms,
            Some(error.into()),
        );
    }

    fn finish(
        &mut self,
        status: ExecutionStatus,
        records_fetched: u64,
        duration_ms: u64,
        error: Option<String>,
    ) {
        self.status = status;
        self.records_fetched = records_fetched;
        self.duration_ms = Some(duration_ms);
        self.completed_at = Some(Utc::now());
        self.error = error;
    }
}
