//! Scheduled-job management: persistence plus keeping the scheduler in sync.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;

use crate::config::GatewaySettings;
use crate::error::{Error, Result};
use crate::executor::{DataSource, JobContext, TestRun, test_execute};
use crate::model::*;
use crate::scheduler::{Dispatch, Scheduler, Trigger};
use crate::store::JobStore;

pub const DEFAULT_LOG_LIMIT: u64 = 20;
pub const MAX_LOG_LIMIT: u64 = 200;

/// Schedule as submitted. Validated into [`Schedule`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub expression: Option<String>,
    pub interval_ms: Option<u64>,
    pub timezone: Option<String>,
}

/// Create or update body. On update, absent fields keep their stored values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledJobRequest {
    pub name: Option<String>,
    pub schedule: Option<ScheduleRequest>,
    pub data_source: Option<Value>,
    pub target_url: Option<String>,
    pub http_method: Option<String>,
    pub headers: Option<BTreeMap<String, String>>,
    /// Cron timezone, used when the schedule does not carry one.
    pub timezone: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Clone)]
pub struct JobService {
    jobs: Arc<dyn JobStore>,
    scheduler: Scheduler,
    settings: GatewaySettings,
}

impl JobService {
    pub fn new(jobs: Arc<dyn JobStore>, scheduler: Scheduler, settings: GatewaySettings) -> Self {
        Self {
            jobs,
            scheduler,
            settings,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub async fn create(&self, org_id: &str, request: ScheduledJobRequest) -> Result<ScheduledJob> {
        let name = required_name(request.name.as_deref())?;
        let schedule = match &request.schedule {
            Some(s) => parse_schedule(s, request.timezone.as_deref())?,
            None => return Err(Error::Validation("schedule is required".into())),
        };
        let data_source = match &request.data_source {
            Some(v) => parse_data_source(v)?,
            None => return Err(Error::Validation("dataSource is required".into())),
        };
        let target_url = match request.target_url.as_deref() {
            Some(url) => parse_target_url(url)?,
            None => return Err(Error::Validation("targetUrl is required".into())),
        };
        let http_method = match request.http_method.as_deref() {
            Some(m) => m.parse()?,
            None => HttpMethod::default(),
        };

        let now = Utc::now();
        let job = ScheduledJob {
            id: JobId::new(),
            org_id: org_id.to_string(),
            name,
            direction: Direction::Scheduled,
            schedule,
            data_source,
            target_url,
            http_method,
            headers: request.headers.unwrap_or_default(),
            is_active: request.is_active.unwrap_or(true),
            created_at: now,
            updated_at: now,
        };
        self.validate_trigger(&job)?;

        self.jobs.insert_job(&job).await?;
        self.scheduler.schedule_job(&job)?;
        tracing::info!(org_id, job_id = %job.id, name = %job.name, active = job.is_active, "scheduled job created");
        Ok(job)
    }

    /// Merge `request` over the stored job, persist, and reschedule.
    pub async fn update(
        &self,
        org_id: &str,
        id: JobId,
        request: ScheduledJobRequest,
    ) -> Result<ScheduledJob> {
        let mut job = self.get(org_id, id).await?;

        if let Some(name) = request.name.as_deref() {
            job.name = required_name(Some(name))?;
        }
        if let Some(schedule) = &request.schedule {
            job.schedule = parse_schedule(schedule, request.timezone.as_deref())?;
        } else if let Some(tz) = request.timezone.as_deref() {
            if let Schedule::Cron { timezone, .. } = &mut job.schedule {
                *timezone = Some(tz.to_string());
            }
        }
        if let Some(data_source) = &request.data_source {
            job.data_source = parse_data_source(data_source)?;
        }
        if let Some(url) = request.target_url.as_deref() {
            job.target_url = parse_target_url(url)?;
        }
        if let Some(method) = request.http_method.as_deref() {
            job.http_method = method.parse()?;
        }
        if let Some(headers) = request.headers {
            job.headers = headers;
        }
        if let Some(active) = request.is_active {
            job.is_active = active;
        }
        job.updated_at = Utc::now();
        self.validate_trigger(&job)?;

        self.jobs.update_job(&job).await?;
        self.scheduler.schedule_job(&job)?;
        tracing::info!(org_id, job_id = %job.id, active = job.is_active, "scheduled job updated");
        Ok(job)
    }

    pub async fn delete(&self, org_id: &str, id: JobId) -> Result<()> {
        if !self.jobs.delete_job(org_id, id).await? {
            return Err(Error::NotFound(format!("scheduled job {id}")));
        }
        self.scheduler.unschedule_job(id);
        tracing::info!(org_id, job_id = %id, "scheduled job deleted");
        Ok(())
    }

    pub async fn get(&self, org_id: &str, id: JobId) -> Result<ScheduledJob> {
        self.jobs
            .get_job(org_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("scheduled job {id}")))
    }

    pub async fn list(&self, org_id: &str) -> Result<Vec<ScheduledJob>> {
        self.jobs.list_jobs(org_id).await
    }

    /// Execution logs, most recent first.
    pub async fn logs(
        &self,
        org_id: &str,
        id: JobId,
        limit: Option<u64>,
    ) -> Result<Vec<JobExecutionLog>> {
        self.get(org_id, id).await?;
        let limit = limit.unwrap_or(DEFAULT_LOG_LIMIT).clamp(1, MAX_LOG_LIMIT);
        self.jobs.list_execution_logs(org_id, id, limit).await
    }

    /// Run the job now. Inactive jobs may be run manually.
    pub async fn trigger(&self, org_id: &str, id: JobId) -> Result<Dispatch> {
        let job = self.get(org_id, id).await?;
        let dispatch = self.scheduler.execute_job(job, TriggerKind::Manual);
        if let Dispatch::Started(execution_id) = dispatch {
            tracing::info!(org_id, job_id = %id, execution_id = %execution_id.0, "manual execution started");
        }
        Ok(dispatch)
    }

    /// Fetch once from an unsaved data-source configuration.
    pub async fn test_data_source(&self, org_id: &str, data_source: &Value) -> Result<TestRun> {
        let config = parse_data_source(data_source)?;
        let fetcher = self.scheduler.runner().fetcher();
        Ok(test_execute(
            fetcher.as_ref(),
            &config,
            &JobContext::for_test(org_id),
            self.settings.executor_timeout,
        )
        .await)
    }

    fn validate_trigger(&self, job: &ScheduledJob) -> Result<()> {
        Trigger::from_schedule(&job.schedule, self.settings.default_timezone).map(|_| ())
    }
}

fn required_name(name: Option<&str>) -> Result<String> {
    match name.map(str::trim) {
        Some(n) if !n.is_empty() => Ok(n.to_string()),
        _ => Err(Error::Validation("name is required".into())),
    }
}

fn parse_schedule(request: &ScheduleRequest, job_timezone: Option<&str>) -> Result<Schedule> {
    let kind = request
        .kind
        .as_deref()
        .map(|k| k.trim().to_ascii_uppercase())
        .unwrap_or_default();
    match kind.as_str() {
        "CRON" => {
            let expression = request
                .expression
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .ok_or_else(|| Error::Validation("schedule.expression is required for CRON".into()))?;
            Ok(Schedule::Cron {
                expression: expression.to_string(),
                timezone: request
                    .timezone
                    .as_deref()
                    .or(job_timezone)
                    .map(str::to_string),
            })
        }
        "INTERVAL" => {
            let interval_ms = request.interval_ms.ok_or_else(|| {
                Error::Validation("schedule.intervalMs is required for INTERVAL".into())
            })?;
            Ok(Schedule::Interval { interval_ms })
        }
        _ => Err(Error::Validation(
            "schedule.type must be one of CRON, INTERVAL".into(),
        )),
    }
}

fn parse_data_source(value: &Value) -> Result<DataSourceConfig> {
    let Value::Object(object) = value else {
        return Err(Error::Validation("dataSource must be an object".into()));
    };
    let kind = match object.get("type") {
        Some(Value::String(t)) if !t.trim().is_empty() => t.trim().to_ascii_uppercase(),
        _ => return Err(Error::Validation("dataSource.type is required".into())),
    };
    let mut settings = object.clone();
    settings.remove("type");
    let config = DataSourceConfig { kind, settings };
    DataSource::parse(&config)?;
    Ok(config)
}

fn parse_target_url(raw: &str) -> Result<String> {
    let url = reqwest::Url::parse(raw.trim())
        .map_err(|e| Error::Validation(format!("targetUrl is not a valid URL: {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(Error::Validation(format!(
            "targetUrl must use http or https (got {other})"
        ))),
    }
}
