//! Scheduled jobs and execution logs.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::*;
use crate::store::JobStore;

const JOB_COLUMNS: &str = "id, org_id, name, schedule, data_source, target_url, http_method, \
     headers, is_active, created_at, updated_at";

const LOG_COLUMNS: &str = "id, integration_id, org_id, status, trigger_kind, started_at, \
     completed_at, duration_ms, records_fetched, error";

#[async_trait]
impl JobStore for super::Db {
    async fn insert_job(&self, job: &ScheduledJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO scheduled_jobs (id, org_id, name, direction, schedule, data_source, target_url, http_method, headers, is_active, created_at, updated_at)
             VALUES ($1, $2, $3, 'SCHEDULED', $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(job.id.0)
        .bind(&job.org_id)
        .bind(&job.name)
        .bind(Json(&job.schedule))
        .bind(Json(&job.data_source))
        .bind(&job.target_url)
        .bind(job.http_method.as_str())
        .bind(Json(&job.headers))
        .bind(job.is_active)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn update_job(&self, job: &ScheduledJob) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE scheduled_jobs SET name = $1, schedule = $2, data_source = $3, target_url = $4,
                 http_method = $5, headers = $6, is_active = $7, updated_at = $8
             WHERE id = $9 AND org_id = $10",
        )
        .bind(&job.name)
        .bind(Json(&job.schedule))
        .bind(Json(&job.data_source))
        .bind(&job.target_url)
        .bind(job.http_method.as_str())
        .bind(Json(&job.headers))
        .bind(job.is_active)
        .bind(job.updated_at)
        .bind(job.id.0)
        .bind(&job.org_id)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("scheduled job {}", job.id)));
        }
        Ok(())
    }

    async fn delete_job(&self, org_id: &str, id: JobId) -> Result<bool> {
        let rows_affected = sqlx::query("DELETE FROM scheduled_jobs WHERE id = $1 AND org_id = $2")
            .bind(id.0)
            .bind(org_id)
            .execute(self.pool())
            .await?
            .rows_affected();
        Ok(rows_affected > 0)
    }

    async fn get_job(&self, org_id: &str, id: JobId) -> Result<Option<ScheduledJob>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE id = $1 AND org_id = $2"
        ))
        .bind(id.0)
        .bind(org_id)
        .fetch_optional(self.pool())
        .await?;

        row.map(JobRow::try_into_job).transpose()
    }

    async fn list_jobs(&self, org_id: &str) -> Result<Vec<ScheduledJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE org_id = $1 ORDER BY created_at"
        ))
        .bind(org_id)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    async fn list_active_jobs(&self) -> Result<Vec<ScheduledJob>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM scheduled_jobs WHERE is_active ORDER BY created_at"
        ))
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(JobRow::try_into_job).collect()
    }

    async fn insert_execution_log(&self, log: &JobExecutionLog) -> Result<()> {
        sqlx::query(
            "INSERT INTO job_execution_logs (id, integration_id, org_id, status, trigger_kind, started_at, completed_at, duration_ms, records_fetched, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(log.id.0)
        .bind(log.integration_id.0)
        .bind(&log.org_id)
        .bind(log.status.as_str())
        .bind(log.trigger.as_str())
        .bind(log.started_at)
        .bind(log.completed_at)
        .bind(log.duration_ms.map(|ms| ms as i64))
        .bind(log.records_fetched as i64)
        .bind(&log.error)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn update_execution_log(&self, log: &JobExecutionLog) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE job_execution_logs SET status = $1, completed_at = $2, duration_ms = $3, records_fetched = $4, error = $5
             WHERE id = $6",
        )
        .bind(log.status.as_str())
        .bind(log.completed_at)
        .bind(log.duration_ms.map(|ms| ms as i64))
        .bind(log.records_fetched as i64)
        .bind(&log.error)
        .bind(log.id.0)
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("execution log {}", log.id)));
        }
        Ok(())
    }

    async fn list_execution_logs(
        &self,
        org_id: &str,
        job_id: JobId,
        limit: u64,
    ) -> Result<Vec<JobExecutionLog>> {
        let rows: Vec<LogRow> = sqlx::query_as(&format!(
            "SELECT {LOG_COLUMNS} FROM job_execution_logs
             WHERE org_id = $1 AND integration_id = $2
             ORDER BY started_at DESC LIMIT $3"
        ))
        .bind(org_id)
        .bind(job_id.0)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;

        rows.into_iter().map(LogRow::try_into_log).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    org_id: String,
    name: String,
    schedule: Json<Schedule>,
    data_source: Json<DataSourceConfig>,
    target_url: String,
    http_method: String,
    headers: Json<BTreeMap<String, String>>,
    is_active: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<ScheduledJob> {
        Ok(ScheduledJob {
            id: JobId(self.id),
            org_id: self.org_id,
            name: self.name,
            direction: Direction::Scheduled,
            schedule: self.schedule.0,
            data_source: self.data_source.0,
            target_url: self.target_url,
            http_method: self.http_method.parse()?,
            headers: self.headers.0,
            is_active: self.is_active,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct LogRow {
    id: Uuid,
    integration_id: Uuid,
    org_id: String,
    status: String,
    trigger_kind: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    duration_ms: Option<i64>,
    records_fetched: i64,
    error: Option<String>,
}

impl LogRow {
    fn try_into_log(self) -> Result<JobExecutionLog> {
        Ok(JobExecutionLog {
            id: ExecutionId(self.id),
            integration_id: JobId(self.integration_id),
            org_id: self.org_id,
            status: self.status.parse()?,
            trigger: self.trigger_kind.parse()?,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_ms: self.duration_ms.map(|ms| ms as u64),
            records_fetched: self.records_fetched as u64,
            error: self.error,
        })
    }
}
