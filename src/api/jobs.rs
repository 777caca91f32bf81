//! Scheduled-job handlers.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::{ApiError, ApiResult};
use super::extract::OrgId;
use crate::executor::TestRun;
use crate::jobs::ScheduledJobRequest;
use crate::model::{JobExecutionLog, JobId, ScheduledJob};
use crate::scheduler::Dispatch;

fn job_id(raw: &str) -> ApiResult<JobId> {
    Ok(raw.parse::<JobId>()?)
}

/// GET /scheduled-jobs
pub async fn list_jobs(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
) -> ApiResult<Json<Value>> {
    let jobs = state.jobs.list(&org_id).await?;
    Ok(Json(json!({ "jobs": jobs })))
}

/// POST /scheduled-jobs
pub async fn create_job(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Json(request): Json<ScheduledJobRequest>,
) -> ApiResult<(StatusCode, Json<ScheduledJob>)> {
    let job = state.jobs.create(&org_id, request).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// GET /scheduled-jobs/:id
pub async fn get_job(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
) -> ApiResult<Json<ScheduledJob>> {
    Ok(Json(state.jobs.get(&org_id, job_id(&id)?).await?))
}

/// PUT /scheduled-jobs/:id
pub async fn update_job(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
    Json(request): Json<ScheduledJobRequest>,
) -> ApiResult<Json<ScheduledJob>> {
    Ok(Json(
        state.jobs.update(&org_id, job_id(&id)?, request).await?,
    ))
}

/// DELETE /scheduled-jobs/:id
pub async fn delete_job(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.jobs.delete(&org_id, job_id(&id)?).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /scheduled-jobs/:id/execute
///
/// Returns once the execution is handed off; the outcome shows up in the logs.
pub async fn execute_job(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let id = job_id(&id)?;
    match state.jobs.trigger(&org_id, id).await? {
        Dispatch::Started(execution_id) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "status": "triggered",
                "jobId": id,
                "executionId": execution_id.0,
            })),
        )),
        Dispatch::Skipped => Err(ApiError::Conflict(
            "execution already in progress".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct LogParams {
    pub limit: Option<u64>,
}

/// GET /scheduled-jobs/:id/logs
pub async fn job_logs(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
    Query(params): Query<LogParams>,
) -> ApiResult<Json<Vec<JobExecutionLog>>> {
    let logs = state.jobs.logs(&org_id, job_id(&id)?, params.limit).await?;
    Ok(Json(logs))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestSourceRequest {
    pub data_source: Value,
}

/// POST /scheduled-jobs/test-source
pub async fn test_source(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Json(request): Json<TestSourceRequest>,
) -> ApiResult<Json<TestRun>> {
    Ok(Json(
        state
            .jobs
            .test_data_source(&org_id, &request.data_source)
            .await?,
    ))
}
