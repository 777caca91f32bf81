//! Event handlers: intake, listing, export, import and source health.

use std::time::Duration;

use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{Value, json};

use super::AppState;
use super::error::ApiResult;
use super::extract::OrgId;
use crate::error::Error;
use crate::import::{ImportFormat, ImportOptions, ImportOutcome};
use crate::intake::{PushEvent, PushStatus};
use crate::model::*;

pub const DEFAULT_HOURS_BACK: u32 = 24;

/// POST /events/push
pub async fn push_event(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    body: Bytes,
) -> ApiResult<Response> {
    let event: PushEvent = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("request body is not a valid event: {e}")))?;
    let receipt = state.intake.push(&org_id, event).await?;
    let status = match receipt.status {
        PushStatus::Accepted => StatusCode::ACCEPTED,
        PushStatus::Duplicate => StatusCode::OK,
    };
    Ok((status, Json(receipt)).into_response())
}

/// Filter parameters shared by listing and export.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterParams {
    pub status: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub skip_category: Option<String>,
    pub search: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

impl FilterParams {
    pub fn into_filters(self) -> crate::error::Result<EventFilters> {
        Ok(EventFilters {
            status: non_empty(self.status).map(|s| s.parse()).transpose()?,
            event_type: non_empty(self.event_type),
            source: non_empty(self.source),
            skip_category: non_empty(self.skip_category)
                .map(|s| s.parse())
                .transpose()?,
            search: non_empty(self.search),
            start_date: parse_date("startDate", self.start_date)?,
            end_date: parse_date("endDate", self.end_date)?,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_date(name: &str, value: Option<String>) -> crate::error::Result<Option<DateTime<Utc>>> {
    non_empty(value)
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|at| at.with_timezone(&Utc))
                .map_err(|e| Error::Validation(format!("{name} is not RFC 3339: {e}")))
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// GET /events
pub async fn list_events(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(filters): Query<FilterParams>,
    Query(params): Query<PageParams>,
) -> ApiResult<Json<Value>> {
    let filters = filters.into_filters()?;
    let page = state
        .audit
        .list_event_audit(&org_id, &filters, Pagination::new(params.page, params.limit))
        .await?;
    Ok(Json(json!({
        "events": page.items,
        "total": page.total,
        "pages": page.pages,
        "page": page.page,
        "limit": page.limit,
    })))
}

/// GET /events/:id
pub async fn get_event(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(id): Path<String>,
) -> ApiResult<Json<EventAuditRecord>> {
    let record = state
        .audit
        .get_event_audit_by_id(&org_id, &EventId(id))
        .await?;
    Ok(Json(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportParams {
    pub timeout_ms: Option<u64>,
}

/// GET /events/export
///
/// The first chunk is awaited before the response starts, so a deadline hit
/// that early still surfaces as a 408. Later failures end the stream.
pub async fn export_events(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(filters): Query<FilterParams>,
    Query(params): Query<ExportParams>,
) -> ApiResult<Response> {
    let max = state.settings.export_timeout;
    let deadline = match params.timeout_ms {
        Some(0) => return Err(Error::Validation("timeoutMs must be positive".into()).into()),
        Some(ms) => Duration::from_millis(ms).min(max),
        None => max,
    };
    let filters = filters.into_filters()?;

    let mut stream = state.audit.export(&org_id, filters, Some(deadline));
    let first = match stream.next().await {
        Some(chunk) => chunk?,
        None => Vec::new(),
    };

    let body = futures::stream::once(async move { Ok::<_, Error>(first) }).chain(stream);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"events-export.csv\"",
            ),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportParams {
    pub dry_run: Option<bool>,
    pub continue_on_error: Option<bool>,
    /// `json` or `csv`; otherwise taken from the content type or the body.
    pub format: Option<String>,
}

/// POST /events/import
pub async fn import_events(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(params): Query<ImportParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Response> {
    let hint = params.format.clone().or_else(|| {
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    });
    let format = ImportFormat::detect(hint.as_deref(), &body);
    let options = ImportOptions {
        dry_run: params.dry_run.unwrap_or(false),
        continue_on_error: params.continue_on_error.unwrap_or(true),
    };

    let report = state
        .importer
        .import_body(&org_id, format, &body, options)
        .await?;
    let status = match report.outcome() {
        ImportOutcome::Complete => StatusCode::OK,
        ImportOutcome::Partial => StatusCode::MULTI_STATUS,
        ImportOutcome::Rejected => StatusCode::UNPROCESSABLE_ENTITY,
    };
    Ok((status, Json(report)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CheckpointParams {
    pub source: Option<String>,
}

/// GET /events/checkpoints
pub async fn list_checkpoints(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(params): Query<CheckpointParams>,
) -> ApiResult<Json<Value>> {
    let source = non_empty(params.source);
    let checkpoints = state
        .audit
        .get_source_checkpoints(&org_id, source.as_deref())
        .await?;
    Ok(Json(json!({ "checkpoints": checkpoints })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapParams {
    pub source: Option<String>,
    pub hours_back: Option<u32>,
}

/// GET /events/gaps
pub async fn list_gaps(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(params): Query<GapParams>,
) -> ApiResult<Json<Value>> {
    let source = non_empty(params.source)
        .ok_or_else(|| Error::Validation("source is required".into()))?;
    let hours_back = params.hours_back.unwrap_or(DEFAULT_HOURS_BACK);
    let gaps = state
        .audit
        .get_source_gaps(&org_id, &source, hours_back)
        .await?;
    Ok(Json(json!({
        "source": source,
        "hoursBack": hours_back,
        "gaps": gaps,
    })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthParams {
    pub hours_back: Option<u32>,
}

/// GET /events/sources/:source/health
pub async fn source_health(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Path(source): Path<String>,
    Query(params): Query<HealthParams>,
) -> ApiResult<Json<SourceHealth>> {
    let health = state
        .audit
        .get_source_health(
            &org_id,
            &source,
            params.hours_back.unwrap_or(DEFAULT_HOURS_BACK),
        )
        .await?;
    Ok(Json(health))
}
