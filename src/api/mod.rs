//! HTTP surface.
//!
//! Routes:
//! - POST   /events/push                      push intake (202)
//! - GET    /events                           filtered, paginated listing
//! - GET    /events/export                    streamed CSV under a deadline
//! - POST   /events/import                    bulk import (200/207/422)
//! - GET    /events/checkpoints               source checkpoints
//! - GET    /events/gaps                      gaps for one source
//! - GET    /events/sources/:source/health    checkpoint plus gaps
//! - GET    /events/:id
//! - GET    /scheduled-jobs, POST /scheduled-jobs
//! - POST   /scheduled-jobs/test-source
//! - GET    /scheduled-jobs/:id, PUT, DELETE
//! - POST   /scheduled-jobs/:id/execute       manual trigger (202, 409 when running)
//! - GET    /scheduled-jobs/:id/logs
//! - GET    /notifications
//! - GET    /healthz

pub mod error;
pub mod events;
pub mod extract;
pub mod jobs;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::audit::{EventAuditStore, GapPolicy};
use crate::config::GatewaySettings;
use crate::delivery::{DeliveryTransport, HttpTransport};
use crate::executor::{DataSourceExecutor, DataSourceFetch};
use crate::import::BulkImporter;
use crate::intake::EventIntake;
use crate::jobs::JobService;
use crate::model::NotificationStatus;
use crate::queue::NotificationQueue;
use crate::scheduler::{JobRunner, Scheduler};
use crate::source::SourceRegistry;
use crate::store::Stores;

use error::ApiResult;
use extract::OrgId;

pub const DEFAULT_NOTIFICATION_LIMIT: u64 = 100;

/// Services shared by every handler. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub audit: EventAuditStore,
    pub intake: EventIntake,
    pub importer: BulkImporter,
    pub jobs: JobService,
    pub queue: NotificationQueue,
    pub settings: GatewaySettings,
}

impl AppState {
    /// Wire the gateway with the built-in HTTP fetcher and transport.
    pub fn new(stores: Stores, sources: SourceRegistry, settings: GatewaySettings) -> Self {
        Self::with_components(
            stores,
            sources,
            settings,
            Arc::new(DataSourceExecutor::new()),
            Arc::new(HttpTransport::new(settings.delivery_timeout)),
        )
    }

    pub fn with_components(
        stores: Stores,
        sources: SourceRegistry,
        settings: GatewaySettings,
        fetcher: Arc<dyn DataSourceFetch>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> Self {
        let audit = EventAuditStore::new(stores.events.clone())
            .with_sources(Arc::new(sources))
            .with_gap_policy(GapPolicy::with_default_threshold(
                settings.gap_default_threshold_ms,
            ));
        let queue = NotificationQueue::new(stores.notifications.clone());
        let runner = JobRunner::new(
            stores.jobs.clone(),
            audit.clone(),
            queue.clone(),
            fetcher,
            transport,
            settings.executor_timeout,
        );
        let scheduler = Scheduler::new(runner, settings.default_timezone);

        Self {
            intake: EventIntake::new(audit.clone(), queue.clone()),
            importer: BulkImporter::new(audit.clone()),
            jobs: JobService::new(stores.jobs, scheduler, settings),
            audit,
            queue,
            settings,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        self.jobs.scheduler()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/events", get(events::list_events))
        .route("/events/push", post(events::push_event))
        .route("/events/export", get(events::export_events))
        .route("/events/import", post(events::import_events))
        .route("/events/checkpoints", get(events::list_checkpoints))
        .route("/events/gaps", get(events::list_gaps))
        .route("/events/sources/:source/health", get(events::source_health))
        .route("/events/:id", get(events::get_event))
        .route("/scheduled-jobs", get(jobs::list_jobs).post(jobs::create_job))
        .route("/scheduled-jobs/test-source", post(jobs::test_source))
        .route(
            "/scheduled-jobs/:id",
            get(jobs::get_job).put(jobs::update_job).delete(jobs::delete_job),
        )
        .route("/scheduled-jobs/:id/execute", post(jobs::execute_job))
        .route("/scheduled-jobs/:id/logs", get(jobs::job_logs))
        .route("/notifications", get(list_notifications))
        .with_state(state)
}

async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let scheduler = state.scheduler();
    Json(json!({
        "status": "ok",
        "scheduler": {
            "started": scheduler.is_started(),
            "scheduledJobs": scheduler.scheduled_count(),
        },
    }))
}

#[derive(Debug, Deserialize)]
pub struct NotificationParams {
    pub status: Option<String>,
    pub limit: Option<u64>,
}

async fn list_notifications(
    State(state): State<AppState>,
    OrgId(org_id): OrgId,
    Query(params): Query<NotificationParams>,
) -> ApiResult<Json<Value>> {
    let status = params
        .status
        .as_deref()
        .map(str::parse::<NotificationStatus>)
        .transpose()?;
    let limit = params.limit.unwrap_or(DEFAULT_NOTIFICATION_LIMIT).clamp(1, 1000);
    let items = state.queue.list(&org_id, status, limit).await?;
    Ok(Json(json!({ "notifications": items })))
}
