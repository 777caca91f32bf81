//! HTTP surface tests, driven through the router with `oneshot`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use eventgate::api::{self, AppState};
use eventgate::config::GatewaySettings;
use eventgate::delivery::{DeliveryRequest, DeliveryResponse, DeliveryTransport};
use eventgate::error::Result;
use eventgate::executor::{DataSourceFetch, FetchResult, JobContext};
use eventgate::model::DataSourceConfig;
use eventgate::source::SourceRegistry;
use eventgate::store::Stores;
use serde_json::{Value, json};
use tokio::sync::Semaphore;
use tower::ServiceExt;

/// Waits for a permit on every call.
struct GatedFetcher(Semaphore);

#[async_trait]
impl DataSourceFetch for GatedFetcher {
    async fn execute(&self, _: &DataSourceConfig, _: &JobContext) -> Result<FetchResult> {
        if let Ok(permit) = self.0.acquire().await {
            permit.forget();
        }
        Ok(FetchResult {
            records: vec![json!({"orderId": "A-1"})],
        })
    }
}

struct AcceptingTransport;

#[async_trait]
impl DeliveryTransport for AcceptingTransport {
    async fn deliver(&self, _: DeliveryRequest) -> Result<DeliveryResponse> {
        Ok(DeliveryResponse {
            status: Some(200),
            success: true,
            detail: "HTTP 200".into(),
        })
    }
}

fn test_app() -> (Router, AppState, Arc<GatedFetcher>) {
    let fetcher = Arc::new(GatedFetcher(Semaphore::new(0)));
    let state = AppState::with_components(
        Stores::in_memory(),
        SourceRegistry::empty(),
        GatewaySettings::default(),
        fetcher.clone(),
        Arc::new(AcceptingTransport),
    );
    (api::router(state.clone()), state, fetcher)
}

fn request(method: &str, uri: &str, body: Body) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("x-org-id", "acme")
        .header(header::CONTENT_TYPE, "application/json")
        .body(body)
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    request(method, uri, Body::from(body.to_string()))
}

fn get(uri: &str) -> Request<Body> {
    request("GET", uri, Body::empty())
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    (status, body)
}

fn order_event(order_id: &str) -> Value {
    json!({"eventType": "order.created", "payload": {"orderId": order_id, "total": 10}})
}

fn job_body(name: &str) -> Value {
    json!({
        "name": name,
        "schedule": {"type": "INTERVAL", "intervalMs": 60000},
        "dataSource": {"type": "HTTP", "url": "https://erp.example.com/orders"},
        "targetUrl": "https://hooks.example.com/orders",
        "isActive": false
    })
}

#[tokio::test]
async fn healthz_reports_scheduler() {
    let (app, _, _) = test_app();
    let (status, body) = send(&app, get("/healthz")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["scheduler"]["scheduledJobs"], 0);
}

#[tokio::test]
async fn push_accepts_then_reports_duplicate() {
    let (app, _, _) = test_app();

    let (status, first) = send(&app, json_request("POST", "/events/push", order_event("o-1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(first["status"], "accepted");

    let (status, second) = send(&app, json_request("POST", "/events/push", order_event("o-1"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["status"], "duplicate");
    assert_eq!(second["eventId"], first["eventId"]);

    let id = first["eventId"].as_str().unwrap();
    let (status, record) = send(&app, get(&format!("/events/{id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["status"], "VALIDATED");
}

#[tokio::test]
async fn push_without_event_type_is_a_problem() {
    let (app, _, _) = test_app();
    let response = app
        .clone()
        .oneshot(json_request("POST", "/events/push", json!({"payload": {}})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/problem+json"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let problem: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(problem["code"], "VALIDATION_ERROR");
    assert_eq!(problem["status"], 400);
}

#[tokio::test]
async fn malformed_body_is_a_validation_error() {
    let (app, _, _) = test_app();
    let (status, body) = send(&app, request("POST", "/events/push", Body::from("{not json"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn org_header_is_required() {
    let (app, _, _) = test_app();
    let req = Request::builder()
        .uri("/events")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["title"], "Missing Organization");
}

#[tokio::test]
async fn listing_paginates_and_validates_filters() {
    let (app, _, _) = test_app();
    for i in 0..3 {
        send(&app, json_request("POST", "/events/push", order_event(&format!("o-{i}")))).await;
    }

    let (status, body) = send(&app, get("/events?limit=2&page=1&status=VALIDATED")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    assert_eq!(body["pages"], 2);
    assert_eq!(body["events"].as_array().unwrap().len(), 2);

    let (status, _) = send(&app, get("/events?status=LOST")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = send(&app, get("/events?startDate=yesterday")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unknown_event_is_not_found() {
    let (app, _, _) = test_app();
    let (status, body) = send(&app, get("/events/evt_missing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["type"], "https://eventgate.dev/errors/not-found");
}

#[tokio::test]
async fn import_status_reflects_outcome() {
    let (app, _, _) = test_app();

    let complete = json!([order_event("i-1"), order_event("i-2")]);
    let (status, body) = send(&app, json_request("POST", "/events/import", complete)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["successful"], 2);

    let partial = json!([order_event("i-3"), {"payload": {}}]);
    let (status, body) = send(&app, json_request("POST", "/events/import", partial)).await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(body["results"]["failed"][0]["index"], 1);

    let rejected = json!([{"payload": {}}]);
    let (status, _) = send(&app, json_request("POST", "/events/import", rejected)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let too_many: Vec<Value> = (0..1001).map(|i| order_event(&format!("big-{i}"))).collect();
    let (status, body) = send(&app, json_request("POST", "/events/import", json!(too_many))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn import_dry_run_and_csv() {
    let (app, _, _) = test_app();
    let (status, body) = send(
        &app,
        json_request("POST", "/events/import?dryRun=true", json!([order_event("d-1")])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["dryRun"], true);
    let (_, listing) = send(&app, get("/events")).await;
    assert_eq!(listing["total"], 0);

    let csv = "eventType,payload\norder.created,\"{\"\"orderId\"\":\"\"c-1\"\"}\"\n";
    let req = Request::builder()
        .method("POST")
        .uri("/events/import")
        .header("x-org-id", "acme")
        .header(header::CONTENT_TYPE, "text/csv")
        .body(Body::from(csv))
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["summary"]["successful"], 1);
}

#[tokio::test]
async fn export_streams_csv() {
    let (app, _, _) = test_app();
    send(&app, json_request("POST", "/events/push", order_event("x-1"))).await;

    let response = app.clone().oneshot(get("/events/export")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers()[header::CONTENT_TYPE]
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.starts_with("eventId,orgId,source"));
    assert_eq!(text.lines().count(), 2);

    let (status, _) = send(&app, get("/events/export?timeoutMs=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn gaps_require_a_source() {
    let (app, _, _) = test_app();
    let (status, _) = send(&app, get("/events/gaps")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(&app, get("/events/gaps?source=push&hoursBack=6")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hoursBack"], 6);
    assert!(body["gaps"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn checkpoints_follow_push_intake() {
    let (app, _, _) = test_app();
    send(&app, json_request("POST", "/events/push", order_event("cp-1"))).await;

    let (status, body) = send(&app, get("/events/checkpoints")).await;
    assert_eq!(status, StatusCode::OK);
    let checkpoints = body["checkpoints"].as_array().unwrap();
    assert_eq!(checkpoints.len(), 1);
    assert_eq!(checkpoints[0]["source"], "push");

    let (status, _) = send(&app, get("/events/sources/push/health")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn job_lifecycle_over_http() {
    let (app, state, fetcher) = test_app();

    let (status, job) = send(&app, json_request("POST", "/scheduled-jobs", job_body("orders"))).await;
    assert_eq!(status, StatusCode::CREATED);
    let id = job["id"].as_str().unwrap().to_string();
    assert_eq!(job["httpMethod"], "POST");

    let (status, body) = send(&app, get("/scheduled-jobs")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["jobs"].as_array().unwrap().len(), 1);

    let execute = format!("/scheduled-jobs/{id}/execute");
    let (status, body) = send(&app, request("POST", &execute, Body::empty())).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "triggered");

    let (status, body) = send(&app, request("POST", &execute, Body::empty())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["title"], "Conflict");

    fetcher.0.add_permits(1);
    state.scheduler().wait_idle().await;

    let (status, logs) = send(&app, get(&format!("/scheduled-jobs/{id}/logs?limit=5"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(logs[0]["status"], "SUCCESS");
    assert_eq!(logs[0]["trigger"], "MANUAL");

    let (status, updated) = send(
        &app,
        json_request("PUT", &format!("/scheduled-jobs/{id}"), json!({"name": "orders-v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["name"], "orders-v2");

    let (status, _) = send(&app, request("DELETE", &format!("/scheduled-jobs/{id}"), Body::empty())).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, get(&format!("/scheduled-jobs/{id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn job_validation_and_bad_ids() {
    let (app, _, _) = test_app();
    let mut body = job_body("fast");
    body["schedule"]["intervalMs"] = json!(1000);
    let (status, problem) = send(&app, json_request("POST", "/scheduled-jobs", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(problem["detail"].as_str().unwrap().contains("intervalMs"));

    let (status, _) = send(&app, get("/scheduled-jobs/not-a-uuid")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn notifications_list_by_status() {
    let (app, _, _) = test_app();
    send(&app, json_request("POST", "/events/push", order_event("n-1"))).await;

    let (status, body) = send(&app, get("/notifications?status=PENDING")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["notifications"].as_array().unwrap().len(), 1);

    let (status, _) = send(&app, get("/notifications?status=LOST")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
