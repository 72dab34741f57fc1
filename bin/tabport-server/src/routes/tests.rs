use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use http::{Request, StatusCode, header};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use super::build;
use crate::config::Config;
use crate::routes::v1::exports::X_TASK_ID;
use crate::state::AppState;
use crate::testing::Scratch;

const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

async fn app_with_state() -> (Scratch, Router, Arc<AppState>) {
    let scratch = Scratch::new("routes");
    let mut config = Config::from_env();
    config.database_url = "sqlite::memory:".into();
    config.artifact_dir = scratch.join("artifacts").to_string_lossy().into_owned();
    config.template_dir = scratch.join("templates").to_string_lossy().into_owned();
    config.public_url = "http://test".into();
    config.enable_swagger = false;
    config.default_deadline_ms = 1000;
    config.worker_capacity = 3;

    let state = Arc::new(AppState::init(config).await.expect("state"));
    (scratch, build(Arc::clone(&state)), state)
}

async fn app() -> (Scratch, Router) {
    let (scratch, app, _) = app_with_state().await;
    (scratch, app)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, http::HeaderMap, Vec<u8>) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.expect("body").to_bytes().to_vec();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).expect("request")
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn json_of(body: &[u8]) -> Value {
    serde_json::from_slice(body).expect("json body")
}

async fn wait_for_status(app: &Router, task_id: &str, want: &str) -> Value {
    for _ in 0..100 {
        let (status, _, body) = send(app, get(&format!("/v1/tasks/{task_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let task = json_of(&body);
        if task["status"] == want {
            return task;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("task {task_id} never reached {want}");
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_is_served_with_trace_id() {
    let (_scratch, app) = app().await;
    let (status, headers, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json_of(&body)["status"], "ok");
    assert!(headers.contains_key("x-trace-id"));
}

#[tokio::test]
async fn health_reports_worker_pool_usage() {
    let (_scratch, app) = app().await;
    let (status, _, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    let workers = &json_of(&body)["workers"];
    assert_eq!(workers["capacity"], 3);
    assert_eq!(workers["active"], 0);
    assert_eq!(workers["queued"], 0);
    assert_eq!(workers["available"], 3);
}

#[tokio::test]
async fn fast_export_returns_the_file_inline() {
    let (_scratch, app) = app().await;
    let (status, headers, body) = send(&app, post_json("/v1/exports/products", json!({ "count": 5 }))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], XLSX);
    let disposition = headers[header::CONTENT_DISPOSITION].to_str().expect("ascii");
    assert!(disposition.starts_with("attachment; filename=\""));
    assert!(disposition.ends_with(".xlsx\""));
    assert_eq!(&body[..2], b"PK");

    let task_id = headers[X_TASK_ID].to_str().expect("ascii").to_owned();
    let task = wait_for_status(&app, &task_id, "COMPLETED").await;
    assert_eq!(task["jobKind"], "products");
    assert_eq!(task["recordCount"], 5);
    assert!(task["downloadUrl"].is_null());

    // Inline results are never stored.
    let (status, _, _) = send(&app, get(&format!("/v1/tasks/{task_id}/download"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_body_uses_defaults() {
    let (_scratch, app) = app().await;
    let request = Request::post("/v1/exports/employees").body(Body::empty()).expect("request");
    let (status, headers, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[header::CONTENT_TYPE], XLSX);
}

#[tokio::test]
async fn slow_export_detaches_and_becomes_downloadable() {
    let (_scratch, app) = app().await;
    let body = json!({
        "delayMs": 300,
        "deadlineMs": 20,
        "taskId": "slow-1",
        "rows": [{ "sku": "A-1", "qty": 3 }, { "sku": "B-2", "qty": 7 }],
    });
    let (status, _, body) = send(&app, post_json("/v1/exports/custom", body)).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let detached = json_of(&body);
    assert_eq!(detached["taskId"], "slow-1");
    assert_eq!(detached["status"], "PROCESSING");
    assert_eq!(detached["statusUrl"], "/v1/tasks/slow-1");

    let (status, _, _) = send(&app, get("/v1/tasks/slow-1/download")).await;
    assert!(status == StatusCode::CONFLICT || status == StatusCode::OK);

    let task = wait_for_status(&app, "slow-1", "COMPLETED").await;
    assert_eq!(task["recordCount"], 2);

    let (status, headers, bytes) = send(&app, get("/v1/tasks/slow-1/download")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[X_TASK_ID], "slow-1");
    assert_eq!(&bytes[..2], b"PK");

    let url = task["downloadUrl"].as_str().expect("download url");
    let path = url.strip_prefix("http://test").expect("public url prefix");
    let (status, _, presigned) = send(&app, get(path)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(presigned, bytes);

    let tampered = format!("{}x", path);
    let (status, _, _) = send(&app, get(&tampered)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn expired_link_is_gone() {
    let (_scratch, app, state) = app_with_state().await;
    let key = "exports/20240101_000000_abcd1234_report.xlsx";
    let signature = state.orchestrator.sink().signer().signature(key, 1);

    let (status, _, _) = send(&app, get(&format!("/v1/artifacts/{key}?expires=1&signature={signature}"))).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _, _) = send(&app, get(&format!("/v1/artifacts/{key}?expires=1&signature=bogus"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rejects_bad_requests() {
    let (_scratch, app) = app().await;

    let (status, _, body) = send(&app, post_json("/v1/exports/invoices", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json_of(&body)["error"].as_str().expect("error").contains("invoices"));

    let malformed = Request::post("/v1/exports/products")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .expect("request");
    let (status, _, _) = send(&app, malformed).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, post_json("/v1/exports/products", json!({ "deadlineMs": 0 }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, post_json("/v1/exports/custom", json!({ "rows": [1, 2] }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get("/v1/tasks?status=DONE")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _, _) = send(&app, get("/v1/tasks/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn duplicate_task_id_conflicts() {
    let (_scratch, app) = app().await;
    let body = json!({ "taskId": "dup", "count": 1 });
    let (status, _, _) = send(&app, post_json("/v1/exports/products", body.clone())).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _, _) = send(&app, post_json("/v1/exports/products", body)).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn lists_job_kinds_and_tasks() {
    let (_scratch, app) = app().await;
    let (status, _, body) = send(&app, get("/v1/job-kinds")).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<String> = json_of(&body)
        .as_array()
        .expect("array")
        .iter()
        .map(|k| k["kind"].as_str().expect("kind").to_owned())
        .collect();
    assert_eq!(kinds.len(), 3);
    assert!(kinds.contains(&"employees".to_owned()));

    send(&app, post_json("/v1/exports/products", json!({ "count": 1, "taskId": "p-1" }))).await;
    wait_for_status(&app, "p-1", "COMPLETED").await;

    let (status, _, body) = send(&app, get("/v1/tasks?status=completed&kind=products")).await;
    assert_eq!(status, StatusCode::OK);
    let tasks = json_of(&body);
    assert_eq!(tasks.as_array().expect("array").len(), 1);
    assert_eq!(tasks[0]["id"], "p-1");

    let (_, _, body) = send(&app, get("/v1/tasks?kind=employees")).await;
    assert!(json_of(&body).as_array().expect("array").is_empty());
}
