/// HTTP surface tests against the axum router with a scripted portal factory.
mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use docket_scout::config::ScoutConfig;
use docket_scout::{api, AppState, JobStatus, Phase};

fn state_with(config: ScoutConfig) -> Arc<AppState> {
    state_with_script(config, Script::default())
}

fn state_with_script(config: ScoutConfig, script: Script) -> Arc<AppState> {
    init_logger();
    let factory = Arc::new(ScriptedFactory::new(script));
    Arc::new(AppState::new(config, factory))
}

fn automated() -> ScoutConfig {
    ScoutConfig {
        scraping_mode: Some("FULLY_AUTOMATED".to_string()),
        ..Default::default()
    }
}

async fn call(state: &Arc<AppState>, req: Request<Body>) -> (StatusCode, Value) {
    let response = api::router(state.clone()).oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn start_body(client: &str) -> Value {
    json!({
        "client_id": client,
        "keywords": "transcript",
        "court_name": "Utah",
        "judge_name": "",
    })
}

#[tokio::test]
async fn health_reports_service() {
    let state = state_with(automated());
    let (status, body) = call(&state, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "docket-scout");
}

#[tokio::test]
async fn started_job_runs_and_exposes_results() {
    let state = state_with(automated());
    let (status, body) = call(&state, post_json("/api/scrape/start", start_body("c-1"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let finished = tokio::time::timeout(Duration::from_secs(5), state.jobs.wait(&job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.phase, Phase::Completed);

    let (status, body) = call(&state, get(&format!("/api/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["phase"], "completed");
    assert_eq!(body["results_count"], 9);

    let (status, body) = call(&state, get(&format!("/api/jobs/{job_id}/results"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"].as_array().unwrap().len(), 9);
    assert_eq!(body["summary"]["documents_processed"], 3);

    let (status, body) = call(&state, get("/api/jobs?status=completed")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn invalid_range_is_rejected() {
    let state = state_with(automated());
    let mut body = start_body("c-2");
    body["selection_mode"] = json!("range");
    body["range_start"] = json!(4);
    body["range_end"] = json!(2);
    let (status, _) = call(&state, post_json("/api/scrape/start", body)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(state.jobs.list(None, None).is_empty());
}

#[tokio::test]
async fn second_active_job_for_client_conflicts_and_cancel_works() {
    // Interactive jobs park at the court prompt, so the first stays active.
    let state = state_with(ScoutConfig::default());
    let (status, body) = call(&state, post_json("/api/scrape/start", start_body("c-3"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let (status, _) = call(&state, post_json("/api/scrape/start", start_body("c-3"))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &state,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/jobs/{job_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = call(
        &state,
        post_json(&format!("/api/jobs/{job_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancel_requested"], true);

    let finished = tokio::time::timeout(Duration::from_secs(5), state.jobs.wait(&job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.status(), JobStatus::Cancelled);

    let (status, _) = call(
        &state,
        post_json(&format!("/api/jobs/{job_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &state,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/jobs/{job_id}"))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&state, get(&format!("/api/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_request_is_visible_while_a_portal_call_is_in_flight() {
    let script = Script {
        launch_delay: Some(Duration::from_millis(500)),
        ..Script::default()
    };
    let state = state_with_script(automated(), script);
    let (_, body) = call(&state, post_json("/api/scrape/start", start_body("c-6"))).await;
    let job_id = body["job_id"].as_str().unwrap().to_string();
    while state.jobs.get(&job_id).unwrap().phase != Phase::Initializing {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (status, body) = call(
        &state,
        post_json(&format!("/api/jobs/{job_id}/cancel"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cancel_requested"], true);

    // The job is still inside launch, yet queries already agree.
    let (_, body) = call(&state, get(&format!("/api/jobs/{job_id}"))).await;
    assert_eq!(body["cancel_requested"], true);
    assert_ne!(body["status"], "cancelled");

    let finished = tokio::time::timeout(Duration::from_secs(5), state.jobs.wait(&job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(finished.phase, Phase::Cancelled);
    assert!(finished.cancel_requested);
}

#[tokio::test]
async fn active_job_limit_is_enforced() {
    let state = state_with(ScoutConfig {
        max_active_jobs: Some(1),
        ..Default::default()
    });
    let (status, _) = call(&state, post_json("/api/scrape/start", start_body("c-4"))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _) = call(&state, post_json("/api/scrape/start", start_body("c-5"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

    state.jobs.shutdown().await;
    let jobs = state.jobs.list(None, None);
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].phase, Phase::Cancelled);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let state = state_with(automated());
    let (status, body) = call(&state, get("/api/jobs/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
    let (status, _) = call(&state, post_json("/api/jobs/nope/cancel", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
