use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use drillroom_bus::EventBus;
use drillroom_core::{DelaySpec, DrillroomConfig, Generators, Orchestrator};
use drillroom_server::create_router;
use drillroom_server::state::AppState;
use serde_json::Value;
use tower::ServiceExt;

fn setup_app(body_limit: usize) -> (Router, AppState, tempfile::TempDir) {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = DrillroomConfig::offline(tmp.path());
    config.main.server.body_limit_bytes = body_limit;
    config.main.pipeline.beat_delay = DelaySpec::none();
    config.main.pipeline.direct_delay = DelaySpec::none();
    let bus = Arc::new(EventBus::new(64));
    let orchestrator = Arc::new(Orchestrator::new(&config, Generators::offline(), bus.publisher()).unwrap());
    let state = AppState::new(orchestrator, bus, &config);
    (create_router(state.clone()), state, tmp)
}

async fn read_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn healthz_and_fallback() {
    let (app, _state, _tmp) = setup_app(1024 * 1024);

    let response = app.clone().oneshot(get("/healthz")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "ok");

    let response = app.oneshot(get("/api/nothing-here")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(read_json(response).await["error"], "not_found");
}

#[tokio::test]
async fn personas_lists_company_agents_and_audience() {
    let (app, _state, _tmp) = setup_app(1024 * 1024);

    let response = app.oneshot(get("/api/agent/personas")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["company"]["company"], "DayOne.ai");
    assert_eq!(body["agents"]["qa"]["role"], "Senior QA Engineer (Incident Validation)");
    assert!(body["audience"].is_object());
}

#[tokio::test(start_paused = true)]
async fn sim_alias_reads_and_clears_transcript() {
    let (app, state, _tmp) = setup_app(1024 * 1024);
    state
        .orchestrator
        .start_session(Some("sess_sim".into()), Some(600))
        .await;

    let response = app
        .clone()
        .oneshot(get("/sim/session/messages?session_id=sess_sim"))
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["count"], 1);
    assert_eq!(body["messages"][0]["kind"], "session_start");

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/session/messages?session_id=sess_sim")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = read_json(response).await;
    assert_eq!(body["mode"], "session");
    assert_eq!(body["removed"], 1);

    let response = app.oneshot(get("/api/session/messages")).await.unwrap();
    assert_eq!(read_json(response).await["count"], 0);
    state.orchestrator.shutdown();
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let (app, _state, _tmp) = setup_app(64);
    let big = format!(r#"{{"session_id":"{}"}}"#, "x".repeat(256));

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/session/start")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(big))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(read_json(response).await["error"], "payload_too_large");
}

#[tokio::test]
async fn stream_is_server_sent_events() {
    let (app, _state, _tmp) = setup_app(1024 * 1024);

    let response = app
        .oneshot(get("/api/session/stream?session_id=sess_any"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
    assert!(content_type.starts_with("text/event-stream"));
}
