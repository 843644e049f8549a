use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, Query, State},
    routing::{get, post},
    Json, Router,
};
use drillroom_core::{parse_event, SessionError};
use drillroom_schema::Role;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{parse_body, require_session_id, ApiError};
use crate::routes::events;
use crate::state::AppState;

/// Successful response envelope: `{ok: true, ...body}`.
#[derive(Serialize)]
pub struct Ack<T> {
    pub ok: bool,
    #[serde(flatten)]
    pub body: T,
}

impl<T> Ack<T> {
    fn new(body: T) -> Json<Self> {
        Json(Self { ok: true, body })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartRequest {
    pub session_id: Option<String>,
    pub duration_sec: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventRequest {
    pub session_id: Option<String>,
    #[serde(alias = "type")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: Value,
    pub text: Option<String>,
    pub addressed_to: Option<String>,
    pub thread_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CodeRequest {
    pub session_id: Option<String>,
    pub code: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentMessageRequest {
    pub session_id: Option<String>,
    #[serde(alias = "role")]
    pub agent: Option<String>,
    pub text: Option<String>,
    pub thread_root: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    pub session_id: Option<String>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/start", post(start_session))
        .route("/event", post(ingest_event))
        .route("/code", post(submit_code))
        .route("/stop", post(stop_session))
        .route("/status", get(session_status))
        .route("/evaluate", post(evaluate_session))
        .route("/evaluation", get(get_evaluation))
        .route("/messages", get(list_messages).delete(clear_messages))
        .route("/agent-message", post(agent_message))
        .route("/stream", get(events::session_stream))
}

async fn start_session(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Ack<drillroom_core::SessionStarted>>, ApiError> {
    let req: StartRequest = parse_body(body)?;
    let started = state
        .orchestrator
        .start_session(req.session_id, req.duration_sec)
        .await;
    Ok(Ack::new(started))
}

async fn ingest_event(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Ack<drillroom_core::IngestOutcome>>, ApiError> {
    let req: EventRequest = parse_body(body)?;
    let session_id = require_session_id(req.session_id.as_deref())?;
    let event = parse_event(
        req.event_type.as_deref().unwrap_or_default(),
        &req.data,
        req.text.as_deref(),
        req.addressed_to.as_deref(),
        req.thread_root.as_deref(),
    )?;
    let outcome = state.orchestrator.ingest_event(session_id, event).await?;
    Ok(Ack::new(outcome))
}

async fn submit_code(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let req: CodeRequest = parse_body(body)?;
    let session_id = require_session_id(req.session_id.as_deref())?;
    let message = state
        .orchestrator
        .submit_code(session_id, req.code.as_deref().unwrap_or_default())
        .await?;
    Ok(Json(json!({ "ok": true, "message": message })))
}

async fn stop_session(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let req: SessionRequest = parse_body(body)?;
    let session_id = require_session_id(req.session_id.as_deref())?;
    let report = state.orchestrator.stop_session(session_id).await?;
    Ok(Json(json!({
        "ok": true,
        "session_id": session_id,
        "ended": true,
        "evaluation": report,
    })))
}

async fn session_status(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Ack<drillroom_core::SessionStatus>>, ApiError> {
    let session_id = require_session_id(query.session_id.as_deref())?;
    Ok(Ack::new(state.orchestrator.status(session_id)?))
}

async fn evaluate_session(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let req: SessionRequest = parse_body(body)?;
    let session_id = require_session_id(req.session_id.as_deref())?;
    let report = state.orchestrator.evaluate(session_id)?;
    Ok(Json(json!({ "ok": true, "evaluation": report })))
}

async fn get_evaluation(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<Value>, ApiError> {
    let session_id = require_session_id(query.session_id.as_deref())?;
    let report = state
        .orchestrator
        .evaluation(session_id)?
        .ok_or_else(|| ApiError::new(axum::http::StatusCode::NOT_FOUND, "evaluation_not_found"))?;
    Ok(Json(json!({ "ok": true, "evaluation": report })))
}

pub(crate) async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<Value> {
    let session_id = query.session_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    let messages = state.orchestrator.messages(session_id);
    Json(json!({ "ok": true, "count": messages.len(), "messages": messages }))
}

pub(crate) async fn clear_messages(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Json<Value> {
    let session_id = query.session_id.as_deref().map(str::trim).filter(|id| !id.is_empty());
    let removed = state.orchestrator.clear(session_id);
    let mode = if session_id.is_some() { "session" } else { "all" };
    Json(json!({ "ok": true, "cleared": true, "mode": mode, "removed": removed }))
}

/// Callback for replies produced by the external workflow engine.
pub(crate) async fn agent_message(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Json<Value>, ApiError> {
    let req: AgentMessageRequest = parse_body(body)?;
    let session_id = require_session_id(req.session_id.as_deref())?;
    let agent = req.agent.as_deref().unwrap_or_default();
    let role = Role::parse(agent).ok_or_else(|| SessionError::Rejected(format!("unknown agent: {agent}")))?;
    let thread_root = req.thread_root.filter(|t| !t.trim().is_empty());
    let stored = state
        .orchestrator
        .record_agent_message(session_id, role, req.text.as_deref().unwrap_or_default(), thread_root)
        .await?;
    tracing::info!(session_id, role = %role, stored = stored.is_some(), "agent message received");
    Ok(Json(json!({
        "ok": true,
        "stored": stored.is_some(),
        "message": stored,
    })))
}
