use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/personas", get(get_personas))
}

async fn get_personas(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.orchestrator.catalog();
    Json(json!({
        "ok": true,
        "company": catalog.company,
        "agents": catalog.agents,
        "audience": catalog.audience,
    }))
}
