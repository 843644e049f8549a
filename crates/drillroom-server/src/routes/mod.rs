pub mod agent;
pub mod events;
pub mod session;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/agent", agent::router())
        .nest("/session", session::router())
}

/// Paths the workflow engine and older clients call back on.
pub fn sim_router() -> Router<AppState> {
    Router::new()
        .route("/agent-message", post(session::agent_message))
        .route(
            "/messages",
            get(session::list_messages).delete(session::clear_messages),
        )
}
