use std::sync::Arc;

use drillroom_bus::EventBus;
use drillroom_core::{DrillroomConfig, Orchestrator};

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    /// Event bus the SSE stream subscribes to.
    pub bus: Arc<EventBus>,
    /// Maximum accepted request body, in bytes.
    pub body_limit: usize,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, bus: Arc<EventBus>, config: &DrillroomConfig) -> Self {
        Self {
            orchestrator,
            bus,
            body_limit: config.main.server.body_limit_bytes,
        }
    }
}
