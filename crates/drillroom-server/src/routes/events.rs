use std::convert::Infallible;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use drillroom_bus::Topic;
use drillroom_schema::BusMessage;
use futures_core::Stream;

use crate::routes::session::SessionQuery;
use crate::state::AppState;

fn event_name(msg: &BusMessage) -> &'static str {
    match msg {
        BusMessage::SessionStarted { .. } => "session_started",
        BusMessage::SessionEnded { .. } => "session_ended",
        BusMessage::TranscriptAppended { .. } => "transcript_appended",
        BusMessage::BeatFired { .. } => "beat_fired",
        BusMessage::BeatSkipped { .. } => "beat_skipped",
    }
}

/// Live transcript and lifecycle events, optionally narrowed to one session.
pub async fn session_stream(
    State(state): State<AppState>,
    Query(query): Query<SessionQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let filter = query
        .session_id
        .map(|id| id.trim().to_string())
        .filter(|id| !id.is_empty());
    let mut rx_transcript = state.bus.subscribe(Topic::TranscriptAppended).await;
    let mut rx_lifecycle = state.bus.subscribe(Topic::SessionLifecycle).await;
    tracing::debug!(session_id = ?filter, "sse subscriber attached");

    let stream = async_stream::stream! {
        loop {
            let msg = tokio::select! {
                Some(msg) = rx_transcript.recv() => msg,
                Some(msg) = rx_lifecycle.recv() => msg,
                else => break,
            };
            if filter.as_deref().is_some_and(|id| msg.session_id() != id) {
                continue;
            }
            if let Ok(json) = serde_json::to_string(&msg) {
                yield Ok(Event::default().event(event_name(&msg)).data(json));
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
