use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use drillroom_bus::BusPublisher;
use drillroom_schema::{BusMessage, FireReason, Role};
use tokio::task::JoinHandle;
use tokio::time::Duration;

use crate::{decide, Beat, SchedulerConfig, SessionRuntime, TickDecision, TickPhase};

/// Everything a delivery path needs to voice one fired beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeatCue {
    pub session_id: String,
    pub index: usize,
    pub role: Role,
    pub intent: String,
    pub anchor: bool,
    pub reason: FireReason,
    pub transition: bool,
    pub window_start_sec: u64,
    pub window_end_sec: u64,
    pub planned_sec: u64,
}

impl BeatCue {
    pub fn new(
        session_id: impl Into<String>,
        index: usize,
        beat: &Beat,
        reason: FireReason,
        transition: bool,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            index,
            role: beat.role,
            intent: beat.intent.clone(),
            anchor: beat.anchor,
            reason,
            transition,
            window_start_sec: beat.window_start_sec,
            window_end_sec: beat.window_end_sec,
            planned_sec: beat.scheduled_start_sec,
        }
    }

    /// Compact machine-readable description of the cue, handed to prompt
    /// builders and heuristics in place of participant text.
    pub fn seed(&self) -> String {
        format!(
            "intent:{} role:{} anchor:{} transition:{} reason:{} window:{}-{} planned:{}",
            self.intent,
            self.role,
            u8::from(self.anchor),
            u8::from(self.transition),
            self.reason.as_str(),
            self.window_start_sec,
            self.window_end_sec,
            self.planned_sec
        )
    }
}

/// Where fired beats go. Implemented by the reply pipeline.
#[async_trait]
pub trait BeatSink: Send + Sync {
    /// Author of the newest non-participant transcript entry of the session.
    fn last_speaker(&self, session_id: &str) -> Option<Role>;

    async fn deliver(&self, cue: BeatCue) -> Result<()>;
}

/// Drives one task per session: sleep, evaluate the current beat, fire or
/// re-arm. The only suspension points are the sleep and the delivery, and
/// both race the session's cancellation token.
#[derive(Clone)]
pub struct TickScheduler {
    config: SchedulerConfig,
    sink: Arc<dyn BeatSink>,
    bus: Option<BusPublisher>,
}

impl TickScheduler {
    pub fn new(config: SchedulerConfig, sink: Arc<dyn BeatSink>) -> Self {
        Self {
            config,
            sink,
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: BusPublisher) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn spawn(&self, runtime: Arc<SessionRuntime>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(runtime).await })
    }

    pub async fn run(&self, runtime: Arc<SessionRuntime>) {
        let cancel = runtime.cancel_token();
        let mut delay = Duration::from_millis(self.config.initial_tick_ms);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            match self.tick(&runtime).await {
                Some(next) => delay = next,
                None => break,
            }
        }
        runtime.set_phase(TickPhase::Closed);
        tracing::debug!(session_id = %runtime.session_id(), cursor = runtime.cursor(), "scheduler closed");
    }

    /// One wake. Returns the delay until the next wake, or `None` once the
    /// session is over or every beat has been consumed.
    pub async fn tick(&self, runtime: &SessionRuntime) -> Option<Duration> {
        if runtime.is_ended() {
            return None;
        }
        let index = runtime.cursor();
        let beat = runtime.plan().get(index)?;
        let session_id = runtime.session_id();

        let signals = runtime.signal_snapshot(&self.config);
        match decide(beat, runtime.clock().elapsed_ms(), &signals, &self.config) {
            TickDecision::Wait(wait) => {
                runtime.set_phase(TickPhase::Waiting);
                Some(wait)
            }
            TickDecision::Defer(wait) => {
                runtime.set_phase(TickPhase::Deciding);
                tracing::debug!(
                    session_id,
                    beat = index,
                    role = %beat.role,
                    intent = %beat.intent,
                    mic = signals.mic_active,
                    typing = signals.typing_active,
                    recent = signals.recent_activity,
                    retry_ms = wait.as_millis() as u64,
                    "beat deferred"
                );
                Some(wait)
            }
            TickDecision::Fire { reason, transition } => {
                if !runtime.advance_from(index) {
                    return Some(self.post_fire());
                }
                if self.sink.last_speaker(session_id) == Some(beat.role) {
                    runtime.set_phase(TickPhase::Skipped);
                    tracing::info!(
                        session_id,
                        beat = index,
                        role = %beat.role,
                        intent = %beat.intent,
                        "beat skipped, same role spoke last"
                    );
                    self.publish(BusMessage::BeatSkipped {
                        session_id: session_id.to_string(),
                        beat: index,
                        role: beat.role,
                        intent: beat.intent.clone(),
                    })
                    .await;
                    return Some(self.post_fire());
                }

                runtime.set_phase(TickPhase::Fired);
                tracing::info!(
                    session_id,
                    beat = index,
                    role = %beat.role,
                    intent = %beat.intent,
                    reason = reason.as_str(),
                    transition,
                    "beat fired"
                );
                self.publish(BusMessage::BeatFired {
                    session_id: session_id.to_string(),
                    beat: index,
                    role: beat.role,
                    intent: beat.intent.clone(),
                    reason,
                })
                .await;

                let cue = BeatCue::new(session_id, index, beat, reason, transition);
                let cancel = runtime.cancel_token();
                tokio::select! {
                    _ = cancel.cancelled() => return None,
                    result = self.sink.deliver(cue) => {
                        if let Err(e) = result {
                            tracing::warn!(session_id, beat = index, error = %e, "beat delivery failed");
                        }
                    }
                }
                Some(self.post_fire())
            }
        }
    }

    fn post_fire(&self) -> Duration {
        Duration::from_millis(self.config.post_fire_ms)
    }

    async fn publish(&self, msg: BusMessage) {
        if let Some(bus) = &self.bus {
            let _ = bus.publish(msg).await;
        }
    }
}

/// Publishes `SessionEnded` for a runtime that was just stopped.
pub async fn announce_end(bus: &BusPublisher, runtime: &SessionRuntime) {
    let _ = bus
        .publish(BusMessage::SessionEnded {
            session_id: runtime.session_id().to_string(),
            at: Utc::now(),
        })
        .await;
}
