use drillroom_schema::SignalEvent;
use tokio::time::{Duration, Instant};

use crate::SchedulerConfig;

/// Live participant facts of one session. Written only by inbound signal
/// events; the scheduler reads snapshots.
#[derive(Debug, Clone, Default)]
pub struct SignalTracker {
    mic_active: bool,
    typing_active: bool,
    typing_at: Option<Instant>,
    last_participant_activity: Option<Instant>,
}

/// Blocking inputs evaluated at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SignalSnapshot {
    pub mic_active: bool,
    pub typing_active: bool,
    pub recent_activity: bool,
}

impl SignalSnapshot {
    pub fn any(&self) -> bool {
        self.mic_active || self.typing_active || self.recent_activity
    }
}

impl SignalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &SignalEvent, now: Instant) {
        match event {
            SignalEvent::MicStateChanged { mic_active } => self.mic_active = *mic_active,
            SignalEvent::SpeechEnd => self.mic_active = false,
            SignalEvent::TypingStateChanged { typing_active } => {
                self.typing_active = *typing_active;
                if *typing_active {
                    self.typing_at = Some(now);
                }
            }
            SignalEvent::ParticipantMessage { .. } => self.record_participant_activity(now),
        }
    }

    /// Any participant-authored content; also ends the typing burst that
    /// produced it.
    pub fn record_participant_activity(&mut self, now: Instant) {
        self.last_participant_activity = Some(now);
        self.typing_active = false;
    }

    pub fn mic_active(&self) -> bool {
        self.mic_active
    }

    pub fn snapshot(&self, now: Instant, config: &SchedulerConfig) -> SignalSnapshot {
        let within = |at: Option<Instant>, grace_ms: u64| {
            at.map(|at| now.saturating_duration_since(at) <= Duration::from_millis(grace_ms))
                .unwrap_or(false)
        };
        SignalSnapshot {
            mic_active: self.mic_active,
            typing_active: self.typing_active && within(self.typing_at, config.typing_grace_ms),
            recent_activity: within(self.last_participant_activity, config.recent_activity_grace_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mic_set_and_cleared_by_speech_end() {
        let now = Instant::now();
        let config = SchedulerConfig::default();
        let mut tracker = SignalTracker::new();

        tracker.apply(&SignalEvent::MicStateChanged { mic_active: true }, now);
        assert!(tracker.snapshot(now, &config).mic_active);

        tracker.apply(&SignalEvent::SpeechEnd, now);
        assert!(!tracker.snapshot(now, &config).any());
    }

    #[test]
    fn typing_expires_after_grace_without_clear() {
        let start = Instant::now();
        let config = SchedulerConfig::default();
        let mut tracker = SignalTracker::new();
        tracker.apply(&SignalEvent::TypingStateChanged { typing_active: true }, start);

        assert!(tracker.snapshot(start + Duration::from_millis(3_000), &config).typing_active);
        assert!(!tracker.snapshot(start + Duration::from_millis(3_001), &config).typing_active);
    }

    #[test]
    fn participant_message_refreshes_activity_and_clears_typing() {
        let start = Instant::now();
        let config = SchedulerConfig::default();
        let mut tracker = SignalTracker::new();
        tracker.apply(&SignalEvent::TypingStateChanged { typing_active: true }, start);
        tracker.apply(
            &SignalEvent::ParticipantMessage {
                text: "rolling back".into(),
                addressed_to: None,
                thread_root: None,
            },
            start,
        );

        let snap = tracker.snapshot(start + Duration::from_millis(4_000), &config);
        assert!(!snap.typing_active);
        assert!(snap.recent_activity);
        assert!(!tracker
            .snapshot(start + Duration::from_millis(4_501), &config)
            .recent_activity);
    }
}
