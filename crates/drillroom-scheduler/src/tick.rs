use drillroom_schema::FireReason;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::{Beat, SchedulerConfig, SignalSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickPhase {
    Idle,
    Waiting,
    Deciding,
    Fired,
    Skipped,
    Closed,
}

impl TickPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Deciding => "deciding",
            Self::Fired => "fired",
            Self::Skipped => "skipped",
            Self::Closed => "closed",
        }
    }
}

/// Outcome of evaluating the current beat at one wake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Planned start not reached yet; sleep exactly until it.
    Wait(Duration),
    /// Participant is active and the defer deadline is still ahead.
    Defer(Duration),
    Fire { reason: FireReason, transition: bool },
}

/// Pure firing decision for `beat` at `elapsed_ms` since session start.
///
/// A blocked beat is re-checked every `retry_ms`, but never later than its
/// defer deadline, so it fires no later than
/// `min(window_end, planned + max_defer)`. Anchors ignore every signal.
pub fn decide(
    beat: &Beat,
    elapsed_ms: u64,
    signals: &SignalSnapshot,
    config: &SchedulerConfig,
) -> TickDecision {
    let planned_ms = beat.planned_ms();
    if elapsed_ms < planned_ms {
        return TickDecision::Wait(Duration::from_millis(planned_ms - elapsed_ms));
    }

    let window_end_ms = beat.window_end_ms();
    let deadline_ms = window_end_ms.min(planned_ms + config.max_defer_ms);
    let blocked = !beat.anchor && signals.any();

    if blocked && elapsed_ms < deadline_ms {
        let wait = config.retry_ms.min(deadline_ms - elapsed_ms);
        return TickDecision::Defer(Duration::from_millis(wait));
    }

    let transition = blocked || elapsed_ms > planned_ms + 1000;
    let reason = if blocked {
        FireReason::DeferLimitReached
    } else if elapsed_ms > window_end_ms {
        FireReason::WindowClosed
    } else if elapsed_ms > planned_ms {
        FireReason::Deferred
    } else {
        FireReason::OnTime
    };
    TickDecision::Fire { reason, transition }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drillroom_schema::Role;

    fn beat(start: u64, end: u64, planned: u64, anchor: bool) -> Beat {
        Beat {
            role: Role::TechLead,
            intent: "tech_risk_probe".into(),
            window_start_sec: start,
            window_end_sec: end,
            anchor,
            scheduled_start_sec: planned,
        }
    }

    fn busy() -> SignalSnapshot {
        SignalSnapshot {
            mic_active: true,
            ..Default::default()
        }
    }

    #[test]
    fn waits_until_planned_start() {
        let config = SchedulerConfig::default();
        let decision = decide(&beat(40, 50, 42, false), 41_250, &SignalSnapshot::default(), &config);
        assert_eq!(decision, TickDecision::Wait(Duration::from_millis(750)));
    }

    #[test]
    fn fires_on_time_when_idle() {
        let config = SchedulerConfig::default();
        let decision = decide(&beat(40, 50, 42, false), 42_000, &SignalSnapshot::default(), &config);
        assert_eq!(
            decision,
            TickDecision::Fire {
                reason: FireReason::OnTime,
                transition: false
            }
        );
    }

    #[test]
    fn blocked_beat_defers_by_retry_interval() {
        let config = SchedulerConfig::default();
        let decision = decide(&beat(40, 50, 42, false), 42_000, &busy(), &config);
        assert_eq!(decision, TickDecision::Defer(Duration::from_millis(800)));
    }

    #[test]
    fn defer_is_clamped_to_deadline() {
        let config = SchedulerConfig::default();
        // deadline = min(50_000, 42_000 + 15_000) = 50_000
        let decision = decide(&beat(40, 50, 42, false), 49_700, &busy(), &config);
        assert_eq!(decision, TickDecision::Defer(Duration::from_millis(300)));
    }

    #[test]
    fn blocked_beat_fires_at_deadline() {
        let config = SchedulerConfig::default();
        let decision = decide(&beat(40, 50, 42, false), 50_000, &busy(), &config);
        assert_eq!(
            decision,
            TickDecision::Fire {
                reason: FireReason::DeferLimitReached,
                transition: true
            }
        );
    }

    #[test]
    fn max_defer_caps_long_windows() {
        let config = SchedulerConfig::default();
        let long = beat(0, 120, 10, false);
        assert!(matches!(decide(&long, 24_999, &busy(), &config), TickDecision::Defer(_)));
        assert!(matches!(
            decide(&long, 25_000, &busy(), &config),
            TickDecision::Fire {
                reason: FireReason::DeferLimitReached,
                ..
            }
        ));
    }

    #[test]
    fn anchor_ignores_signals() {
        let config = SchedulerConfig::default();
        let decision = decide(&beat(18, 18, 18, true), 18_000, &busy(), &config);
        assert_eq!(
            decision,
            TickDecision::Fire {
                reason: FireReason::OnTime,
                transition: false
            }
        );
    }

    #[test]
    fn late_wake_reasons() {
        let config = SchedulerConfig::default();
        let idle = SignalSnapshot::default();
        assert_eq!(
            decide(&beat(40, 50, 42, false), 42_500, &idle, &config),
            TickDecision::Fire {
                reason: FireReason::Deferred,
                transition: false
            }
        );
        assert_eq!(
            decide(&beat(40, 50, 42, false), 51_000, &idle, &config),
            TickDecision::Fire {
                reason: FireReason::WindowClosed,
                transition: true
            }
        );
    }
}
