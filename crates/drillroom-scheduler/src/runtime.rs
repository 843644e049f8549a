use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use drillroom_schema::SignalEvent;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::{SchedulerConfig, SignalSnapshot, SignalTracker, TickPhase, TurnPlan};

/// Wall-clock start for reporting plus a monotonic start for scheduling.
#[derive(Debug, Clone)]
pub struct SessionClock {
    started_at: DateTime<Utc>,
    start: Instant,
    duration: Duration,
}

impl SessionClock {
    pub fn start_now(duration_sec: u64) -> Self {
        Self {
            started_at: Utc::now(),
            start: Instant::now(),
            duration: Duration::from_secs(duration_sec),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn scheduled_end(&self) -> DateTime<Utc> {
        self.started_at + chrono::Duration::milliseconds(self.duration.as_millis() as i64)
    }

    pub fn elapsed_ms(&self) -> u64 {
        Instant::now().saturating_duration_since(self.start).as_millis() as u64
    }

    pub fn expired(&self) -> bool {
        Instant::now().saturating_duration_since(self.start) >= self.duration
    }

    pub fn duration_sec(&self) -> u64 {
        self.duration.as_secs()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Mutable per-session scheduling state. One tick task owns the cursor;
/// signal handlers only touch the tracker. Fields are independent, last
/// write wins.
#[derive(Debug)]
pub struct SessionRuntime {
    session_id: String,
    clock: SessionClock,
    plan: TurnPlan,
    signals: Mutex<SignalTracker>,
    cursor: AtomicUsize,
    phase: Mutex<TickPhase>,
    ended: AtomicBool,
    stopped_at: Mutex<Option<DateTime<Utc>>>,
    cancel: CancellationToken,
}

impl SessionRuntime {
    pub fn new(session_id: impl Into<String>, plan: TurnPlan) -> Self {
        let clock = SessionClock::start_now(plan.duration_sec());
        Self {
            session_id: session_id.into(),
            clock,
            plan,
            signals: Mutex::new(SignalTracker::new()),
            cursor: AtomicUsize::new(0),
            phase: Mutex::new(TickPhase::Idle),
            ended: AtomicBool::new(false),
            stopped_at: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn plan(&self) -> &TurnPlan {
        &self.plan
    }

    pub fn clock(&self) -> &SessionClock {
        &self.clock
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.clock.started_at()
    }

    /// Stop time once stopped, otherwise the scheduled end.
    pub fn end_at(&self) -> DateTime<Utc> {
        lock(&self.stopped_at).unwrap_or_else(|| self.clock.scheduled_end())
    }

    /// Ended by an explicit stop or by the clock running out.
    pub fn is_ended(&self) -> bool {
        self.ended.load(Ordering::SeqCst) || self.clock.expired()
    }

    pub fn was_stopped(&self) -> bool {
        self.ended.load(Ordering::SeqCst)
    }

    /// Marks the session ended and cancels the pending tick along with any
    /// delivery in flight. Returns false if it was already stopped.
    pub fn end(&self) -> bool {
        let first = !self.ended.swap(true, Ordering::SeqCst);
        if first {
            *lock(&self.stopped_at) = Some(Utc::now());
        }
        self.cancel.cancel();
        *lock(&self.phase) = TickPhase::Closed;
        first
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    /// Claims the beat at `expected`; false if the cursor already moved.
    pub(crate) fn advance_from(&self, expected: usize) -> bool {
        self.cursor
            .compare_exchange(expected, expected + 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn phase(&self) -> TickPhase {
        *lock(&self.phase)
    }

    pub(crate) fn set_phase(&self, phase: TickPhase) {
        let mut current = lock(&self.phase);
        if *current != TickPhase::Closed {
            *current = phase;
        }
    }

    pub fn apply_signal(&self, event: &SignalEvent) {
        lock(&self.signals).apply(event, Instant::now());
    }

    pub fn record_participant_activity(&self) {
        lock(&self.signals).record_participant_activity(Instant::now());
    }

    pub fn signal_snapshot(&self, config: &SchedulerConfig) -> SignalSnapshot {
        lock(&self.signals).snapshot(Instant::now(), config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn runtime(duration: u64) -> SessionRuntime {
        let mut rng = StdRng::seed_from_u64(3);
        SessionRuntime::new("sess_test", TurnPlan::materialize(duration, 90, &mut rng))
    }

    #[tokio::test(start_paused = true)]
    async fn clock_expiry_ends_session() {
        let rt = runtime(60);
        assert!(!rt.is_ended());
        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(rt.is_ended());
        assert!(!rt.was_stopped());
    }

    #[tokio::test]
    async fn end_is_idempotent_and_closes() {
        let rt = runtime(600);
        let scheduled_end = rt.end_at();
        assert!(rt.end());
        assert!(!rt.end());
        assert!(rt.is_ended());
        assert!(rt.cancel_token().is_cancelled());
        assert_eq!(rt.phase(), TickPhase::Closed);
        assert!(rt.end_at() < scheduled_end);

        rt.set_phase(TickPhase::Waiting);
        assert_eq!(rt.phase(), TickPhase::Closed);
    }

    #[test]
    fn cursor_only_moves_forward_once_per_claim() {
        let rt = runtime(600);
        assert!(rt.advance_from(0));
        assert!(!rt.advance_from(0));
        assert_eq!(rt.cursor(), 1);
    }
}
