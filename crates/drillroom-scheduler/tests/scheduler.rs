use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use drillroom_bus::{EventBus, Topic};
use drillroom_scheduler::{
    Beat, BeatCue, BeatSink, SchedulerConfig, SessionRuntime, TickPhase, TickScheduler, TurnPlan,
};
use drillroom_schema::{BusMessage, FireReason, Role, SignalEvent};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Fired {
    index: usize,
    at_ms: u64,
    reason: FireReason,
    role: Role,
}

struct RecordingSink {
    start: Instant,
    delivery_delay: Duration,
    track_speaker: bool,
    fired: Mutex<Vec<Fired>>,
    last: Mutex<Option<Role>>,
}

impl RecordingSink {
    fn new(track_speaker: bool) -> Arc<Self> {
        Self::with_delay(track_speaker, Duration::ZERO)
    }

    fn with_delay(track_speaker: bool, delivery_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            start: Instant::now(),
            delivery_delay,
            track_speaker,
            fired: Mutex::new(Vec::new()),
            last: Mutex::new(None),
        })
    }

    fn fired(&self) -> Vec<Fired> {
        self.fired.lock().unwrap().clone()
    }
}

#[async_trait]
impl BeatSink for RecordingSink {
    fn last_speaker(&self, _session_id: &str) -> Option<Role> {
        *self.last.lock().unwrap()
    }

    async fn deliver(&self, cue: BeatCue) -> Result<()> {
        let at_ms = Instant::now().duration_since(self.start).as_millis() as u64;
        if !self.delivery_delay.is_zero() {
            tokio::time::sleep(self.delivery_delay).await;
        }
        self.fired.lock().unwrap().push(Fired {
            index: cue.index,
            at_ms,
            reason: cue.reason,
            role: cue.role,
        });
        if self.track_speaker {
            *self.last.lock().unwrap() = Some(cue.role);
        }
        Ok(())
    }
}

fn compressed_runtime(seed: u64) -> Arc<SessionRuntime> {
    let mut rng = StdRng::seed_from_u64(seed);
    Arc::new(SessionRuntime::new(
        "sess_sched",
        TurnPlan::materialize(60, 90, &mut rng),
    ))
}

fn deadline_ms(beat: &Beat, config: &SchedulerConfig) -> u64 {
    beat.window_end_ms().min(beat.planned_ms() + config.max_defer_ms)
}

#[tokio::test(start_paused = true)]
async fn every_beat_fires_once_in_order_when_idle() {
    let sink = RecordingSink::new(false);
    let runtime = compressed_runtime(11);
    let scheduler = TickScheduler::new(SchedulerConfig::default(), sink.clone());

    let handle = scheduler.spawn(runtime.clone());
    handle.await.unwrap();

    let fired = sink.fired();
    let indexes: Vec<usize> = fired.iter().map(|f| f.index).collect();
    assert_eq!(indexes, (0..7).collect::<Vec<_>>());
    for f in &fired {
        let beat = runtime.plan().get(f.index).unwrap();
        assert!(f.at_ms >= beat.planned_ms(), "beat {} fired early", f.index);
        assert!(f.at_ms <= deadline_ms(beat, scheduler.config()), "beat {} fired late", f.index);
        assert_eq!(f.role, beat.role);
    }
    assert_eq!(runtime.cursor(), 7);
    assert_eq!(runtime.phase(), TickPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn permanent_mic_never_starves_beats() {
    for seed in [1, 2, 3] {
        let sink = RecordingSink::new(false);
        let runtime = compressed_runtime(seed);
        runtime.apply_signal(&SignalEvent::MicStateChanged { mic_active: true });
        let config = SchedulerConfig::default();
        let scheduler = TickScheduler::new(config.clone(), sink.clone());

        scheduler.spawn(runtime.clone()).await.unwrap();

        let fired = sink.fired();
        assert_eq!(fired.len(), 7, "seed {seed}");
        for f in &fired {
            let beat = runtime.plan().get(f.index).unwrap();
            assert!(f.at_ms <= deadline_ms(beat, &config), "seed {seed} beat {}", f.index);
            if beat.anchor {
                assert_eq!(f.at_ms, 18_000);
                assert_eq!(f.reason, FireReason::OnTime);
            } else if beat.planned_ms() < beat.window_end_ms() {
                assert_eq!(f.reason, FireReason::DeferLimitReached);
            }
        }
    }
}

#[tokio::test(start_paused = true)]
async fn consecutive_same_role_beat_is_skipped_and_announced() {
    let beats = vec![
        Beat {
            role: Role::TechLead,
            intent: "tech_risk_probe".into(),
            window_start_sec: 1,
            window_end_sec: 1,
            anchor: false,
            scheduled_start_sec: 1,
        },
        Beat {
            role: Role::TechLead,
            intent: "tech_final_challenge".into(),
            window_start_sec: 2,
            window_end_sec: 2,
            anchor: false,
            scheduled_start_sec: 2,
        },
        Beat {
            role: Role::Qa,
            intent: "qa_evidence_pressure".into(),
            window_start_sec: 3,
            window_end_sec: 3,
            anchor: false,
            scheduled_start_sec: 3,
        },
    ];
    let bus = EventBus::new(16);
    let mut outcomes = bus.subscribe(Topic::BeatOutcome).await;
    let sink = RecordingSink::new(true);
    let runtime = Arc::new(SessionRuntime::new("sess_skip", TurnPlan::from_beats(60, beats)));
    let scheduler =
        TickScheduler::new(SchedulerConfig::default(), sink.clone()).with_bus(bus.publisher());

    scheduler.spawn(runtime.clone()).await.unwrap();

    let fired: Vec<usize> = sink.fired().iter().map(|f| f.index).collect();
    assert_eq!(fired, vec![0, 2]);
    assert_eq!(runtime.cursor(), 3);

    let mut skipped = Vec::new();
    while let Ok(msg) = outcomes.try_recv() {
        if let BusMessage::BeatSkipped { beat, role, .. } = msg {
            skipped.push((beat, role));
        }
    }
    assert_eq!(skipped, vec![(1, Role::TechLead)]);
}

#[tokio::test(start_paused = true)]
async fn stopping_cancels_pending_tick() {
    let sink = RecordingSink::new(false);
    let runtime = compressed_runtime(5);
    let scheduler = TickScheduler::new(SchedulerConfig::default(), sink.clone());
    let handle = scheduler.spawn(runtime.clone());

    // the anchor at 18s is the third beat; stop just before it
    tokio::time::sleep(Duration::from_millis(17_500)).await;
    let before = sink.fired().len();
    assert_eq!(before, 2);

    assert!(runtime.end());
    tokio::time::sleep(Duration::from_secs(120)).await;

    assert!(handle.is_finished());
    assert_eq!(sink.fired().len(), before);
    assert_eq!(runtime.phase(), TickPhase::Closed);
}

#[tokio::test(start_paused = true)]
async fn stopping_during_delivery_drops_the_reply() {
    let sink = RecordingSink::with_delay(false, Duration::from_secs(2));
    let beats = vec![Beat {
        role: Role::Qa,
        intent: "qa_open_p0".into(),
        window_start_sec: 0,
        window_end_sec: 0,
        anchor: false,
        scheduled_start_sec: 0,
    }];
    let runtime = Arc::new(SessionRuntime::new("sess_mid", TurnPlan::from_beats(60, beats)));
    let handle = TickScheduler::new(SchedulerConfig::default(), sink.clone()).spawn(runtime.clone());

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    runtime.end();
    handle.await.unwrap();

    assert!(sink.fired().is_empty());
    assert_eq!(runtime.cursor(), 1);
}

#[tokio::test(start_paused = true)]
async fn beats_past_session_end_never_fire() {
    let beats = vec![Beat {
        role: Role::Ba,
        intent: "ba_vip_interrupt".into(),
        window_start_sec: 180,
        window_end_sec: 180,
        anchor: true,
        scheduled_start_sec: 180,
    }];
    let sink = RecordingSink::new(false);
    let runtime = Arc::new(SessionRuntime::new("sess_short", TurnPlan::from_beats(60, beats)));
    let handle = TickScheduler::new(SchedulerConfig::default(), sink.clone()).spawn(runtime.clone());

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert!(runtime.is_ended());
    // the pending wait was armed before expiry; its wake closes the loop
    tokio::time::sleep(Duration::from_secs(200)).await;
    handle.await.unwrap();
    assert!(sink.fired().is_empty());
}
