use drillroom_schema::Role;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Declarative beat: who speaks, about what, and inside which window
/// (seconds since session start, both ends inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeatTemplate {
    pub role: Role,
    pub intent: &'static str,
    pub window_start_sec: u64,
    pub window_end_sec: u64,
    pub anchor: bool,
}

const fn beat(
    role: Role,
    intent: &'static str,
    window_start_sec: u64,
    window_end_sec: u64,
    anchor: bool,
) -> BeatTemplate {
    BeatTemplate {
        role,
        intent,
        window_start_sec,
        window_end_sec,
        anchor,
    }
}

const COMPRESSED_BEATS: [BeatTemplate; 7] = [
    beat(Role::Qa, "qa_open_p0", 0, 2, false),
    beat(Role::TechLead, "tech_initial_remediation", 6, 10, false),
    beat(Role::Ba, "ba_vip_interrupt", 18, 18, true),
    beat(Role::TechLead, "tech_prioritization_challenge", 22, 28, false),
    beat(Role::Qa, "qa_evidence_pressure", 34, 40, false),
    beat(Role::TechLead, "tech_risk_probe", 42, 47, false),
    beat(Role::TechLead, "tech_final_challenge", 52, 56, false),
];

const FULL_BEATS: [BeatTemplate; 7] = [
    beat(Role::Qa, "qa_open_p0", 0, 30, false),
    beat(Role::TechLead, "tech_initial_remediation", 60, 105, false),
    beat(Role::Ba, "ba_vip_interrupt", 180, 180, true),
    beat(Role::TechLead, "tech_prioritization_challenge", 210, 270, false),
    beat(Role::Qa, "qa_evidence_pressure", 360, 405, false),
    beat(Role::TechLead, "tech_risk_probe", 420, 465, false),
    beat(Role::TechLead, "tech_final_challenge", 540, 570, false),
];

/// Beat templates for a session length: the compressed set when
/// `duration_sec <= compressed_max_sec`, the expanded set otherwise.
pub fn beat_templates(duration_sec: u64, compressed_max_sec: u64) -> &'static [BeatTemplate] {
    if duration_sec <= compressed_max_sec {
        &COMPRESSED_BEATS
    } else {
        &FULL_BEATS
    }
}

/// A beat with its start time fixed for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub role: Role,
    pub intent: String,
    pub window_start_sec: u64,
    pub window_end_sec: u64,
    pub anchor: bool,
    pub scheduled_start_sec: u64,
}

impl Beat {
    fn materialize<R: Rng + ?Sized>(template: &BeatTemplate, rng: &mut R) -> Self {
        let scheduled_start_sec = if template.anchor {
            template.window_start_sec
        } else {
            rng.gen_range(template.window_start_sec..=template.window_end_sec)
        };
        Self {
            role: template.role,
            intent: template.intent.to_string(),
            window_start_sec: template.window_start_sec,
            window_end_sec: template.window_end_sec,
            anchor: template.anchor,
            scheduled_start_sec,
        }
    }

    pub fn planned_ms(&self) -> u64 {
        self.scheduled_start_sec * 1000
    }

    pub fn window_end_ms(&self) -> u64 {
        self.window_end_sec * 1000
    }

    pub fn window_label(&self) -> String {
        format!("{}-{}", self.window_start_sec, self.window_end_sec)
    }
}

/// Immutable ordered beat sequence of one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnPlan {
    duration_sec: u64,
    compressed: bool,
    beats: Vec<Beat>,
}

impl TurnPlan {
    pub fn materialize<R: Rng + ?Sized>(
        duration_sec: u64,
        compressed_max_sec: u64,
        rng: &mut R,
    ) -> Self {
        let beats = beat_templates(duration_sec, compressed_max_sec)
            .iter()
            .map(|template| Beat::materialize(template, rng))
            .collect();
        Self {
            duration_sec,
            compressed: duration_sec <= compressed_max_sec,
            beats,
        }
    }

    /// Plan with hand-picked beats, used by tests and replays.
    pub fn from_beats(duration_sec: u64, beats: Vec<Beat>) -> Self {
        Self {
            duration_sec,
            compressed: false,
            beats,
        }
    }

    pub fn beats(&self) -> &[Beat] {
        &self.beats
    }

    pub fn get(&self, index: usize) -> Option<&Beat> {
        self.beats.get(index)
    }

    pub fn len(&self) -> usize {
        self.beats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.beats.is_empty()
    }

    pub fn duration_sec(&self) -> u64 {
        self.duration_sec
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed
    }
}
