use chrono::{DateTime, Utc};
use drillroom_schema::{Message, MessageKind, Role};
use serde::{Deserialize, Serialize};

pub const MAX_SCORE: u32 = 20;

const PRIORITIZATION_TERMS: [&str; 8] = [
    "hotfix",
    "p0",
    "priority",
    "prioritize",
    "first",
    "defer",
    "vip later",
    "feature later",
];

const TECHNICAL_TERMS: [&str; 8] = [
    "idempot", "retry", "dedup", "duplicate", "guard", "key", "rollback", "monitor",
];

const RISK_TERMS: [&str; 8] = [
    "rollback",
    "monitor",
    "alert",
    "mitigat",
    "customer",
    "refund",
    "reconcile",
    "impact",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Yes,
    Maybe,
    No,
}

impl Recommendation {
    pub fn from_total(total: u32) -> Self {
        if total >= 16 {
            Self::Yes
        } else if total >= 12 {
            Self::Maybe
        } else {
            Self::No
        }
    }

    pub fn summary(&self) -> &'static str {
        match self {
            Self::Yes => "Candidate demonstrated strong prioritization, technical direction, and risk awareness under pressure.",
            Self::Maybe => "Candidate showed partial incident handling skills but needs clearer prioritization or risk framing.",
            Self::No => "Candidate responses lacked sufficient prioritization and production-safe execution detail.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rubric {
    pub prioritization_under_pressure: u32,
    pub technical_correctness: u32,
    pub production_risk_awareness: u32,
    pub communication_clarity: u32,
}

impl Rubric {
    pub fn total(&self) -> u32 {
        self.prioritization_under_pressure
            + self.technical_correctness
            + self.production_risk_awareness
            + self.communication_clarity
    }
}

/// Content-presence rubric over what the participant wrote. Derived on
/// demand; never fed back into the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub recommendation: Recommendation,
    pub total_score: u32,
    pub max_score: u32,
    pub rubric: Rubric,
    pub summary: String,
}

fn keyword_score(haystack: &str, terms: &[&str]) -> u32 {
    if terms.iter().any(|t| haystack.contains(t)) {
        4
    } else {
        2
    }
}

/// Scores one session's transcript.
pub fn evaluate_transcript(session_id: &str, messages: &[Message]) -> EvaluationReport {
    let participant: Vec<&Message> = messages
        .iter()
        .filter(|m| m.session_id == session_id && m.role == Role::Participant)
        .collect();
    let prose = participant
        .iter()
        .filter(|m| m.kind != MessageKind::ParticipantCode)
        .map(|m| m.text.as_str())
        .collect::<Vec<_>>()
        .join("\n")
        .to_lowercase();
    let latest_code = participant
        .iter()
        .rev()
        .find(|m| m.kind == MessageKind::ParticipantCode)
        .map(|m| m.text.to_lowercase())
        .unwrap_or_default();

    let communication_clarity = match participant.len() {
        0 => 1,
        1 | 2 => 3,
        _ => 4,
    };
    let rubric = Rubric {
        prioritization_under_pressure: keyword_score(&prose, &PRIORITIZATION_TERMS),
        technical_correctness: keyword_score(&format!("{prose}\n{latest_code}"), &TECHNICAL_TERMS),
        production_risk_awareness: keyword_score(&prose, &RISK_TERMS),
        communication_clarity,
    };
    let total_score = rubric.total();
    let recommendation = Recommendation::from_total(total_score);

    EvaluationReport {
        session_id: session_id.to_string(),
        generated_at: Utc::now(),
        recommendation,
        total_score,
        max_score: MAX_SCORE,
        rubric,
        summary: recommendation.summary().to_string(),
    }
}
