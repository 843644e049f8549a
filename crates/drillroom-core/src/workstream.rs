use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use drillroom_schema::{Message, Role};
use regex::Regex;

/// Seconds reported when something never happened.
pub const NEVER_SEC: u64 = 9999;

/// Topics a participant is expected to cover while working the incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChecklistItem {
    Containment,
    Validation,
    Prioritization,
    Rollback,
    Monitoring,
    DataCorrection,
}

impl ChecklistItem {
    pub const ALL: [ChecklistItem; 6] = [
        Self::Containment,
        Self::Validation,
        Self::Prioritization,
        Self::Rollback,
        Self::Monitoring,
        Self::DataCorrection,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Containment => "containment",
            Self::Validation => "validation",
            Self::Prioritization => "prioritization",
            Self::Rollback => "rollback",
            Self::Monitoring => "monitoring",
            Self::DataCorrection => "data_correction",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|item| item.as_str() == raw.trim())
    }

    fn default_pattern(&self) -> &'static str {
        match self {
            Self::Containment => "contain|block|disable|mitigat|stop charge|kill switch|guard",
            Self::Validation => "test|repro|replay|log|metric|evidence|verify|validation",
            Self::Prioritization => "hotfix first|vip first|priority|prioritiz|defer|sequence",
            Self::Rollback => "rollback|roll back|revert|feature flag|fallback",
            Self::Monitoring => "monitor|alert|dashboard|observe|signal|slo|metric",
            Self::DataCorrection => "refund|reconcile|reconciliation|data correction|compensat",
        }
    }
}

/// Shallow topic detection over participant text. Implementations must be
/// pure: same text, same answer.
pub trait TopicClassifier: Send + Sync {
    fn covers(&self, item: ChecklistItem, participant_text: &str) -> bool;
}

/// Case-insensitive keyword presence, one pattern per checklist item.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    rules: Vec<(ChecklistItem, Regex)>,
}

impl KeywordClassifier {
    pub fn new() -> Result<Self> {
        Self::with_overrides(&HashMap::new())
    }

    /// Replaces the default pattern of every item named in `overrides`.
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self> {
        for name in overrides.keys() {
            if ChecklistItem::parse(name).is_none() {
                return Err(anyhow!("unknown checklist item: {name}"));
            }
        }
        let mut rules = Vec::with_capacity(ChecklistItem::ALL.len());
        for item in ChecklistItem::ALL {
            let pattern = overrides
                .get(item.as_str())
                .map(String::as_str)
                .unwrap_or_else(|| item.default_pattern());
            let regex = Regex::new(&format!("(?i){pattern}"))
                .with_context(|| format!("invalid checklist pattern for {}", item.as_str()))?;
            rules.push((item, regex));
        }
        Ok(Self { rules })
    }
}

impl TopicClassifier for KeywordClassifier {
    fn covers(&self, item: ChecklistItem, participant_text: &str) -> bool {
        self.rules
            .iter()
            .find(|(i, _)| *i == item)
            .map(|(_, re)| re.is_match(participant_text))
            .unwrap_or(false)
    }
}

/// Derived view of a session's progress, rebuilt from the transcript on
/// every turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkstreamSummary {
    pub qa_opened: bool,
    pub ba_interrupted: bool,
    pub tech_lead_spoke: bool,
    pub participant_responded: bool,
    pub participant_silence_sec: u64,
    pub agent_prompt_age_sec: u64,
    pub latest_participant: String,
    pub missing: Vec<ChecklistItem>,
}

fn age_sec(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> u64 {
    at.map(|at| now.signed_duration_since(at).num_seconds().max(0) as u64)
        .unwrap_or(NEVER_SEC)
}

impl WorkstreamSummary {
    /// `messages` is one session's transcript, oldest first.
    pub fn build(messages: &[Message], classifier: &dyn TopicClassifier, now: DateTime<Utc>) -> Self {
        let spoke = |role: Role| messages.iter().any(|m| m.role == role);
        let participant: Vec<&Message> = messages
            .iter()
            .filter(|m| m.role == Role::Participant)
            .collect();
        let merged = participant
            .iter()
            .map(|m| m.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let last_agent_at = messages
            .iter()
            .rev()
            .find(|m| m.role.is_persona())
            .map(|m| m.timestamp);

        let missing = ChecklistItem::ALL
            .into_iter()
            .filter(|item| !classifier.covers(*item, &merged))
            .collect();

        Self {
            qa_opened: spoke(Role::Qa),
            ba_interrupted: spoke(Role::Ba),
            tech_lead_spoke: spoke(Role::TechLead),
            participant_responded: !participant.is_empty(),
            participant_silence_sec: age_sec(participant.last().map(|m| m.timestamp), now),
            agent_prompt_age_sec: age_sec(last_agent_at, now),
            latest_participant: participant
                .last()
                .map(|m| m.text.clone())
                .unwrap_or_default(),
            missing,
        }
    }

    pub fn missing_text(items: &[ChecklistItem]) -> String {
        if items.is_empty() {
            return "none".to_string();
        }
        items.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(",")
    }

    /// One-line form used in prompts.
    pub fn summary_line(&self) -> String {
        format!(
            "qa_opened={} | ba_interrupted={} | candidate_responded={} | missing={}",
            self.qa_opened,
            self.ba_interrupted,
            self.participant_responded,
            Self::missing_text(&self.missing)
        )
    }

    /// Unresolved items a role is expected to chase. QA owns containment and
    /// validation, BA owns prioritization, the tech lead owns everything.
    pub fn missing_for(&self, role: Role) -> Vec<ChecklistItem> {
        self.missing
            .iter()
            .copied()
            .filter(|item| match role {
                Role::Qa => matches!(item, ChecklistItem::Containment | ChecklistItem::Validation),
                Role::Ba => *item == ChecklistItem::Prioritization,
                _ => true,
            })
            .collect()
    }

    /// True when the participant has gone quiet or never spoke; a beat then
    /// opens with a short acknowledgement before its question.
    pub fn participant_stalled(&self) -> bool {
        self.participant_silence_sec >= 10 || !self.participant_responded
    }
}
