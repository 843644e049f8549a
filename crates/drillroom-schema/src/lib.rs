use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================
// Roles
// ============================================================

/// Author of a transcript entry.
///
/// `Qa`, `Ba` and `TechLead` are the scripted personas; `Participant` is the
/// human working the incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Qa,
    Ba,
    #[serde(alias = "techlead", alias = "tech-lead")]
    TechLead,
    #[serde(alias = "candidate")]
    Participant,
    System,
}

impl Role {
    pub const PERSONAS: [Role; 3] = [Role::Qa, Role::Ba, Role::TechLead];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qa => "qa",
            Self::Ba => "ba",
            Self::TechLead => "tech_lead",
            Self::Participant => "participant",
            Self::System => "system",
        }
    }

    pub fn is_persona(&self) -> bool {
        matches!(self, Self::Qa | Self::Ba | Self::TechLead)
    }

    /// Lenient parse used at the ingestion boundary.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "qa" => Some(Self::Qa),
            "ba" => Some(Self::Ba),
            "tech_lead" | "techlead" | "tech-lead" => Some(Self::TechLead),
            "participant" | "candidate" => Some(Self::Participant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| format!("unknown role: {s}"))
    }
}

// ============================================================
// Transcript messages
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    SessionStart,
    SessionEnd,
    #[serde(alias = "candidate_message")]
    ParticipantMessage,
    #[serde(alias = "candidate_code")]
    ParticipantCode,
    Question,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusLabel {
    OnTask,
    OffTopic,
    Mixed,
    #[default]
    Unknown,
}

impl FocusLabel {
    /// Accepts only the three labels a classifier is allowed to emit.
    pub fn parse_classified(raw: &str) -> Option<Self> {
        match raw.trim() {
            "on_task" => Some(Self::OnTask),
            "off_topic" => Some(Self::OffTopic),
            "mixed" => Some(Self::Mixed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTask => "on_task",
            Self::OffTopic => "off_topic",
            Self::Mixed => "mixed",
            Self::Unknown => "unknown",
        }
    }
}

/// Ephemeral result of focus classification; never persisted on its own.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FocusDecision {
    pub focus: FocusLabel,
    #[serde(default)]
    pub nudge: String,
}

impl FocusDecision {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// True for `off_topic` and `mixed`.
    pub fn is_drifting(&self) -> bool {
        matches!(self.focus, FocusLabel::OffTopic | FocusLabel::Mixed)
    }
}

/// Which stage produced a persona reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReplySource {
    Generative,
    NudgeOnly,
    Heuristic,
    Workflow,
}

impl ReplySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::NudgeOnly => "nudge-only",
            Self::Heuristic => "heuristic",
            Self::Workflow => "workflow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleViolation {
    QaScopeDrift,
    BaScopeDrift,
    TechLeadScopeDrift,
    GuardrailEmptyRepaired,
}

impl RoleViolation {
    /// `none`, empty and unrecognised tags all map to `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "qa_scope_drift" => Some(Self::QaScopeDrift),
            "ba_scope_drift" => Some(Self::BaScopeDrift),
            "tech_lead_scope_drift" => Some(Self::TechLeadScopeDrift),
            "guardrail_empty_repaired" => Some(Self::GuardrailEmptyRepaired),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addressed_to: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_root: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<FocusLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_source: Option<ReplySource>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub naturalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_violation: Option<RoleViolation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beat_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate_breaker: bool,
}

/// One immutable transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub session_id: String,
    pub id: String,
    pub role: Role,
    pub kind: MessageKind,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(
        session_id: impl Into<String>,
        role: Role,
        kind: MessageKind,
        text: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            id: format!("msg_{}_{}", role, Uuid::new_v4().simple()),
            role,
            kind,
            text: text.into(),
            timestamp: Utc::now(),
            meta: MessageMeta::default(),
        }
    }

    pub fn system(session_id: impl Into<String>, kind: MessageKind, text: impl Into<String>) -> Self {
        Self::new(session_id, Role::System, kind, text)
    }

    pub fn with_meta(mut self, meta: MessageMeta) -> Self {
        self.meta = meta;
        self
    }

    /// `role: text` line used when rendering transcript context.
    pub fn transcript_line(&self) -> String {
        format!("{}: {}", self.role, self.text.trim())
    }
}

// ============================================================
// Signals
// ============================================================

/// Participant-side event delivered through the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SignalEvent {
    MicStateChanged {
        mic_active: bool,
    },
    SpeechEnd,
    TypingStateChanged {
        typing_active: bool,
    },
    ParticipantMessage {
        text: String,
        #[serde(default)]
        addressed_to: Option<Role>,
        #[serde(default)]
        thread_root: Option<String>,
    },
}

impl SignalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MicStateChanged { .. } => "mic_state_changed",
            Self::SpeechEnd => "speech_end",
            Self::TypingStateChanged { .. } => "typing_state_changed",
            Self::ParticipantMessage { .. } => "participant_message",
        }
    }
}

/// Why a beat fired when it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FireReason {
    OnTime,
    Deferred,
    WindowClosed,
    DeferLimitReached,
}

impl FireReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnTime => "on_time",
            Self::Deferred => "deferred",
            Self::WindowClosed => "window_closed",
            Self::DeferLimitReached => "defer_limit_reached",
        }
    }
}

// ============================================================
// Bus messages
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    SessionStarted {
        session_id: String,
        started_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
        beats: usize,
    },
    SessionEnded {
        session_id: String,
        at: DateTime<Utc>,
    },
    TranscriptAppended {
        message: Message,
    },
    BeatFired {
        session_id: String,
        beat: usize,
        role: Role,
        intent: String,
        reason: FireReason,
    },
    BeatSkipped {
        session_id: String,
        beat: usize,
        role: Role,
        intent: String,
    },
}

impl BusMessage {
    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionStarted { session_id, .. }
            | Self::SessionEnded { session_id, .. }
            | Self::BeatFired { session_id, .. }
            | Self::BeatSkipped { session_id, .. } => session_id,
            Self::TranscriptAppended { message } => &message.session_id,
        }
    }
}
