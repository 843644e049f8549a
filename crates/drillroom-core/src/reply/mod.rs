pub mod generative;
pub mod heuristic;
pub mod pipeline;

pub use generative::*;
pub use heuristic::*;
pub use pipeline::*;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use drillroom_memory::TranscriptStore;
use drillroom_scheduler::BeatCue;
use drillroom_schema::{FocusDecision, FocusLabel, Message, ReplySource, Role, RoleViolation};

use crate::focus::FocusClassifier;
use crate::naturalizer::Naturalizer;
use crate::repetition::RepetitionGuard;
use crate::workstream::{TopicClassifier, WorkstreamSummary};

pub const RECENT_CONTEXT_LINES: usize = 30;
pub const ROLE_HISTORY_LINES: usize = 60;
pub const CROSS_ROLE_HISTORY_LINES: usize = 120;

/// What started a reply turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnTrigger {
    /// A scheduled beat fired.
    Beat(BeatCue),
    /// The participant addressed the role directly.
    Direct { text: String },
}

impl TurnTrigger {
    pub fn is_beat(&self) -> bool {
        matches!(self, Self::Beat(_))
    }

    /// Text heuristics match against: the cue seed for beats, the
    /// participant's message otherwise.
    pub fn input(&self) -> String {
        match self {
            Self::Beat(cue) => cue.seed(),
            Self::Direct { text } => text.clone(),
        }
    }

    pub fn beat_index(&self) -> Option<usize> {
        match self {
            Self::Beat(cue) => Some(cue.index),
            Self::Direct { .. } => None,
        }
    }

    pub fn intent(&self) -> Option<&str> {
        match self {
            Self::Beat(cue) => Some(cue.intent.as_str()),
            Self::Direct { .. } => None,
        }
    }
}

/// Everything one turn reads, captured once before any stage runs.
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub session_id: String,
    pub role: Role,
    pub trigger: TurnTrigger,
    pub workstream: WorkstreamSummary,
    pub recent: Vec<Message>,
    pub role_history: Vec<Message>,
    pub cross_role_history: Vec<Message>,
}

fn render(messages: &[Message]) -> String {
    messages
        .iter()
        .map(Message::transcript_line)
        .collect::<Vec<_>>()
        .join("\n")
}

impl TurnContext {
    pub fn gather(
        store: &TranscriptStore,
        classifier: &dyn TopicClassifier,
        session_id: &str,
        role: Role,
        trigger: TurnTrigger,
        now: DateTime<Utc>,
    ) -> Self {
        let session = store.session(session_id);
        let workstream = WorkstreamSummary::build(&session, classifier, now);
        let cross_role_history = if role == Role::TechLead {
            store.cross_role(session_id, role, CROSS_ROLE_HISTORY_LINES)
        } else {
            Vec::new()
        };
        Self {
            session_id: session_id.to_string(),
            role,
            trigger,
            workstream,
            recent: store.recent(session_id, RECENT_CONTEXT_LINES),
            role_history: store.role_focused(session_id, role, ROLE_HISTORY_LINES),
            cross_role_history,
        }
    }

    /// The participant text this turn reacts to. Beats react to the latest
    /// participant message, which may be empty.
    pub fn participant_text(&self) -> &str {
        match &self.trigger {
            TurnTrigger::Direct { text } => text,
            TurnTrigger::Beat(_) => &self.workstream.latest_participant,
        }
    }

    /// Last `limit` transcript lines, empty when the session has none.
    pub fn recent_lines(&self, limit: usize) -> String {
        let skip = self.recent.len().saturating_sub(limit);
        render(&self.recent[skip..])
    }

    pub fn role_history_lines(&self) -> String {
        render(&self.role_history)
    }

    pub fn cross_role_lines(&self) -> String {
        render(&self.cross_role_history)
    }

    /// A beat landing on a silent or absent participant opens with a short
    /// acknowledgement before moving on.
    pub fn needs_transition(&self) -> bool {
        self.trigger.is_beat() && self.workstream.participant_stalled()
    }
}

/// Final utterance of a turn plus the provenance persisted with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedReply {
    pub text: String,
    pub source: ReplySource,
    pub focus: Option<FocusLabel>,
    pub naturalized: bool,
    pub violation: Option<RoleViolation>,
    pub duplicate_breaker: bool,
}

/// Line used when every stage left the turn empty.
pub fn empty_repair_line(role: Role) -> &'static str {
    match role {
        Role::Ba => "I need one clear business commitment now: rollout sequencing and ETA for leadership communication.",
        Role::Qa => "I need one validation signal now: do we agree no new duplicate-charge logs for 10 minutes?",
        _ => "Choose the safer remediation path now and give one rollback trigger plus one monitoring signal.",
    }
}

/// Shared tail of every delivery path: naturalizer, empty-output repair and
/// the cross-turn repetition breaker, in that order. The breaker compares
/// the text that will actually be persisted.
pub struct ReplyFinisher {
    guard: Arc<RepetitionGuard>,
    naturalizer: Naturalizer,
}

impl ReplyFinisher {
    pub fn new(guard: Arc<RepetitionGuard>, naturalizer: Naturalizer) -> Self {
        Self { guard, naturalizer }
    }

    pub async fn finish(&self, turn: &TurnContext, draft: Draft, focus: Option<&FocusDecision>) -> ComposedReply {
        let natural = self.naturalizer.naturalize(turn, &draft.text, focus).await;

        let mut reply = ComposedReply {
            text: natural.text,
            source: draft.source,
            focus: focus.map(|f| f.focus),
            naturalized: natural.changed,
            violation: natural.violation,
            duplicate_breaker: false,
        };
        if reply.text.trim().is_empty() {
            tracing::warn!(
                session_id = %turn.session_id,
                role = %turn.role,
                "empty reply repaired with role guardrail line"
            );
            reply.text = empty_repair_line(turn.role).to_string();
            reply.source = ReplySource::NudgeOnly;
            reply.violation = reply.violation.or(Some(RoleViolation::GuardrailEmptyRepaired));
        }

        let (text, duplicate_breaker) = self.guard.break_repeat(turn, &reply.text);
        if duplicate_breaker {
            // the breaker is canned text and goes out as is
            reply.text = text;
            reply.naturalized = false;
            reply.duplicate_breaker = true;
        }
        reply
    }
}

/// In-process reply generation: focus, stage chain, then the finisher.
pub struct ReplyEngine {
    focus: FocusClassifier,
    pipeline: ReplyPipeline,
    finisher: Arc<ReplyFinisher>,
}

impl ReplyEngine {
    pub fn new(focus: FocusClassifier, pipeline: ReplyPipeline, finisher: Arc<ReplyFinisher>) -> Self {
        Self {
            focus,
            pipeline,
            finisher,
        }
    }

    pub fn pipeline(&self) -> &ReplyPipeline {
        &self.pipeline
    }

    pub async fn compose(&self, turn: &TurnContext) -> ComposedReply {
        let focus = self.focus.classify(turn).await;
        let draft = self.pipeline.run(turn, &focus).await;
        self.finisher.finish(turn, draft, Some(&focus)).await
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use drillroom_schema::{FireReason, MessageKind};

    use super::*;
    use crate::workstream::KeywordClassifier;

    pub fn beat_cue(session_id: &str, index: usize, role: Role, intent: &str) -> BeatCue {
        BeatCue {
            session_id: session_id.into(),
            index,
            role,
            intent: intent.into(),
            anchor: index == 0,
            reason: FireReason::OnTime,
            transition: false,
            window_start_sec: 0,
            window_end_sec: 20,
            planned_sec: 0,
        }
    }

    pub fn turn(store: &TranscriptStore, role: Role, trigger: TurnTrigger) -> TurnContext {
        let classifier = KeywordClassifier::new().unwrap();
        TurnContext::gather(store, &classifier, "s1", role, trigger, Utc::now())
    }

    pub fn participant(store: &TranscriptStore, text: &str, to: Option<Role>) {
        let mut msg = Message::new("s1", Role::Participant, MessageKind::ParticipantMessage, text);
        msg.meta.addressed_to = to;
        store.append(msg);
    }
}
