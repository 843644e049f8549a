use std::sync::Arc;

use drillroom_schema::{FocusDecision, FocusLabel};
use serde_json::Value;

use crate::llm::{parse_json_object, GenerationProfile, TextGenerator};
use crate::reply::TurnContext;

const FOCUS_TRANSCRIPT_LINES: usize = 12;
const NUDGE_MAX_WORDS: usize = 22;

const FOCUS_SYSTEM_PROMPT: [&str; 10] = [
    "You classify the candidate's latest message in a live technical incident simulation.",
    "Classify focus as exactly one of: on_task, off_topic, mixed.",
    "off_topic means social/small-talk or unrelated content.",
    "mixed means partly social and partly incident-related.",
    "Return ONLY JSON with this exact shape:",
    "{\"focus\":\"on_task|off_topic|mixed\",\"nudge\":\"...\"}",
    "nudge must be a single short sentence (max 22 words).",
    "If focus is off_topic or mixed, nudge must redirect to incident execution and ask one concrete next action.",
    "If focus is on_task, nudge can be empty string.",
    "No markdown. No explanation outside JSON.",
];

/// Labels the participant's latest text. Any failure degrades to
/// `unknown` with an empty nudge; classification never blocks a turn.
pub struct FocusClassifier {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl FocusClassifier {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub fn disabled() -> Self {
        Self { generator: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.generator.is_some()
    }

    pub fn system_prompt() -> String {
        FOCUS_SYSTEM_PROMPT.join(" ")
    }

    pub fn input_text(turn: &TurnContext) -> String {
        let message = turn.participant_text().trim();
        let transcript = turn.recent_lines(FOCUS_TRANSCRIPT_LINES);
        [
            format!("Role: {}", turn.role),
            format!(
                "Candidate message: {}",
                if message.is_empty() { "(empty)" } else { message }
            ),
            format!("Workstream summary: {}", turn.workstream.summary_line()),
            "Recent transcript:".to_string(),
            if transcript.is_empty() { "(none)".to_string() } else { transcript },
        ]
        .join("\n")
    }

    pub async fn classify(&self, turn: &TurnContext) -> FocusDecision {
        let Some(generator) = &self.generator else {
            return FocusDecision::unknown();
        };
        match generator
            .generate(&Self::system_prompt(), &Self::input_text(turn), GenerationProfile::FOCUS)
            .await
        {
            Ok(raw) => {
                let decision = parse_focus(&raw);
                tracing::debug!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    focus = decision.focus.as_str(),
                    "focus classified"
                );
                decision
            }
            Err(e) => {
                tracing::warn!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    error = %e,
                    "focus classification failed"
                );
                FocusDecision::unknown()
            }
        }
    }
}

/// Reads `{focus, nudge}` out of classifier output. Labels outside the
/// three allowed ones become `unknown`; the nudge is capped at 22 words.
pub fn parse_focus(raw: &str) -> FocusDecision {
    let Some(obj) = parse_json_object(raw) else {
        return FocusDecision::unknown();
    };
    let focus = obj
        .get("focus")
        .and_then(Value::as_str)
        .and_then(FocusLabel::parse_classified)
        .unwrap_or_default();
    let nudge = obj
        .get("nudge")
        .and_then(Value::as_str)
        .map(|n| {
            n.split_whitespace()
                .take(NUDGE_MAX_WORDS)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default();
    FocusDecision { focus, nudge }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_label_and_nudge() {
        let d = parse_focus(r#"{"focus":"mixed","nudge":"  Back to containment: what is your first block? "}"#);
        assert_eq!(d.focus, FocusLabel::Mixed);
        assert_eq!(d.nudge, "Back to containment: what is your first block?");
        assert!(d.is_drifting());
    }

    #[test]
    fn unknown_label_and_garbage_degrade() {
        assert_eq!(parse_focus(r#"{"focus":"chatty"}"#).focus, FocusLabel::Unknown);
        assert_eq!(parse_focus("on_task"), FocusDecision::unknown());
        assert_eq!(parse_focus(""), FocusDecision::unknown());
    }

    #[test]
    fn long_nudge_is_capped() {
        let words = vec!["go"; 40].join(" ");
        let d = parse_focus(&format!(r#"{{"focus":"off_topic","nudge":"{words}"}}"#));
        assert_eq!(d.nudge.split_whitespace().count(), 22);
    }

    #[test]
    fn system_prompt_lists_labels() {
        let prompt = FocusClassifier::system_prompt();
        assert!(prompt.contains("on_task, off_topic, mixed"));
        assert!(!FocusClassifier::disabled().is_enabled());
    }
}
