use std::sync::Arc;

use drillroom_memory::normalize_text;
use drillroom_schema::{FocusDecision, Role, RoleViolation};
use serde_json::Value;

use crate::llm::{collapse_whitespace, parse_agent_messages, parse_json_object, GenerationProfile, TextGenerator};
use crate::reply::TurnContext;

const NATURALIZER_TRANSCRIPT_LINES: usize = 16;

/// Result of one rewrite pass. `changed` compares normalized text, so a
/// punctuation-only edit does not count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Naturalized {
    pub text: String,
    pub changed: bool,
    pub violation: Option<RoleViolation>,
}

impl Naturalized {
    fn unchanged(text: String) -> Self {
        Self {
            text,
            changed: false,
            violation: None,
        }
    }
}

fn role_scope(role: Role) -> &'static str {
    match role {
        Role::Qa => "QA scope: evidence-first containment and validation. Urgent but collaborative.",
        Role::Ba => "BA scope: business urgency, sequencing, ETA, stakeholder communication. Do not ask implementation detail.",
        _ => "Tech Lead scope: risk trade-offs, rollback/monitoring gates, and explicit execution decisions.",
    }
}

/// Rewrites a draft into a conversational chat bubble. Without a generator,
/// or on any failure, the draft passes through unchanged.
pub struct Naturalizer {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Naturalizer {
    pub fn new(generator: Option<Arc<dyn TextGenerator>>) -> Self {
        Self { generator }
    }

    pub fn disabled() -> Self {
        Self { generator: None }
    }

    pub fn system_prompt(role: Role) -> String {
        [
            "You rewrite one teammate chat bubble in a live production-incident simulation.",
            "Goal: keep the original intent and pressure, but sound natural and human, not robotic.",
            "Keep candidate focused on incident execution; no casual chat.",
            role_scope(role),
            "Return ONLY JSON with exact shape:",
            "{\"message\":\"...\",\"role_violation\":\"none|qa_scope_drift|ba_scope_drift|tech_lead_scope_drift\"}",
            "message rules: single short chat bubble, 1-2 sentences, max 45 words, one focused question at most.",
            "Never use label-list style like 'Urgent:', 'Root cause:', 'Containment:', 'Action now:', 'Main follow-up:'.",
            "No markdown. No bullet points. No prose outside JSON.",
        ]
        .join(" ")
    }

    pub fn input_text(turn: &TurnContext, draft: &str, focus: Option<&FocusDecision>) -> String {
        let latest = turn.participant_text().trim();
        let nudge = focus.map(|f| f.nudge.trim()).unwrap_or_default();
        let transcript = turn.recent_lines(NATURALIZER_TRANSCRIPT_LINES);

        let mut lines = vec![
            format!("Role: {}", turn.role),
            format!("Draft message: {draft}"),
            format!(
                "Candidate latest message: {}",
                if latest.is_empty() { "(none)" } else { latest }
            ),
            format!(
                "Focus classification: {}",
                focus.map(|f| f.focus.as_str()).unwrap_or("unknown")
            ),
        ];
        if !nudge.is_empty() {
            lines.push(format!("Focus nudge hint: {nudge}"));
        }
        lines.push(format!("Workstream summary: {}", turn.workstream.summary_line()));
        lines.push("Recent transcript:".to_string());
        lines.push(if transcript.is_empty() { "(none)".to_string() } else { transcript });
        lines.join("\n")
    }

    pub async fn naturalize(&self, turn: &TurnContext, draft: &str, focus: Option<&FocusDecision>) -> Naturalized {
        let original = collapse_whitespace(draft);
        let Some(generator) = &self.generator else {
            return Naturalized::unchanged(original);
        };
        if original.is_empty() {
            return Naturalized::unchanged(original);
        }

        let raw = match generator
            .generate(
                &Self::system_prompt(turn.role),
                &Self::input_text(turn, &original, focus),
                GenerationProfile::NATURALIZER,
            )
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    error = %e,
                    "naturalizer failed, keeping draft"
                );
                return Naturalized::unchanged(original);
            }
        };

        let parsed = parse_json_object(&raw);
        let mut rewritten = parsed
            .as_ref()
            .and_then(|obj| obj.get("message"))
            .and_then(Value::as_str)
            .map(collapse_whitespace)
            .unwrap_or_default();
        let violation = parsed
            .as_ref()
            .and_then(|obj| obj.get("role_violation"))
            .and_then(Value::as_str)
            .and_then(RoleViolation::parse);
        if rewritten.is_empty() {
            rewritten = parse_agent_messages(&raw)
                .first()
                .map(|m| collapse_whitespace(m))
                .unwrap_or_default();
        }
        if rewritten.is_empty() {
            return Naturalized::unchanged(original);
        }

        Naturalized {
            changed: normalize_text(&rewritten) != normalize_text(&original),
            text: rewritten,
            violation,
        }
    }
}
