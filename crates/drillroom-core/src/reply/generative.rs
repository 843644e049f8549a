use std::sync::Arc;

use async_trait::async_trait;
use drillroom_schema::{FocusDecision, ReplySource, Role};

use super::{Draft, ReplyStage, TurnContext, TurnTrigger};
use crate::fact_sheet::IncidentBrief;
use crate::llm::{parse_agent_messages, GenerationProfile, TextGenerator};
use crate::persona::{playbook_cue, PersonaCatalog, PersonaPrompts};
use crate::repetition::RepetitionGuard;

fn or_none(text: String) -> String {
    if text.trim().is_empty() {
        "(none)".to_string()
    } else {
        text
    }
}

/// First stage of the chain: a persona-voiced draft from the reply model.
pub struct GenerativeStage {
    generator: Arc<dyn TextGenerator>,
    catalog: Arc<PersonaCatalog>,
    prompts: Arc<PersonaPrompts>,
    brief: Arc<IncidentBrief>,
    guard: Arc<RepetitionGuard>,
}

impl GenerativeStage {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        catalog: Arc<PersonaCatalog>,
        prompts: Arc<PersonaPrompts>,
        brief: Arc<IncidentBrief>,
        guard: Arc<RepetitionGuard>,
    ) -> Self {
        Self {
            generator,
            catalog,
            prompts,
            brief,
            guard,
        }
    }

    /// `None` for roles without a persona card.
    pub fn system_prompt(&self, turn: &TurnContext, focus: &FocusDecision) -> Option<String> {
        let role = turn.role;
        let persona = self.catalog.agent(role)?;
        let company = &self.catalog.company;
        let drifting = focus.is_drifting();
        let nudge = focus.nudge.trim();
        let role_prompt = self.prompts.for_role(role).trim();
        let global_prompt = self.prompts.global.trim();

        let mut lines: Vec<String> = vec![
            format!("You are {} at {}.", persona.role, company.company),
            format!("Company business: {}. Product: {}.", company.business, company.product),
            format!("Incident context: {}.", company.incident),
            format!("Business pressure: {}.", company.feature_pressure),
            format!("Audience: {}.", self.catalog.audience.audience),
            format!("Voice and style: {}. {}.", persona.voice, persona.style),
            format!("Communication constraints: {}; {}.", persona.format, persona.length),
        ];
        let mut push = |line: &str| lines.push(line.to_string());

        push("Reply like a real teammate under pressure, not a robotic assistant.");
        push("Write like a natural Slack teammate message, not a status report.");
        push("Avoid label format such as 'Urgent:', 'Root cause:', 'Containment:', 'Action now:'.");
        push("Avoid semicolon-chained checklist style.");
        push("Use collaborative language (we/us) and sound like active incident collaboration.");
        push("Avoid interview/test phrasing such as: 'what do you do first', 'state', 'choose now', 'give me'.");
        push("You are not allowed to use fixed scripts or repeat canned lines.");
        push("Use role intent + recent transcript to adapt naturally.");
        if drifting {
            push("Candidate latest message is off-topic or mixed. Give a brief acknowledgement, then immediately nudge back to incident execution.");
            push("Do not continue casual chat.");
            push("When off-topic/mixed, return exactly one short message.");
        } else {
            push("Candidate is on-task or unknown-focus. Continue incident collaboration.");
        }
        if !nudge.is_empty() {
            lines.push(format!("Preferred nudge direction: {nudge}"));
        }
        let mut push = |line: &str| lines.push(line.to_string());
        push("If an orchestrator cue is provided, treat it as guidance, not a strict script.");
        push("When candidate asks for clarification, answer with 1-2 concrete facts from the Incident Fact Pack first.");
        push("If a requested detail is not in Incident Fact Pack, say it is not confirmed yet and propose the next validation step.");
        push("If candidate did not request details, do not dump multiple metrics or IDs in one turn.");

        match role {
            Role::TechLead => {
                push("As Tech Lead, always anchor your question to current incident context and one concrete workstream item.");
                push("Tech Lead should sound calm but demanding, and always build on QA/BA context.");
                push("When possible, target one unresolved item from: containment, validation, prioritization, rollback, monitoring, data_correction.");
            }
            Role::Qa => {
                push("Keep your question tied to the active incident and current thread context.");
                push("QA should sound evidence-driven, urgent, and collaborative.");
                push("QA must focus on incident evidence, reproduction, and validation signals; do not ask rollout governance or stakeholder communication questions.");
                push("Do not make final technical decisions for the candidate; force explicit candidate decision instead.");
            }
            Role::Ba => {
                push("Keep your question tied to the active incident and current thread context.");
                push("BA should sound business-pressure aware, practical, and stakeholder-focused.");
                push("BA must stay at business level: ask only sequencing, ETA, stakeholder impact, and communication commitments.");
                push("BA must not ask for feature-flag names, rollback threshold numbers, txCount spikes, duplicate_count metrics, or implementation details.");
                push("Do not make final technical decisions for the candidate; force explicit candidate decision instead.");
            }
            Role::Participant | Role::System => {}
        }

        if turn.needs_transition() {
            push("Candidate appears stuck or silent. First acknowledge briefly, then transition into the next question naturally.");
        } else {
            push("Keep the flow natural and forward-moving.");
        }
        push("Avoid abrupt jumps between topics.");
        push("Return ONLY valid JSON with this exact shape: {\"messages\":[\"...\",\"...\"]}.");
        push("messages must contain exactly 1 short chat bubble.");
        push("When candidate asks a direct question, answer it first in plain terms before any follow-up.");
        push("Do not force a question in every response.");
        push("Never repeat your own previous message verbatim. If overlap happens, rephrase and advance the thread.");
        push("Ask at most one focused question when needed.");
        push("No markdown, no code fences, no prose outside JSON.");
        push("Do not use bullet points.");
        push("Keep it short and natural (target 18-35 words, hard max 55 words).");

        if !role_prompt.is_empty() {
            lines.push(format!("Runtime role prompt:\n{role_prompt}"));
        }
        if !global_prompt.is_empty() {
            lines.push(format!("Runtime global guardrails:\n{global_prompt}"));
        }
        Some(lines.join(" "))
    }

    pub fn input_text(&self, turn: &TurnContext, focus: &FocusDecision) -> String {
        let role = turn.role;
        let ws = &turn.workstream;
        let missing = ws.missing_for(role);
        let missing_text = if missing.is_empty() {
            "none".to_string()
        } else {
            missing.iter().map(|i| i.as_str()).collect::<Vec<_>>().join(", ")
        };
        let nudge = focus.nudge.trim();

        let mut lines = Vec::new();
        match &turn.trigger {
            TurnTrigger::Beat(cue) => {
                lines.push(format!("Orchestrator cue intent: {}", cue.intent));
                if let Some(cue_text) = playbook_cue(&cue.intent) {
                    lines.push(format!("Playbook guidance: {cue_text}"));
                }
            }
            TurnTrigger::Direct { text } => lines.push(format!("Candidate message: {}", text.trim())),
        }
        lines.push(format!("Candidate focus classification: {}.", focus.focus.as_str()));
        lines.push(format!(
            "Focus nudge hint: {}",
            if nudge.is_empty() { "(none)" } else { nudge }
        ));
        lines.push(format!("Session workstream summary: {}", ws.summary_line()));
        lines.push(format!("Role-scoped unresolved items: {missing_text}"));
        lines.push(format!("Candidate silence seconds: {}", ws.participant_silence_sec));
        lines.push(format!("Seconds since last agent prompt: {}", ws.agent_prompt_age_sec));
        lines.push(format!(
            "Latest candidate note: {}",
            if ws.latest_participant.trim().is_empty() {
                "(none yet)"
            } else {
                ws.latest_participant.as_str()
            }
        ));
        lines.push("Incident Fact Pack (ground truth for clarifications):".to_string());
        lines.push(self.brief.fact_pack(role));
        lines.push("Role-focused thread history:".to_string());
        lines.push(or_none(turn.role_history_lines()));
        if role == Role::TechLead {
            lines.push("Candidate history with QA + BA:".to_string());
            lines.push(or_none(turn.cross_role_lines()));
        }
        lines.push("Recent session transcript:".to_string());
        lines.push(or_none(turn.recent_lines(super::RECENT_CONTEXT_LINES)));
        lines.push(
            "Respond to the latest candidate message naturally. If needed, end with one focused follow-up."
                .to_string(),
        );
        lines.join("\n")
    }
}

#[async_trait]
impl ReplyStage for GenerativeStage {
    fn name(&self) -> &'static str {
        "generative"
    }

    async fn draft(&self, turn: &TurnContext, focus: &FocusDecision) -> Option<Draft> {
        let system = self.system_prompt(turn, focus)?;
        let input = self.input_text(turn, focus);
        let raw = match self.generator.generate(&system, &input, GenerationProfile::REPLY).await {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    error = %e,
                    "reply generation failed, falling back"
                );
                return None;
            }
        };

        let candidates = parse_agent_messages(&raw);
        let offered = candidates.len();
        let kept = self.guard.filter_candidates(&turn.session_id, turn.role, candidates);
        if kept.is_empty() {
            tracing::debug!(
                session_id = %turn.session_id,
                role = %turn.role,
                offered,
                "no usable generative candidate"
            );
        }
        kept.into_iter().next().map(|text| Draft {
            text,
            source: ReplySource::Generative,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::Result;
    use drillroom_memory::{TranscriptConfig, TranscriptStore};
    use drillroom_schema::{FocusLabel, Message, MessageKind};

    use super::*;
    use crate::reply::test_support::{beat_cue, participant, turn};

    struct Scripted {
        reply: Result<String, String>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl Scripted {
        fn ok(text: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: Ok(text.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                reply: Err("openai api error (503) [retryable]".into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, system: &str, user: &str, _profile: GenerationProfile) -> Result<String> {
            self.seen.lock().unwrap().push((system.into(), user.into()));
            self.reply.clone().map_err(anyhow::Error::msg)
        }
    }

    fn stage(store: &Arc<TranscriptStore>, generator: Arc<Scripted>) -> GenerativeStage {
        GenerativeStage::new(
            generator,
            Arc::new(PersonaCatalog::default()),
            Arc::new(PersonaPrompts {
                global: "Stay in character.".into(),
                ..Default::default()
            }),
            Arc::new(IncidentBrief::default()),
            Arc::new(RepetitionGuard::new(Arc::clone(store), 6, 8)),
        )
    }

    #[tokio::test]
    async fn takes_first_usable_candidate() {
        let store = Arc::new(TranscriptStore::new(TranscriptConfig::default()));
        store.append(Message::new("s1", Role::Qa, MessageKind::Question, "Which log line proves it?"));
        let generator = Scripted::ok(r#"{"messages":["Which log line proves it?","Can you restate?","Which replay test do we run first?"]}"#);
        let stage = stage(&store, generator);
        let t = turn(&store, Role::Qa, TurnTrigger::Direct { text: "guard is in".into() });

        let draft = stage.draft(&t, &FocusDecision::unknown()).await.unwrap();
        assert_eq!(draft.text, "Which replay test do we run first?");
        assert_eq!(draft.source, ReplySource::Generative);
    }

    #[tokio::test]
    async fn upstream_failure_yields_nothing() {
        let store = Arc::new(TranscriptStore::new(TranscriptConfig::default()));
        let stage = stage(&store, Scripted::failing());
        let t = turn(&store, Role::Ba, TurnTrigger::Direct { text: "eta?".into() });
        assert!(stage.draft(&t, &FocusDecision::unknown()).await.is_none());
    }

    #[tokio::test]
    async fn beat_prompt_carries_cue_and_context() {
        let store = Arc::new(TranscriptStore::new(TranscriptConfig::default()));
        participant(&store, "hotfix first, VIP later", Some(Role::Ba));
        let generator = Scripted::ok("plain text reply");
        let stage = stage(&store, Arc::clone(&generator));
        let t = turn(
            &store,
            Role::TechLead,
            TurnTrigger::Beat(beat_cue("s1", 3, Role::TechLead, "tech_risk_probe")),
        );
        let focus = FocusDecision {
            focus: FocusLabel::OnTask,
            nudge: String::new(),
        };

        let draft = stage.draft(&t, &focus).await.unwrap();
        assert_eq!(draft.text, "plain text reply");

        let seen = generator.seen.lock().unwrap();
        let (system, user) = &seen[0];
        assert!(system.starts_with("You are Tech Lead (Payments Platform) at DayOne.ai."));
        assert!(system.contains("data_correction"));
        assert!(system.ends_with("Runtime global guardrails:\nStay in character."));
        assert!(user.starts_with("Orchestrator cue intent: tech_risk_probe\nPlaybook guidance: Demand rollback trigger"));
        assert!(user.contains("Candidate focus classification: on_task."));
        assert!(user.contains("Latest candidate note: hotfix first, VIP later"));
        assert!(user.contains("Candidate history with QA + BA:\nparticipant: hotfix first, VIP later"));
        assert!(user.contains("Incident ID: INC-PAY-2201"));
    }
}
