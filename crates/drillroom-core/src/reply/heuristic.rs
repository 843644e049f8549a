use std::sync::Arc;

use drillroom_schema::{ReplySource, Role};

use super::{Draft, TurnContext};
use crate::fact_sheet::IncidentBrief;

const SMALL_TALK_OPENERS: [&str; 5] = ["hi", "hello", "hey", "yo", "sup"];
const SMALL_TALK_PHRASES: [&str; 7] = [
    "how are you",
    "how're you",
    "how r you",
    "what's up",
    "whats up",
    "you good",
    "u good",
];
const SHARE_VERBS: [&str; 6] = ["please send", "send me", "share", "provide", "give me", "need"];
const SHARE_OBJECTS: [&str; 8] = ["endpoint", "duplicate", "count", "sample", "order", "tx", "id", "log"];
const CLARIFY: [&str; 5] = ["clarify", "what do you mean", "can you explain", "not clear", "elaborate"];
const DESCRIBE: [&str; 5] = [
    "describe the problem",
    "what is the problem",
    "what problem",
    "what happened",
    "what issue",
];
const QA_REMEDIATION: [&str; 7] = [
    "idempot",
    "guard",
    "chargegateway",
    "existing result",
    "blocked duplicate",
    "duplicate_blocked",
    "verification",
];
const QA_EVIDENCE: [&str; 5] = ["repro", "steps", "log", "trace", "test"];
const TECH_REMEDIATION: [&str; 9] = [
    "initial remediation",
    "idempot",
    "guard",
    "chargegateway",
    "existing result",
    "blocked duplicate",
    "duplicate_blocked",
    "retry path",
    "verification",
];

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn contains_any(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn starts_with_word(text: &str, words: &[&str]) -> bool {
    words.iter().any(|w| {
        text.strip_prefix(w)
            .map(|rest| !rest.starts_with(is_word_char))
            .unwrap_or(false)
    })
}

/// Phrase occurrence bounded by non-word characters on both sides.
fn contains_bounded(text: &str, phrases: &[&str]) -> bool {
    phrases.iter().any(|phrase| {
        text.match_indices(phrase).any(|(at, _)| {
            let before_ok = !text[..at].ends_with(is_word_char);
            let after_ok = !text[at + phrase.len()..].starts_with(is_word_char);
            before_ok && after_ok
        })
    })
}

/// `intent:<name>` tag carried by beat seeds.
fn seed_intent(text: &str) -> Option<&str> {
    let start = text.find("intent:")? + "intent:".len();
    let rest = &text[start..];
    let end = rest
        .find(|c: char| !(c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_'))
        .unwrap_or(rest.len());
    Some(&rest[..end]).filter(|s| !s.is_empty())
}

fn tx_suffix(brief: &IncidentBrief, prefix: &str, close: &str) -> String {
    let ids = brief.sample_tx_ids();
    if ids.is_empty() {
        String::new()
    } else {
        format!("{prefix}{}{close}", ids.join(", "))
    }
}

/// Deterministic reply parameterized by the fact sheet. Never empty and
/// never fails, so it terminates every fallback chain.
pub fn heuristic_reply(role: Role, input: &str, brief: &IncidentBrief) -> String {
    let msg = input.to_lowercase();
    let intent = seed_intent(&msg);
    let duplicates = brief.duplicate_orders_text();
    let loss = brief.loss_text();
    let sample_order = brief.sample_order();
    let cause = brief.cause();
    let endpoint = brief.endpoint_hint();

    let small_talk = starts_with_word(&msg, &SMALL_TALK_OPENERS) || contains_bounded(&msg, &SMALL_TALK_PHRASES);
    if small_talk {
        match role {
            Role::Qa => {
                return format!(
                    "Doing okay, thanks. We still have an active duplicate-charge incident in {endpoint}; can we lock your next containment step now?"
                )
            }
            Role::Ba => {
                return "All good, thanks. We are still balancing incident risk and VIP timeline pressure; what sequencing/ETA should I communicate?".to_string()
            }
            Role::TechLead => {
                return "I am good. Let us stay focused on the incident: confirm your next technical action plus rollback/monitoring guardrails.".to_string()
            }
            _ => {}
        }
    }

    if role == Role::Qa && contains_any(&msg, &SHARE_VERBS) && contains_any(&msg, &SHARE_OBJECTS) {
        let tx = tx_suffix(brief, "; txIds: ", "");
        return format!(
            "Sure. Current known facts: affected flow is {endpoint}; duplicate count estimate is {duplicates} in the recent window; confirmed sample order is {sample_order}{tx}. I do not have a second confirmed order ID yet, I am pulling the next one from reconciliation logs now."
        );
    }

    if contains_any(&msg, &CLARIFY) {
        match role {
            Role::Qa => {
                return format!(
                    "Sure. We already saw duplicates on {sample_order}, and current estimate is {duplicates} affected orders. I need your first containment action plus one validation signal."
                )
            }
            Role::Ba => {
                return format!(
                    "Sure. We have a live P0 with about {duplicates} impacted orders and ~${loss} estimated exposure. I need sequencing and ETA for stakeholder update."
                )
            }
            Role::TechLead => {
                return format!(
                    "Sure. Current hypothesis is {cause}. I need your concrete decision path with rollback and monitoring so we can move safely."
                )
            }
            _ => {}
        }
    }

    if contains_any(&msg, &DESCRIBE) {
        match role {
            Role::Qa => {
                return format!(
                    "We have duplicate payment charges in production. Logs show two successful tx for {sample_order}, and likely cause is {cause}."
                )
            }
            Role::Ba => {
                return format!(
                    "We have a production double-charge incident ({duplicates} orders affected so far) while business is pushing VIP discount launch today."
                )
            }
            Role::TechLead => {
                return "Current case: duplicate charges in production due to idempotency gap, with concurrent pressure to ship VIP discount. I want containment first, then controlled release sequencing.".to_string()
            }
            _ => {}
        }
    }

    if intent.is_none() && msg.contains('?') {
        match role {
            Role::Qa => {
                return format!(
                    "Known now: about {duplicates} impacted orders, confirmed example {sample_order}, and likely cause is {cause}. I can share repro/log detail next if helpful."
                )
            }
            Role::Ba => {
                return format!(
                    "Business context: VIP launch pressure is active while P0 risk is live (~${loss} estimated exposure). I need sequencing and ETA we can communicate confidently."
                )
            }
            Role::TechLead => {
                return "Technical context: likely idempotency gap before charge call. I need a concrete path with containment first, then rollback and monitoring safeguards.".to_string()
            }
            _ => {}
        }
    }

    match intent {
        Some("qa_open_p0") => {
            return "We need immediate containment for duplicate charges. What first action should we align on?".to_string()
        }
        Some("qa_evidence_pressure") => {
            return format!(
                "Before we call this stable, what concrete validation signal should we use? One option is: {}.",
                brief.primary_validation()
            )
        }
        Some("ba_vip_interrupt") => {
            return "Leadership needs sequencing and ETA. How should we frame hotfix vs VIP rollout?".to_string()
        }
        Some("tech_initial_remediation") => {
            return "Given current incident context, what remediation path should we take first and why?".to_string()
        }
        Some("tech_prioritization_challenge") => {
            return "We need a priority call now. Should we execute hotfix first or VIP first?".to_string()
        }
        Some("tech_risk_probe") => {
            return "Let us lock operational safety. What rollback trigger, monitoring signal, and correction path do we use?".to_string()
        }
        Some("tech_final_challenge") => {
            return "Before close, what is our final release decision and risk tradeoff?".to_string()
        }
        _ => {}
    }

    match role {
        Role::Qa => {
            if contains_any(&msg, &QA_REMEDIATION) {
                let tx = tx_suffix(brief, " (latest duplicate txIds: ", ")");
                format!(
                    "That remediation direction is solid. Fastest validation is {}; then confirm {} and spot-check {sample_order}{tx}.",
                    brief.primary_validation(),
                    brief.secondary_validation()
                )
            } else if contains_any(&msg, &QA_EVIDENCE) {
                format!(
                    "For fastest confidence, start with {}. I can also share exact replay-test steps for {sample_order} if you want.",
                    brief.primary_validation()
                )
            } else {
                format!(
                    "Current state: duplicate charging is active in {endpoint}, with about {duplicates} affected orders. Let us align on one containment move and one validation signal."
                )
            }
        }
        Role::Ba => {
            if contains_any(&msg, &["defer", "later", "after hotfix"]) {
                "If VIP is deferred, what ETA and stakeholder message should we commit right now?".to_string()
            } else if contains_any(&msg, &["vip first", "ship vip"]) {
                "If VIP is prioritized, what guardrail keeps customer risk controlled?".to_string()
            } else {
                "How should we sequence hotfix and VIP so business communication stays credible?".to_string()
            }
        }
        Role::TechLead => {
            if contains_any(&msg, &TECH_REMEDIATION) {
                format!(
                    "Good direction. Keep idempotency guard as first containment. Next lock one rollback trigger and one monitoring signal before deploy; rollback option: {}, monitoring signal: {}.",
                    brief.primary_rollback(),
                    brief.primary_validation()
                )
            } else if msg.contains("hotfix first") {
                "Okay, with hotfix-first, what rollback and monitoring plan should we lock now?".to_string()
            } else if msg.contains("vip first") {
                "If VIP-first, what immediate technical control prevents duplicate-charge recurrence?".to_string()
            } else {
                format!(
                    "Current technical priority is containment-first for {sample_order}. Please state the deploy guardrail (rollback trigger + monitoring signal) to make this safe."
                )
            }
        }
        Role::Participant | Role::System => {
            "Can we align on the next safest step and the risk we are accepting?".to_string()
        }
    }
}

/// Terminal stage of the reply chain.
#[derive(Clone)]
pub struct HeuristicStage {
    brief: Arc<IncidentBrief>,
}

impl HeuristicStage {
    pub fn new(brief: Arc<IncidentBrief>) -> Self {
        Self { brief }
    }

    pub fn compose(&self, turn: &TurnContext) -> Draft {
        Draft {
            text: heuristic_reply(turn.role, &turn.trigger.input(), &self.brief),
            source: ReplySource::Heuristic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn brief() -> IncidentBrief {
        IncidentBrief::default()
    }

    #[test]
    fn small_talk_acknowledges_and_redirects() {
        let qa = heuristic_reply(Role::Qa, "Hey! how are you?", &brief());
        assert!(qa.starts_with("Doing okay, thanks."));
        assert!(qa.contains("containment step"));

        let tl = heuristic_reply(Role::TechLead, "all good, u good?", &brief());
        assert!(tl.starts_with("I am good."));

        // "history" starts with "hi" but is not a greeting
        let not_greeting = heuristic_reply(Role::Ba, "history of this bug", &brief());
        assert!(!not_greeting.starts_with("All good"));
    }

    #[test]
    fn beat_seed_maps_to_intent_line() {
        let seed = "intent:qa_open_p0 role:qa anchor:1 transition:0 reason:on_time window:0-20 planned:0";
        assert_eq!(
            heuristic_reply(Role::Qa, seed, &brief()),
            "We need immediate containment for duplicate charges. What first action should we align on?"
        );
        let seed = "intent:qa_evidence_pressure role:qa anchor:0 transition:1 reason:defer_limit_reached window:200-260 planned:230";
        assert!(heuristic_reply(Role::Qa, seed, &brief())
            .ends_with("One option is: no new duplicate-charge log in rolling window."));
    }

    #[test]
    fn qa_share_request_lists_facts() {
        let mut b = brief();
        b.signals.latest_example_tx_ids = vec!["tx_1".into(), "tx_2".into()];
        let reply = heuristic_reply(Role::Qa, "Can you share a sample order?", &b);
        assert!(reply.contains("duplicate count estimate is 17"));
        assert!(reply.contains("a recent order; txIds: tx_1, tx_2."));
    }

    #[test]
    fn question_without_intent_gets_context() {
        let reply = heuristic_reply(Role::Ba, "how bad is it?", &brief());
        assert!(reply.contains("~$1840 estimated exposure"));
    }

    #[test]
    fn role_keyword_branches() {
        assert_eq!(
            heuristic_reply(Role::Ba, "let's defer VIP", &brief()),
            "If VIP is deferred, what ETA and stakeholder message should we commit right now?"
        );
        assert!(heuristic_reply(Role::TechLead, "add an idempotency guard", &brief())
            .contains("rollback option: revert payment flow patch"));
        assert!(heuristic_reply(Role::Qa, "we ship the guard", &brief()).starts_with("That remediation direction is solid."));
        assert_eq!(
            heuristic_reply(Role::System, "", &brief()),
            "Can we align on the next safest step and the risk we are accepting?"
        );
    }

    #[test]
    fn never_empty() {
        for role in Role::PERSONAS {
            for input in ["", "   ", "?", "intent:", "intent:unknown_beat", "🙂"] {
                assert!(!heuristic_reply(role, input, &brief()).trim().is_empty());
            }
        }
    }

    #[test]
    fn word_boundaries() {
        assert!(contains_bounded("so what's up", &["what's up"]));
        assert!(!contains_bounded("you goods", &["you good"]));
        assert!(starts_with_word("yo team", &["yo"]));
        assert!(!starts_with_word("your call", &["yo"]));
        assert_eq!(seed_intent("intent:tech_risk_probe role:tech_lead"), Some("tech_risk_probe"));
        assert_eq!(seed_intent("intent: nothing"), None);
    }
}
