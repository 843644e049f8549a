use std::collections::HashSet;
use std::sync::Arc;

use drillroom_memory::{normalize_text, TranscriptStore};
use drillroom_schema::{Message, Role};

use crate::llm::collapse_whitespace;
use crate::reply::{empty_repair_line, TurnContext, TurnTrigger};

/// Filler phrases that stall the conversation instead of advancing it.
/// Matched against normalized text.
const STALL_PATTERNS: [&str; 5] = [
    "quick second to process",
    "restate your last point",
    "can you restate",
    "can you clarify your decision",
    "i need a second",
];

const BREAKER_QUOTE_MAX: usize = 80;

/// Empty text counts as a stall.
pub fn is_stall(text: &str) -> bool {
    let normalized = normalize_text(text);
    normalized.is_empty() || STALL_PATTERNS.iter().any(|p| normalized.contains(p))
}

/// Drops candidates whose normalized form was already seen in this turn,
/// keeping first occurrences in order.
pub fn dedup_within_turn(candidates: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| {
            let key = normalize_text(c);
            !key.is_empty() && seen.insert(key)
        })
        .collect()
}

fn shorten(quote: &str) -> String {
    let collapsed = collapse_whitespace(quote);
    if collapsed.chars().count() > BREAKER_QUOTE_MAX {
        let cut: String = collapsed.chars().take(BREAKER_QUOTE_MAX).collect();
        format!("{cut}...")
    } else {
        collapsed
    }
}

/// Canned substitute for a reply that would repeat the role verbatim. With
/// a participant question it quotes it back; beat turns get an unquoted
/// restatement of the same context.
pub fn duplicate_breaker(role: Role, quote: Option<&str>) -> String {
    match quote.map(shorten).filter(|q| !q.is_empty()) {
        Some(q) => match role {
            Role::Qa => format!(
                "On your question \"{q}\", quick context: duplicate charges come from idempotency not being enforced before gateway charge."
            ),
            Role::Ba => format!(
                "On \"{q}\", business context is VIP urgency versus incident risk; we need sequencing and ETA that stakeholders can trust."
            ),
            Role::TechLead => format!(
                "On \"{q}\", we are balancing safe containment, rollback readiness, and release sequencing under production risk."
            ),
            _ => format!("On \"{q}\", here is the key context we should align on before the next step."),
        },
        None => match role {
            Role::Qa => "Quick context before we move on: duplicate charges come from idempotency not being enforced before gateway charge.".to_string(),
            Role::Ba => "Stepping back to the business view: VIP urgency versus incident risk, and we need sequencing and ETA that stakeholders can trust.".to_string(),
            Role::TechLead => "Stepping back: we are balancing safe containment, rollback readiness, and release sequencing under production risk.".to_string(),
            _ => "Here is the key context we should align on before the next step.".to_string(),
        },
    }
}

/// Cross-turn repetition checks against the live transcript.
pub struct RepetitionGuard {
    store: Arc<TranscriptStore>,
    own_history_lookback: usize,
    breaker_lookback: usize,
}

impl RepetitionGuard {
    pub fn new(store: Arc<TranscriptStore>, own_history_lookback: usize, breaker_lookback: usize) -> Self {
        Self {
            store,
            own_history_lookback,
            breaker_lookback,
        }
    }

    /// Generative candidates that survive intra-turn dedup, the stall filter
    /// and the own-history check (no time window).
    pub fn filter_candidates(&self, session_id: &str, role: Role, candidates: Vec<String>) -> Vec<String> {
        let own: HashSet<String> = self
            .store
            .own_recent_texts(session_id, role, self.own_history_lookback)
            .iter()
            .map(|t| normalize_text(t))
            .filter(|t| !t.is_empty())
            .collect();

        dedup_within_turn(candidates)
            .into_iter()
            .filter(|c| !is_stall(c))
            .filter(|c| !own.contains(&normalize_text(c)))
            .collect()
    }

    /// Replaces `text` with a duplicate breaker when the role said the same
    /// thing within the lookback and duplicate window. The flag is true when
    /// a substitution happened. The lookback never falls below the one the
    /// transcript's final duplicate check uses, and a breaker that would
    /// itself repeat gives way to the next variant.
    pub fn break_repeat(&self, turn: &TurnContext, text: &str) -> (String, bool) {
        let lookback = self.breaker_lookback.max(self.store.duplicate_lookback());
        let Some(previous) = self.recent_duplicate(turn, text, lookback) else {
            return (text.to_string(), false);
        };
        let quote = match &turn.trigger {
            TurnTrigger::Direct { text, .. } => Some(text.as_str()),
            TurnTrigger::Beat(_) => None,
        };
        tracing::info!(
            session_id = %turn.session_id,
            role = %turn.role,
            duplicate_of = %previous.id,
            "reply repeats recent role message, using duplicate breaker"
        );

        let unquoted = duplicate_breaker(turn.role, None);
        let repair = empty_repair_line(turn.role);
        let candidates = [
            duplicate_breaker(turn.role, quote),
            unquoted.clone(),
            repair.to_string(),
        ];
        let breaker = candidates
            .into_iter()
            .find(|candidate| self.recent_duplicate(turn, candidate, lookback).is_none())
            .unwrap_or_else(|| format!("{repair} {unquoted}"));
        (breaker, true)
    }

    fn recent_duplicate(&self, turn: &TurnContext, text: &str, lookback: usize) -> Option<Message> {
        self.store
            .find_recent_duplicate(&turn.session_id, turn.role, text, lookback)
    }
}

#[cfg(test)]
mod tests {
    use drillroom_memory::TranscriptConfig;
    use drillroom_schema::MessageKind;

    use super::*;

    #[test]
    fn stall_phrases_and_empty_text() {
        assert!(is_stall(""));
        assert!(is_stall("  ?! "));
        assert!(is_stall("Give me a quick second to process that."));
        assert!(is_stall("Can you RESTATE your last point?"));
        assert!(!is_stall("What rollback trigger do we lock?"));
    }

    #[test]
    fn intra_turn_dedup_keeps_first() {
        let out = dedup_within_turn(vec![
            "Ship the guard.".into(),
            "ship the GUARD".into(),
            "...".into(),
            "Then monitor.".into(),
        ]);
        assert_eq!(out, vec!["Ship the guard.", "Then monitor."]);
    }

    #[test]
    fn breaker_quotes_and_truncates() {
        let long = "word ".repeat(40);
        let text = duplicate_breaker(Role::Qa, Some(&long));
        assert!(text.starts_with("On your question \""));
        assert!(text.contains("...\", quick context"));

        let ba = duplicate_breaker(Role::Ba, Some("  hi \n there "));
        assert!(ba.starts_with("On \"hi there\", business context"));

        let beat = duplicate_breaker(Role::TechLead, None);
        assert!(!beat.contains('"'));
    }

    #[test]
    fn candidates_repeating_own_history_are_dropped() {
        let store = Arc::new(TranscriptStore::new(TranscriptConfig::default()));
        store.append(Message::new("s1", Role::Qa, MessageKind::Question, "Which log proves it?"));
        store.append(Message::new("s1", Role::Ba, MessageKind::Question, "What ETA?"));
        let guard = RepetitionGuard::new(store, 6, 8);

        let out = guard.filter_candidates(
            "s1",
            Role::Qa,
            vec![
                "which log proves it".into(),
                "What ETA?".into(),
                "I need a second".into(),
            ],
        );
        // the BA line belongs to another role, so QA may still say it
        assert_eq!(out, vec!["What ETA?"]);
    }
}
