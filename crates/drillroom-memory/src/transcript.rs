use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use chrono::{Duration, Utc};
use drillroom_schema::{Message, Role};
use serde::{Deserialize, Serialize};

use crate::text::normalize_text;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    /// Global cap across all sessions; the oldest entry is evicted first.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// How many of the newest entries the authoritative duplicate check scans.
    #[serde(default = "default_duplicate_lookback")]
    pub duplicate_lookback: usize,
    #[serde(default = "default_duplicate_window_ms")]
    pub duplicate_window_ms: u64,
}

fn default_max_messages() -> usize {
    500
}

fn default_duplicate_lookback() -> usize {
    40
}

fn default_duplicate_window_ms() -> u64 {
    12_000
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            duplicate_lookback: default_duplicate_lookback(),
            duplicate_window_ms: default_duplicate_window_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    Stored(Message),
    /// A same-role entry with identical normalized text was appended inside
    /// the duplicate window; nothing was written.
    Suppressed { duplicate_of: String },
}

impl AppendOutcome {
    pub fn stored(self) -> Option<Message> {
        match self {
            Self::Stored(message) => Some(message),
            Self::Suppressed { .. } => None,
        }
    }
}

/// Append-only, capped message log shared by every session.
///
/// Entries are immutable once appended. All views return clones in
/// chronological order.
pub struct TranscriptStore {
    entries: Mutex<VecDeque<Message>>,
    config: TranscriptConfig,
}

impl TranscriptStore {
    pub fn new(config: TranscriptConfig) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(config.max_messages.min(1024))),
            config,
        }
    }

    pub fn config(&self) -> &TranscriptConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<Message>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unconditional append used for participant and system entries.
    pub fn append(&self, message: Message) -> Message {
        let mut entries = self.lock();
        self.push_capped(&mut entries, message.clone());
        message
    }

    /// Append with the final duplicate check for persona entries. The check
    /// and the write happen under one lock so two racing turns cannot both
    /// land the same text.
    pub fn append_unique(&self, message: Message) -> AppendOutcome {
        let mut entries = self.lock();
        if let Some(existing) = self.find_duplicate_locked(&entries, &message) {
            tracing::info!(
                session_id = %message.session_id,
                role = %message.role,
                duplicate_of = %existing,
                "duplicate persona message suppressed"
            );
            return AppendOutcome::Suppressed {
                duplicate_of: existing,
            };
        }
        self.push_capped(&mut entries, message.clone());
        AppendOutcome::Stored(message)
    }

    fn push_capped(&self, entries: &mut VecDeque<Message>, message: Message) {
        entries.push_back(message);
        while entries.len() > self.config.max_messages {
            entries.pop_front();
        }
    }

    fn find_duplicate_locked(&self, entries: &VecDeque<Message>, message: &Message) -> Option<String> {
        if !message.role.is_persona() || message.session_id.is_empty() {
            return None;
        }
        let next = normalize_text(&message.text);
        if next.is_empty() {
            return None;
        }
        let window = Duration::milliseconds(self.config.duplicate_window_ms as i64);
        let now = Utc::now();
        entries
            .iter()
            .rev()
            .take(self.config.duplicate_lookback)
            .filter(|prev| prev.session_id == message.session_id && prev.role == message.role)
            .filter(|prev| now.signed_duration_since(prev.timestamp) <= window)
            .find(|prev| normalize_text(&prev.text) == next)
            .map(|prev| prev.id.clone())
    }

    /// Entries `append_unique` scans for an earlier copy.
    pub fn duplicate_lookback(&self) -> usize {
        self.config.duplicate_lookback
    }

    /// Cross-turn guard lookup: the most recent same-role entry of the
    /// session within `lookback` entries and the duplicate window whose
    /// normalized text equals `text`.
    pub fn find_recent_duplicate(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
        lookback: usize,
    ) -> Option<Message> {
        let needle = normalize_text(text);
        if needle.is_empty() {
            return None;
        }
        let window = Duration::milliseconds(self.config.duplicate_window_ms as i64);
        let now = Utc::now();
        let entries = self.lock();
        entries
            .iter()
            .rev()
            .filter(|m| m.session_id == session_id)
            .take(lookback)
            .filter(|m| m.role == role)
            .filter(|m| now.signed_duration_since(m.timestamp) <= window)
            .find(|m| normalize_text(&m.text) == needle)
            .cloned()
    }

    pub fn all(&self) -> Vec<Message> {
        self.lock().iter().cloned().collect()
    }

    pub fn session(&self, session_id: &str) -> Vec<Message> {
        self.lock()
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Last `limit` entries of a session.
    pub fn recent(&self, session_id: &str, limit: usize) -> Vec<Message> {
        let entries = self.lock();
        let mut out: Vec<Message> = entries
            .iter()
            .rev()
            .filter(|m| m.session_id == session_id)
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Entries authored by `role` plus participant entries addressed to it.
    pub fn role_focused(&self, session_id: &str, role: Role, limit: usize) -> Vec<Message> {
        self.filtered_tail(session_id, limit, |m| {
            m.role == role || (m.role == Role::Participant && m.meta.addressed_to == Some(role))
        })
    }

    /// Every participant entry plus the threads of every persona other than
    /// `coordinator`; the coordinating role reads it to stay consistent with
    /// what its peers already asked.
    pub fn cross_role(&self, session_id: &str, coordinator: Role, limit: usize) -> Vec<Message> {
        self.filtered_tail(session_id, limit, |m| {
            if m.role == Role::Participant {
                return true;
            }
            let thread_of = |r: Role| m.role == r || m.meta.addressed_to == Some(r);
            Role::PERSONAS
                .iter()
                .filter(|r| **r != coordinator)
                .any(|r| thread_of(*r))
        })
    }

    fn filtered_tail<F>(&self, session_id: &str, limit: usize, keep: F) -> Vec<Message>
    where
        F: Fn(&Message) -> bool,
    {
        let entries = self.lock();
        let mut out: Vec<Message> = entries
            .iter()
            .rev()
            .filter(|m| m.session_id == session_id && keep(m))
            .take(limit)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Newest entry of the session, whoever wrote it.
    /// Texts `role` wrote among the last `lookback` entries of the session.
    pub fn own_recent_texts(&self, session_id: &str, role: Role, lookback: usize) -> Vec<String> {
        self.recent(session_id, lookback)
            .into_iter()
            .filter(|m| m.role == role)
            .map(|m| m.text)
            .collect()
    }

    /// Removes one session's entries, or everything when `session_id` is
    /// `None`. Returns the number removed.
    pub fn clear(&self, session_id: Option<&str>) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        match session_id {
            Some(id) => entries.retain(|m| m.session_id != id),
            None => entries.clear(),
        }
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::new(TranscriptConfig::default())
    }
}
