use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Sampling settings of one generation stage. Reasoning models ignore the
/// temperature and get `reasoning_max_tokens` instead of `max_tokens`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationProfile {
    pub temperature: f32,
    pub max_tokens: u32,
    pub reasoning_max_tokens: u32,
}

impl GenerationProfile {
    pub const FOCUS: Self = Self {
        temperature: 0.1,
        max_tokens: 120,
        reasoning_max_tokens: 260,
    };

    pub const REPLY: Self = Self {
        temperature: 0.3,
        max_tokens: 180,
        reasoning_max_tokens: 300,
    };

    pub const NATURALIZER: Self = Self {
        temperature: 0.2,
        max_tokens: 140,
        reasoning_max_tokens: 240,
    };
}

/// External text-generation capability as the pipeline stages see it: a
/// system prompt and one user turn in, raw text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, system: &str, user: &str, profile: GenerationProfile) -> Result<String>;
}

/// Collapses every whitespace run to one space and trims.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Finds a JSON object in model output: the whole text, or the span from
/// the first `{` to the last `}`.
pub fn parse_json_object(raw: &str) -> Option<Map<String, Value>> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }
    let mut candidates = vec![text];
    if let (Some(first), Some(last)) = (text.find('{'), text.rfind('}')) {
        if last > first {
            candidates.push(&text[first..=last]);
        }
    }
    candidates.into_iter().find_map(|candidate| {
        match serde_json::from_str::<Value>(candidate) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    })
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Candidate chat bubbles from reply-model output.
///
/// `{"messages":[...]}` yields up to three non-empty entries and a lone
/// `{"message":"..."}` yields one. Output that is not JSON at all is
/// salvaged as a single message; a JSON object with neither key yields
/// nothing.
pub fn parse_agent_messages(raw: &str) -> Vec<String> {
    let text = raw.trim();
    if text.is_empty() {
        return Vec::new();
    }
    let clean = |s: String| s.replace('\r', "").trim().to_string();
    match parse_json_object(text) {
        Some(obj) => {
            if let Some(Value::Array(items)) = obj.get("messages") {
                return items
                    .iter()
                    .map(|v| clean(value_text(v)))
                    .filter(|s| !s.is_empty())
                    .take(3)
                    .collect();
            }
            match obj.get("message").map(value_text).map(clean) {
                Some(single) if !single.is_empty() => vec![single],
                _ => Vec::new(),
            }
        }
        None => vec![clean(text.to_string())],
    }
}
