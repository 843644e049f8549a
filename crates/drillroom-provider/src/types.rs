use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LlmMessage {
    pub role: String,
    pub content: String,
}

impl LlmMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmRequest {
    pub model: String,
    pub system: Option<String>,
    pub messages: Vec<LlmMessage>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

fn default_max_tokens() -> u32 {
    2048
}

impl LlmRequest {
    pub fn simple(model: String, system: Option<String>, user: String) -> Self {
        Self {
            model,
            system,
            messages: vec![LlmMessage::user(user)],
            max_tokens: default_max_tokens(),
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub text: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub stop_reason: Option<String>,
}

/// Reasoning models reject sampling temperature and need a larger output
/// budget for hidden reasoning tokens.
pub fn is_reasoning_model(model: &str) -> bool {
    let name = model.rsplit('/').next().unwrap_or(model).to_ascii_lowercase();
    name.starts_with("gpt-5") || name.starts_with("o1") || name.starts_with("o3") || name.starts_with("o4")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_request_defaults() {
        let req = LlmRequest::simple("gpt-4o-mini".into(), Some("sys".into()), "hello".into());
        assert_eq!(req.max_tokens, 2048);
        assert!(req.temperature.is_none());
        assert_eq!(req.last_user_text(), "hello");

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn builder_sets_sampling() {
        let req = LlmRequest::simple("m".into(), None, "x".into())
            .with_max_tokens(120)
            .with_temperature(0.1);
        assert_eq!(req.max_tokens, 120);
        assert_eq!(req.temperature, Some(0.1));
    }

    #[test]
    fn reasoning_model_detection() {
        assert!(is_reasoning_model("gpt-5-mini"));
        assert!(is_reasoning_model("openai/GPT-5"));
        assert!(!is_reasoning_model("gpt-4o-mini"));
    }
}
