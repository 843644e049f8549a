use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::openai::{build_client, send_json};
use crate::{is_reasoning_model, LlmMessage, LlmProvider, LlmRequest, LlmResponse};

/// OpenAI Responses API (`POST {base}/responses`), non-streaming.
#[derive(Debug, Clone)]
pub struct OpenAiResponsesProvider {
    client: reqwest::Client,
    api_key: String,
    api_base: String,
}

impl OpenAiResponsesProvider {
    pub fn new(api_key: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            client: build_client(),
            api_key: api_key.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
        }
    }

    pub(crate) fn to_responses_request(request: LlmRequest) -> ResponsesRequest {
        let reasoning = is_reasoning_model(&request.model);
        let mut input = Vec::with_capacity(request.messages.len() + 1);
        if let Some(system) = request.system.filter(|s| !s.is_empty()) {
            input.push(ResponsesInputMessage::text("system", "input_text", system));
        }
        input.extend(to_responses_input(request.messages));

        ResponsesRequest {
            model: to_responses_model(&request.model),
            input,
            max_output_tokens: request.max_tokens,
            temperature: if reasoning { None } else { request.temperature },
            reasoning: reasoning.then(|| ReasoningOptions {
                effort: "minimal".to_string(),
            }),
            text: reasoning.then(|| TextOptions {
                verbosity: "low".to_string(),
            }),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiResponsesProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/responses", self.api_base);
        let payload = Self::to_responses_request(request);

        let resp = send_json(&self.client, &url, &self.api_key, &payload, "openai responses").await?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| anyhow!("openai responses api error: malformed response body: {e}"))?;

        let usage = body
            .get("usage")
            .and_then(|u| serde_json::from_value::<ResponsesUsage>(u.clone()).ok());
        Ok(LlmResponse {
            text: extract_output_text(&body),
            input_tokens: usage.as_ref().map(|u| u.input_tokens),
            output_tokens: usage.as_ref().map(|u| u.output_tokens),
            stop_reason: body
                .get("status")
                .and_then(|s| s.as_str())
                .map(str::to_string),
        })
    }
}

/// Pull generated text out of a Responses API body: the top-level
/// `output_text` convenience field when present, otherwise every
/// `output_text` part of every output item joined by newlines.
pub fn extract_output_text(body: &serde_json::Value) -> String {
    if let Some(text) = body.get("output_text").and_then(|v| v.as_str()) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut chunks = Vec::new();
    let items = body
        .get("output")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();
    for item in items {
        let parts = item
            .get("content")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            if part.get("type").and_then(|t| t.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            }
        }
    }
    chunks.join("\n")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponsesRequest {
    pub model: String,
    pub input: Vec<ResponsesInputMessage>,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<ReasoningOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<TextOptions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ReasoningOptions {
    pub effort: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TextOptions {
    pub verbosity: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponsesInputMessage {
    pub role: String,
    pub content: Vec<ResponsesInputContent>,
}

impl ResponsesInputMessage {
    fn text(role: &str, content_type: &str, text: String) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ResponsesInputContent {
                content_type: content_type.to_string(),
                text,
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ResponsesInputContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

fn to_responses_model(model: &str) -> String {
    model.strip_prefix("openai/").unwrap_or(model).to_string()
}

fn to_responses_input(messages: Vec<LlmMessage>) -> Vec<ResponsesInputMessage> {
    let mut result = Vec::with_capacity(messages.len());
    for message in messages {
        let content_type = match message.role.as_str() {
            "user" | "system" => "input_text",
            "assistant" => "output_text",
            _ => {
                tracing::warn!(role = %message.role, "unsupported role for Responses API, skipping message");
                continue;
            }
        };
        if message.content.is_empty() {
            continue;
        }
        result.push(ResponsesInputMessage::text(
            &message.role,
            content_type,
            message.content,
        ));
    }
    result
}
