pub mod openai;
pub mod openai_compat;
pub mod responses;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use openai::{OpenAiProvider, ProviderErrorKind};
pub use openai_compat::{custom, ollama, ollama_with_base, openrouter, OPENAI_BASE};
pub use responses::{extract_output_text, OpenAiResponsesProvider};
pub use types::*;

#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse>;
    async fn health(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================
// Provider Configuration
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Chat Completions API
    OpenAI,
    /// Responses API
    #[serde(alias = "openai-responses", alias = "openai_responses")]
    Responses,
    Ollama,
    OpenRouter,
    /// Custom OpenAI-compatible endpoint
    Custom,
    /// Offline echo provider, no network
    Stub,
}

/// Configuration for a single provider instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique provider ID referenced by model strings ("openai/gpt-4o-mini")
    #[serde(alias = "provider_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Overrides the default base URL of the provider type
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, provider_type: ProviderType) -> Self {
        Self {
            id: id.into(),
            provider_type,
            api_key: None,
            base_url: None,
            enabled: true,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    fn require_key(&self) -> Result<String> {
        self.api_key
            .as_ref()
            .filter(|k| !k.trim().is_empty())
            .cloned()
            .ok_or_else(|| anyhow!("provider {} requires api_key", self.id))
    }
}

/// Create a provider from configuration.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider_type {
        ProviderType::OpenAI => {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_BASE);
            Arc::new(OpenAiProvider::new(config.require_key()?, base_url))
        }
        ProviderType::Responses => {
            let base_url = config.base_url.as_deref().unwrap_or(OPENAI_BASE);
            Arc::new(OpenAiResponsesProvider::new(config.require_key()?, base_url))
        }
        ProviderType::Ollama => {
            let base_url = config
                .base_url
                .as_deref()
                .unwrap_or("http://localhost:11434/v1");
            Arc::new(ollama_with_base(base_url))
        }
        ProviderType::OpenRouter => Arc::new(openrouter(config.require_key()?)),
        ProviderType::Custom => {
            let base_url = config
                .base_url
                .as_ref()
                .ok_or_else(|| anyhow!("custom provider {} requires base_url", config.id))?;
            Arc::new(custom(config.require_key()?, base_url.clone()))
        }
        ProviderType::Stub => Arc::new(StubProvider),
    };
    Ok(provider)
}

/// Register every enabled provider; a misconfigured entry is skipped with a
/// warning so the simulator can still run on heuristics.
pub fn register_from_configs(
    registry: &mut ProviderRegistry,
    configs: &[ProviderConfig],
) -> usize {
    let mut registered = 0;
    for config in configs.iter().filter(|c| c.enabled) {
        match create_provider(config) {
            Ok(provider) => {
                registry.register(&config.id, provider);
                registered += 1;
                tracing::info!("Registered provider: {} ({:?})", config.id, config.provider_type);
            }
            Err(e) => {
                tracing::warn!(provider = %config.id, error = %e, "provider not registered");
            }
        }
    }
    registered
}

// ============================================================
// Provider Registry
// ============================================================

#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn LlmProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: impl Into<String>, provider: Arc<dyn LlmProvider>) {
        self.providers.insert(id.into(), provider);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn LlmProvider>> {
        self.providers
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("provider not found: {id}"))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }
}

/// Echoes the last user message; used for offline runs and tests.
pub struct StubProvider;

#[async_trait]
impl LlmProvider for StubProvider {
    async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
        let text = format!("[stub:{}] {}", request.model, request.last_user_text());
        Ok(LlmResponse {
            text,
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        })
    }
}
