use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use drillroom_provider::{is_reasoning_model, LlmMessage, LlmRequest, LlmResponse, ProviderRegistry};
use tokio::time;

use crate::llm::{GenerationProfile, TextGenerator};
use crate::ModelPolicy;

const MAX_RETRIES: usize = 1;
const BASE_BACKOFF_MS: u64 = 250;
const DEFAULT_COOLDOWN_SECS: u64 = 60;
const BILLING_COOLDOWN_SECS: u64 = 300;

#[derive(Debug, Clone, Default)]
pub struct ProviderCooldownStats {
    pub cooldown_until: Option<Instant>,
    pub failure_count: u32,
    pub last_failure_reason: Option<String>,
}

impl ProviderCooldownStats {
    pub fn is_in_cooldown(&self) -> bool {
        self.cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    pub fn remaining_cooldown(&self) -> Option<Duration> {
        self.cooldown_until
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    fn set_cooldown(&mut self, duration: Duration, reason: &str) {
        self.cooldown_until = Some(Instant::now() + duration);
        self.failure_count += 1;
        self.last_failure_reason = Some(reason.to_string());
    }
}

/// Per-provider cooldown bookkeeping shared by every pipeline stage.
#[derive(Debug, Clone, Default)]
pub struct CooldownStore {
    stats: HashMap<String, ProviderCooldownStats>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_stats(&self, provider_id: &str) -> ProviderCooldownStats {
        self.stats.get(provider_id).cloned().unwrap_or_default()
    }

    pub fn set_cooldown(&mut self, provider_id: &str, duration: Duration, reason: &str) {
        self.stats
            .entry(provider_id.to_string())
            .or_default()
            .set_cooldown(duration, reason);
    }

    pub fn clear_cooldown(&mut self, provider_id: &str) {
        if let Some(stats) = self.stats.get_mut(provider_id) {
            stats.cooldown_until = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverReason {
    RateLimit,
    Billing,
    Timeout,
    ServerError,
    ContextOverflow,
    AuthError,
    Unknown,
}

impl FailoverReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::Billing => "billing",
            Self::Timeout => "timeout",
            Self::ServerError => "server_error",
            Self::ContextOverflow => "context_overflow",
            Self::AuthError => "auth_error",
            Self::Unknown => "unknown",
        }
    }

    fn cooldown(&self) -> Duration {
        match self {
            Self::Billing => Duration::from_secs(BILLING_COOLDOWN_SECS),
            Self::RateLimit | Self::Unknown => Duration::from_secs(DEFAULT_COOLDOWN_SECS),
            Self::Timeout | Self::ServerError => Duration::from_secs(30),
            Self::ContextOverflow => Duration::ZERO,
            Self::AuthError => Duration::from_secs(3600),
        }
    }
}

pub fn classify_failover_reason(err_str: &str) -> Option<FailoverReason> {
    let lower = err_str.to_lowercase();
    let any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if any(&["429", "rate limit", "rate_limit"]) {
        return Some(FailoverReason::RateLimit);
    }
    if any(&["insufficient", "billing", "credits", "quota"]) {
        return Some(FailoverReason::Billing);
    }
    if any(&["timeout", "timed out", "deadline"]) {
        return Some(FailoverReason::Timeout);
    }
    if any(&[
        "500",
        "502",
        "503",
        "504",
        "internal server error",
        "service unavailable",
        "bad gateway",
    ]) {
        return Some(FailoverReason::ServerError);
    }
    if lower.contains("context") && any(&["overflow", "too long", "too large", "exceed"]) {
        return Some(FailoverReason::ContextOverflow);
    }
    if any(&["401", "403", "unauthorized", "forbidden", "authentication"]) {
        return Some(FailoverReason::AuthError);
    }
    if lower.contains("[retryable]") {
        return Some(FailoverReason::Unknown);
    }
    None
}

/// Resolves model references to providers and walks the candidate chain
/// (policy primary, policy fallbacks, global fallbacks) until one answers.
pub struct LlmRouter {
    registry: ProviderRegistry,
    aliases: HashMap<String, String>,
    global_fallbacks: Vec<String>,
    cooldowns: Arc<RwLock<CooldownStore>>,
}

impl LlmRouter {
    pub fn new(
        registry: ProviderRegistry,
        aliases: HashMap<String, String>,
        global_fallbacks: Vec<String>,
    ) -> Self {
        Self {
            registry,
            aliases,
            global_fallbacks,
            cooldowns: Arc::new(RwLock::new(CooldownStore::new())),
        }
    }

    fn candidates(&self, policy: &ModelPolicy) -> Vec<String> {
        let mut seen = HashSet::new();
        policy
            .candidates()
            .chain(self.global_fallbacks.iter().map(String::as_str))
            .filter(|c| seen.insert(c.to_string()))
            .map(str::to_string)
            .collect()
    }

    fn cooldown_remaining(&self, provider_id: &str) -> Option<Duration> {
        self.cooldowns
            .read()
            .ok()
            .and_then(|store| store.get_stats(provider_id).remaining_cooldown())
    }

    fn record_provider_failure(&self, provider_id: &str, reason: FailoverReason) {
        if let Ok(mut store) = self.cooldowns.write() {
            store.set_cooldown(provider_id, reason.cooldown(), reason.as_str());
        }
    }

    fn clear_provider_cooldown(&self, provider_id: &str) {
        if let Ok(mut store) = self.cooldowns.write() {
            store.clear_cooldown(provider_id);
        }
    }

    /// True when at least one candidate of `policy` maps to a registered
    /// provider. Stages skip generation entirely otherwise.
    pub fn can_serve(&self, policy: &ModelPolicy) -> bool {
        self.candidates(policy).iter().any(|candidate| {
            self.resolve_model(candidate)
                .and_then(|resolved| parse_provider_model(&resolved))
                .map(|(provider_id, _)| self.registry.get(&provider_id).is_ok())
                .unwrap_or(false)
        })
    }

    pub async fn chat(
        &self,
        policy: &ModelPolicy,
        system: Option<String>,
        messages: Vec<LlmMessage>,
        profile: GenerationProfile,
    ) -> Result<LlmResponse> {
        let mut last_err: Option<anyhow::Error> = None;
        let mut tried: Vec<String> = Vec::new();

        for (idx, candidate) in self.candidates(policy).iter().enumerate() {
            let resolved = match self.resolve_model(candidate) {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!("failed to resolve model {candidate}: {e}");
                    continue;
                }
            };
            let (provider_id, model_id) = match parse_provider_model(&resolved) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("invalid model format {resolved}: {e}");
                    continue;
                }
            };

            if let Some(remaining) = self.cooldown_remaining(&provider_id) {
                tracing::info!(
                    "skipping provider {provider_id} (in cooldown for {:.0}s), trying next",
                    remaining.as_secs_f64()
                );
                continue;
            }

            let provider = match self.registry.get(&provider_id) {
                Ok(p) => p,
                Err(e) => {
                    tracing::warn!("provider {provider_id} not available: {e}");
                    continue;
                }
            };
            tried.push(format!("{provider_id}/{model_id}"));

            let reasoning = is_reasoning_model(&model_id);
            let mut attempts = 0;
            loop {
                let mut req = LlmRequest {
                    model: model_id.clone(),
                    system: system.clone(),
                    messages: messages.clone(),
                    max_tokens: profile.max_tokens,
                    temperature: None,
                };
                if reasoning {
                    req = req.with_max_tokens(profile.reasoning_max_tokens);
                } else {
                    req = req.with_temperature(profile.temperature);
                }

                match provider.chat(req).await {
                    Ok(resp) => {
                        self.clear_provider_cooldown(&provider_id);
                        if idx > 0 {
                            tracing::info!(
                                "fallback_triggered=true, from={}, to={provider_id}/{model_id}, attempt={}",
                                policy.primary,
                                idx + 1
                            );
                        }
                        return Ok(resp);
                    }
                    Err(err) => {
                        let err_str = err.to_string();
                        let is_retryable = err_str.contains("[retryable]");

                        if is_retryable && attempts < MAX_RETRIES {
                            attempts += 1;
                            let backoff = BASE_BACKOFF_MS * (1 << (attempts - 1));
                            tracing::warn!(
                                "provider {provider_id} retryable error (attempt {attempts}/{MAX_RETRIES}), backing off {backoff}ms: {err_str}"
                            );
                            time::sleep(time::Duration::from_millis(backoff)).await;
                            continue;
                        }

                        match classify_failover_reason(&err_str) {
                            Some(reason) => {
                                self.record_provider_failure(&provider_id, reason);
                                tracing::warn!(
                                    "provider {provider_id} failed (reason={}, attempts={attempts}): {err_str}",
                                    reason.as_str()
                                );
                            }
                            None => {
                                tracing::warn!(
                                    "provider {provider_id} failed (attempts={attempts}): {err_str}"
                                );
                            }
                        }
                        last_err = Some(err);
                        break;
                    }
                }
            }
        }

        let tried = tried.join(" -> ");
        Err(last_err.unwrap_or_else(|| {
            anyhow!("all model candidates failed or in cooldown (tried: {tried})")
        }))
    }

    pub fn resolve_model(&self, raw: &str) -> Result<String> {
        if raw.contains('/') {
            return Ok(raw.to_string());
        }
        self.aliases
            .get(raw)
            .cloned()
            .ok_or_else(|| anyhow!("unknown model alias: {raw}"))
    }
}

pub fn parse_provider_model(input: &str) -> Result<(String, String)> {
    match input.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider.to_string(), model.to_string()))
        }
        _ => Err(anyhow!("invalid model format: {input}")),
    }
}

/// A `TextGenerator` bound to one model policy of a shared router.
#[derive(Clone)]
pub struct RoutedGenerator {
    router: Arc<LlmRouter>,
    policy: ModelPolicy,
}

impl RoutedGenerator {
    pub fn new(router: Arc<LlmRouter>, policy: ModelPolicy) -> Self {
        Self { router, policy }
    }

    /// `None` when no candidate of `policy` can be served, so callers fall
    /// straight through to their non-generative path.
    pub fn available(router: &Arc<LlmRouter>, policy: Option<&ModelPolicy>) -> Option<Arc<dyn TextGenerator>> {
        let policy = policy?;
        if !router.can_serve(policy) {
            return None;
        }
        Some(Arc::new(Self::new(Arc::clone(router), policy.clone())))
    }
}

#[async_trait]
impl TextGenerator for RoutedGenerator {
    async fn generate(&self, system: &str, user: &str, profile: GenerationProfile) -> Result<String> {
        let resp = self
            .router
            .chat(
                &self.policy,
                Some(system.to_string()),
                vec![LlmMessage::user(user)],
                profile,
            )
            .await?;
        Ok(resp.text)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use drillroom_provider::{LlmProvider, StubProvider};

    use super::*;

    struct RetryableFailProvider {
        call_count: AtomicUsize,
        fail_times: usize,
    }

    #[async_trait]
    impl LlmProvider for RetryableFailProvider {
        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
            let count = self.call_count.fetch_add(1, Ordering::SeqCst);
            if count < self.fail_times {
                anyhow::bail!("openai api error (429) [retryable]: rate limited")
            }
            Ok(ok_response(format!("ok after {count} retries")))
        }
    }

    struct PermanentFailProvider;

    #[async_trait]
    impl LlmProvider for PermanentFailProvider {
        async fn chat(&self, _request: LlmRequest) -> Result<LlmResponse> {
            anyhow::bail!("openai api error (401): unauthorized")
        }
    }

    #[derive(Default)]
    struct RecordingProvider {
        seen: Mutex<Vec<LlmRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingProvider {
        async fn chat(&self, request: LlmRequest) -> Result<LlmResponse> {
            self.seen.lock().unwrap().push(request);
            Ok(ok_response("recorded".into()))
        }
    }

    fn ok_response(text: String) -> LlmResponse {
        LlmResponse {
            text,
            input_tokens: None,
            output_tokens: None,
            stop_reason: Some("end_turn".into()),
        }
    }

    fn hi() -> Vec<LlmMessage> {
        vec![LlmMessage::user("hi")]
    }

    #[tokio::test(start_paused = true)]
    async fn retries_once_on_retryable_error() {
        let provider = Arc::new(RetryableFailProvider {
            call_count: AtomicUsize::new(0),
            fail_times: 1,
        });
        let mut registry = ProviderRegistry::new();
        registry.register("test", provider.clone());
        let aliases = HashMap::from([("model".to_string(), "test/model".to_string())]);
        let router = LlmRouter::new(registry, aliases, vec![]);

        let resp = router
            .chat(&ModelPolicy::new("model"), None, hi(), GenerationProfile::REPLY)
            .await
            .unwrap();
        assert_eq!(resp.text, "ok after 1 retries");
        assert_eq!(provider.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_retry_budget() {
        let provider = Arc::new(RetryableFailProvider {
            call_count: AtomicUsize::new(0),
            fail_times: 5,
        });
        let mut registry = ProviderRegistry::new();
        registry.register("test", provider.clone());
        let router = LlmRouter::new(registry, HashMap::new(), vec![]);

        let err = router
            .chat(&ModelPolicy::new("test/model"), None, hi(), GenerationProfile::REPLY)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("429"));
        assert_eq!(provider.call_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn falls_back_and_cools_down_failed_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register("fail", Arc::new(PermanentFailProvider));
        registry.register("stub", Arc::new(StubProvider));
        let router = LlmRouter::new(registry, HashMap::new(), vec!["stub/echo".into()]);
        let policy = ModelPolicy::new("fail/model");

        let resp = router
            .chat(&policy, None, hi(), GenerationProfile::FOCUS)
            .await
            .unwrap();
        assert_eq!(resp.text, "[stub:echo] hi");
        assert!(router.cooldown_remaining("fail").is_some());

        // second call skips the cooled-down provider entirely
        let resp = router
            .chat(&policy, None, hi(), GenerationProfile::FOCUS)
            .await
            .unwrap();
        assert_eq!(resp.text, "[stub:echo] hi");
    }

    #[tokio::test]
    async fn reasoning_models_drop_temperature() {
        let provider = Arc::new(RecordingProvider::default());
        let mut registry = ProviderRegistry::new();
        registry.register("openai", provider.clone());
        let router = LlmRouter::new(registry, HashMap::new(), vec![]);

        router
            .chat(&ModelPolicy::new("openai/gpt-5-mini"), None, hi(), GenerationProfile::NATURALIZER)
            .await
            .unwrap();
        router
            .chat(&ModelPolicy::new("openai/gpt-4o-mini"), None, hi(), GenerationProfile::NATURALIZER)
            .await
            .unwrap();

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen[0].temperature, None);
        assert_eq!(seen[0].max_tokens, 240);
        assert_eq!(seen[1].temperature, Some(0.2));
        assert_eq!(seen[1].max_tokens, 140);
    }

    #[test]
    fn can_serve_requires_registered_provider() {
        let mut registry = ProviderRegistry::new();
        registry.register("stub", Arc::new(StubProvider));
        let aliases = HashMap::from([("fast".to_string(), "stub/echo".to_string())]);
        let router = LlmRouter::new(registry, aliases, vec![]);

        assert!(router.can_serve(&ModelPolicy::new("fast")));
        assert!(router.can_serve(&ModelPolicy::new("stub/anything")));
        assert!(!router.can_serve(&ModelPolicy::new("openai/gpt-4o-mini")));
        assert!(!router.can_serve(&ModelPolicy::new("nope")));
    }

    #[test]
    fn classify_failover_reasons() {
        assert_eq!(classify_failover_reason("HTTP 429"), Some(FailoverReason::RateLimit));
        assert_eq!(classify_failover_reason("insufficient_quota"), Some(FailoverReason::Billing));
        assert_eq!(classify_failover_reason("request timed out"), Some(FailoverReason::Timeout));
        assert_eq!(classify_failover_reason("502 bad gateway"), Some(FailoverReason::ServerError));
        assert_eq!(
            classify_failover_reason("context length exceeded"),
            Some(FailoverReason::ContextOverflow)
        );
        assert_eq!(classify_failover_reason("403 forbidden"), Some(FailoverReason::AuthError));
        assert_eq!(classify_failover_reason("weird [retryable]"), Some(FailoverReason::Unknown));
        assert_eq!(classify_failover_reason("invalid json"), None);
    }

    #[test]
    fn parse_provider_model_requires_both_parts() {
        assert_eq!(
            parse_provider_model("openai/gpt-4o-mini").unwrap(),
            ("openai".to_string(), "gpt-4o-mini".to_string())
        );
        assert_eq!(
            parse_provider_model("openrouter/meta/llama").unwrap().1,
            "meta/llama"
        );
        assert!(parse_provider_model("openai").is_err());
        assert!(parse_provider_model("/model").is_err());
    }

    #[tokio::test]
    async fn routed_generator_only_when_servable() {
        let mut registry = ProviderRegistry::new();
        registry.register("stub", Arc::new(StubProvider));
        let router = Arc::new(LlmRouter::new(registry, HashMap::new(), vec![]));

        assert!(RoutedGenerator::available(&router, None).is_none());
        assert!(RoutedGenerator::available(&router, Some(&ModelPolicy::new("openai/x"))).is_none());

        let generator = RoutedGenerator::available(&router, Some(&ModelPolicy::new("stub/m"))).unwrap();
        let text = generator
            .generate("system", "hello", GenerationProfile::REPLY)
            .await
            .unwrap();
        assert_eq!(text, "[stub:m] hello");
    }
}
