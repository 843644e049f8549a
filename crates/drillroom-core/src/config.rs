use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use drillroom_memory::TranscriptConfig;
use drillroom_provider::ProviderConfig;
use drillroom_scheduler::SchedulerConfig;
use drillroom_schema::Role;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use crate::ModelPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub env: String,
    /// Base URL external collaborators use to call back into this server.
    pub public_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "drillroom".to_string(),
            env: "dev".to_string(),
            public_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            body_limit_bytes: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptSection {
    #[serde(flatten)]
    pub store: TranscriptConfig,
    /// JSONL archive directory; no archive when unset.
    pub archive_dir: Option<String>,
}

/// `base_ms + U[0, jitter_ms)` pause before a reply is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelaySpec {
    pub base_ms: u64,
    #[serde(default)]
    pub jitter_ms: u64,
}

impl DelaySpec {
    pub const fn new(base_ms: u64, jitter_ms: u64) -> Self {
        Self { base_ms, jitter_ms }
    }

    pub const fn none() -> Self {
        Self::new(0, 0)
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        let jitter = if self.jitter_ms == 0 {
            0
        } else {
            rng.gen_range(0..self.jitter_ms)
        };
        Duration::from_millis(self.base_ms + jitter)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub reply_model: Option<ModelPolicy>,
    /// Falls back to `reply_model` when unset.
    pub focus_model: Option<ModelPolicy>,
    /// Falls back to `reply_model` when unset.
    pub naturalizer_model: Option<ModelPolicy>,
    pub model_aliases: HashMap<String, String>,
    pub global_fallbacks: Vec<String>,
    pub enable_focus: bool,
    pub enable_naturalizer: bool,
    pub strict: bool,
    pub own_history_lookback: usize,
    pub breaker_lookback: usize,
    pub beat_delay: DelaySpec,
    pub direct_delay: DelaySpec,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            reply_model: None,
            focus_model: None,
            naturalizer_model: None,
            model_aliases: HashMap::new(),
            global_fallbacks: Vec::new(),
            enable_focus: true,
            enable_naturalizer: true,
            strict: false,
            own_history_lookback: 6,
            breaker_lookback: 8,
            beat_delay: DelaySpec::new(1700, 1200),
            direct_delay: DelaySpec::new(2400, 1200),
        }
    }
}

impl PipelineConfig {
    pub fn focus_policy(&self) -> Option<&ModelPolicy> {
        self.focus_model.as_ref().or(self.reply_model.as_ref())
    }

    pub fn naturalizer_policy(&self) -> Option<&ModelPolicy> {
        self.naturalizer_model.as_ref().or(self.reply_model.as_ref())
    }

    fn policies(&self) -> impl Iterator<Item = &ModelPolicy> {
        [&self.reply_model, &self.focus_model, &self.naturalizer_model]
            .into_iter()
            .flatten()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMode {
    #[default]
    InProcess,
    Workflow,
}

/// External workflow engine endpoints. The start and event hooks are used
/// whenever set; the agent URLs only in `workflow` mode.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub start_url: Option<String>,
    pub event_url: Option<String>,
    pub qa_url: Option<String>,
    pub ba_url: Option<String>,
    pub tech_lead_url: Option<String>,
    pub timeout_ms: u64,
    pub beat_delay: DelaySpec,
    pub direct_delay: DelaySpec,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            start_url: None,
            event_url: None,
            qa_url: None,
            ba_url: None,
            tech_lead_url: None,
            timeout_ms: 10_000,
            beat_delay: DelaySpec::new(1500, 900),
            direct_delay: DelaySpec::new(2200, 900),
        }
    }
}

impl WorkflowConfig {
    pub fn agent_url(&self, role: Role) -> Option<&str> {
        let url = match role {
            Role::Qa => &self.qa_url,
            Role::Ba => &self.ba_url,
            Role::TechLead => &self.tech_lead_url,
            _ => return None,
        };
        url.as_deref().filter(|u| !u.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub workflow: WorkflowConfig,
}

/// Scenario input data. Relative paths resolve against the config root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Incident brief JSON merged over the built-in brief.
    pub brief_path: Option<String>,
    /// Markdown with per-role prompt sections.
    pub persona_prompts_path: Option<String>,
    /// YAML persona catalog replacing the built-in one.
    pub personas_path: Option<String>,
    /// Checklist keyword patterns keyed by item name, overriding the defaults.
    pub checklist_patterns: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MainConfig {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub orchestrator: SchedulerConfig,
    pub transcript: TranscriptSection,
    pub pipeline: PipelineConfig,
    pub delivery: DeliveryConfig,
    pub scenario: ScenarioConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrillroomConfig {
    #[serde(skip)]
    pub root: PathBuf,
    pub main: MainConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl DrillroomConfig {
    /// Config with every default and no providers; the pipeline runs on
    /// heuristics only.
    pub fn offline(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            main: MainConfig::default(),
            providers: Vec::new(),
        }
    }

    /// Absolute paths are kept; relative ones are joined onto the config root.
    pub fn resolve_path(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

pub fn resolve_env_var(raw: &str) -> String {
    let mut output = String::new();
    let mut rest = raw;

    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);

        let candidate = &rest[start + 2..];
        let Some(end) = candidate.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };

        let key = &candidate[..end];
        output.push_str(&std::env::var(key).unwrap_or_default());
        rest = &candidate[end + 1..];
    }

    output.push_str(rest);
    output
}

/// Loads `<root>/main.yaml` and every `<root>/providers.d/*.yaml`, resolves
/// `${VAR}` placeholders and validates the result.
pub fn load_config(root: &Path) -> Result<DrillroomConfig> {
    let mut main: MainConfig = read_yaml_file(&root.join("main.yaml"))?;
    let mut providers = read_yaml_dir::<ProviderConfig>(&root.join("providers.d"))?;

    resolve_main_env(&mut main);
    resolve_providers_env(&mut providers);

    let config = DrillroomConfig {
        root: root.to_path_buf(),
        main,
        providers,
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn validate_config(config: &DrillroomConfig) -> Result<()> {
    let mut seen = HashSet::new();
    for provider in &config.providers {
        if !seen.insert(provider.id.as_str()) {
            return Err(anyhow!("duplicate provider id: {}", provider.id));
        }
    }

    let main = &config.main;
    main.orchestrator
        .validate()
        .context("invalid orchestrator section")?;

    if main.server.body_limit_bytes == 0 {
        return Err(anyhow!("server.body_limit_bytes must be > 0"));
    }
    if main.transcript.store.max_messages == 0 {
        return Err(anyhow!("transcript.max_messages must be > 0"));
    }
    if main.transcript.store.duplicate_lookback == 0 {
        return Err(anyhow!("transcript.duplicate_lookback must be > 0"));
    }
    if main.pipeline.own_history_lookback == 0 || main.pipeline.breaker_lookback == 0 {
        return Err(anyhow!("pipeline lookbacks must be > 0"));
    }

    if main.delivery.mode == DeliveryMode::Workflow {
        for role in Role::PERSONAS {
            if main.delivery.workflow.agent_url(role).is_none() {
                return Err(anyhow!("workflow delivery requires an agent url for {role}"));
            }
        }
    }

    let pipeline = &main.pipeline;
    let references = pipeline
        .policies()
        .flat_map(|p| p.candidates())
        .chain(pipeline.global_fallbacks.iter().map(String::as_str));
    for reference in references {
        let resolved = if reference.contains('/') {
            reference
        } else {
            pipeline
                .model_aliases
                .get(reference)
                .map(String::as_str)
                .ok_or_else(|| anyhow!("unknown model alias: {reference}"))?
        };
        let provider_id = resolved.split('/').next().unwrap_or_default();
        if !seen.contains(provider_id) {
            return Err(anyhow!("unknown provider in model reference: {reference}"));
        }
    }

    Ok(())
}

fn read_yaml_file<T>(path: &Path) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    serde_yaml::from_str(&content)
        .with_context(|| format!("failed to parse yaml file: {}", path.display()))
}

fn read_yaml_dir<T>(dir: &Path) -> Result<Vec<T>>
where
    T: for<'de> Deserialize<'de>,
{
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut paths = Vec::new();
    for entry in fs::read_dir(dir)
        .with_context(|| format!("failed to read config dir: {}", dir.display()))?
    {
        let entry =
            entry.with_context(|| format!("failed to read dir entry: {}", dir.display()))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("yaml") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        items.push(read_yaml_file::<T>(&path)?);
    }
    Ok(items)
}

fn resolve_opt(value: &mut Option<String>) {
    if let Some(raw) = value {
        *raw = resolve_env_var(raw);
    }
}

fn resolve_policy(policy: &mut Option<ModelPolicy>) {
    if let Some(policy) = policy {
        policy.primary = resolve_env_var(&policy.primary);
        for fallback in &mut policy.fallbacks {
            *fallback = resolve_env_var(fallback);
        }
    }
}

fn resolve_main_env(main: &mut MainConfig) {
    main.app.name = resolve_env_var(&main.app.name);
    main.app.env = resolve_env_var(&main.app.env);
    main.app.public_base_url = resolve_env_var(&main.app.public_base_url);
    main.server.host = resolve_env_var(&main.server.host);

    resolve_opt(&mut main.transcript.archive_dir);

    resolve_policy(&mut main.pipeline.reply_model);
    resolve_policy(&mut main.pipeline.focus_model);
    resolve_policy(&mut main.pipeline.naturalizer_model);
    for fallback in &mut main.pipeline.global_fallbacks {
        *fallback = resolve_env_var(fallback);
    }

    let workflow = &mut main.delivery.workflow;
    for url in [
        &mut workflow.start_url,
        &mut workflow.event_url,
        &mut workflow.qa_url,
        &mut workflow.ba_url,
        &mut workflow.tech_lead_url,
    ] {
        resolve_opt(url);
    }

    resolve_opt(&mut main.scenario.brief_path);
    resolve_opt(&mut main.scenario.persona_prompts_path);
    resolve_opt(&mut main.scenario.personas_path);
}

fn resolve_providers_env(providers: &mut [ProviderConfig]) {
    for provider in providers {
        provider.id = resolve_env_var(&provider.id);
        resolve_opt(&mut provider.api_key);
        resolve_opt(&mut provider.base_url);
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use drillroom_provider::ProviderType;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;

    fn fixture_config_root() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config")
    }

    #[test]
    fn load_config_from_workspace_fixtures() {
        let config = load_config(&fixture_config_root()).unwrap();
        assert_eq!(config.main.app.name, "drillroom");
        assert_eq!(config.main.orchestrator.retry_ms, 800);
        assert_eq!(config.main.transcript.store.max_messages, 500);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].provider_type, ProviderType::Responses);
        assert_eq!(
            config.main.pipeline.reply_model.as_ref().map(|p| p.primary.as_str()),
            Some("openai/gpt-4o-mini")
        );
    }

    #[test]
    fn minimal_main_yaml_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.yaml"), "app:\n  name: tiny\n").unwrap();

        let config = load_config(dir.path()).unwrap();
        assert_eq!(config.main.app.name, "tiny");
        assert_eq!(config.main.server.body_limit_bytes, 1024 * 1024);
        assert_eq!(config.main.orchestrator.max_defer_ms, 15_000);
        assert_eq!(config.main.pipeline.own_history_lookback, 6);
        assert_eq!(config.main.pipeline.beat_delay, DelaySpec::new(1700, 1200));
        assert_eq!(config.main.delivery.mode, DeliveryMode::InProcess);
        assert!(config.providers.is_empty());
        assert!(config.main.pipeline.reply_model.is_none());
    }

    #[test]
    fn missing_main_yaml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(dir.path()).unwrap_err();
        assert!(err.to_string().contains("failed to read config file"));
    }

    #[test]
    fn validate_config_detects_duplicate_provider_id() {
        let mut config = load_config(&fixture_config_root()).unwrap();
        let duplicate = config.providers[0].clone();
        config.providers.push(duplicate);

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate provider id"));
    }

    #[test]
    fn validate_config_detects_unknown_provider_in_model_ref() {
        let mut config = load_config(&fixture_config_root()).unwrap();
        config.main.pipeline.focus_model = Some(ModelPolicy::new("nowhere/model"));

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown provider in model reference"));
    }

    #[test]
    fn validate_config_resolves_aliases() {
        let mut config = DrillroomConfig::offline("/tmp");
        config
            .providers
            .push(ProviderConfig::new("local", ProviderType::Stub));
        config.main.pipeline.reply_model = Some(ModelPolicy::new("fast"));
        assert!(validate_config(&config).is_err());

        config
            .main
            .pipeline
            .model_aliases
            .insert("fast".into(), "local/echo".into());
        validate_config(&config).unwrap();
    }

    #[test]
    fn workflow_mode_requires_agent_urls() {
        let mut config = DrillroomConfig::offline("/tmp");
        config.main.delivery.mode = DeliveryMode::Workflow;
        config.main.delivery.workflow.qa_url = Some("http://wf/qa".into());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("agent url for ba"));
    }

    #[test]
    fn zero_retry_interval_is_rejected() {
        let mut config = DrillroomConfig::offline("/tmp");
        config.main.orchestrator.retry_ms = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn resolve_path_joins_relative_paths() {
        let config = DrillroomConfig::offline("/etc/drillroom");
        assert_eq!(
            config.resolve_path("scenario/brief.json"),
            PathBuf::from("/etc/drillroom/scenario/brief.json")
        );
        assert_eq!(config.resolve_path("/abs/x.md"), PathBuf::from("/abs/x.md"));
    }

    #[test]
    fn delay_sample_stays_in_range() {
        let mut rng = StdRng::seed_from_u64(9);
        let spec = DelaySpec::new(1700, 1200);
        for _ in 0..50 {
            let ms = spec.sample(&mut rng).as_millis() as u64;
            assert!((1700..2900).contains(&ms));
        }
        assert_eq!(DelaySpec::none().sample(&mut rng), Duration::ZERO);
    }

    #[test]
    fn resolve_env_var_replaces_env_placeholder() {
        let expected = std::env::var("PATH").unwrap();
        assert_eq!(resolve_env_var("${PATH}"), expected);
    }

    #[test]
    fn resolve_env_var_returns_raw_when_not_placeholder() {
        assert_eq!(resolve_env_var("plain-value"), "plain-value");
    }

    #[test]
    fn resolve_env_var_unclosed_bracket() {
        assert_eq!(resolve_env_var("prefix_${UNCLOSED"), "prefix_${UNCLOSED");
    }

    #[test]
    fn resolve_env_var_missing_env_returns_empty() {
        assert_eq!(
            resolve_env_var("val=${DRILLROOM_NONEXISTENT_VAR_XYZ}"),
            "val="
        );
    }
}
