use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use drillroom_schema::{ReplySource, Role};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::{DelaySpec, WorkflowConfig};
use crate::reply::{ComposedReply, Draft, HeuristicStage, ReplyEngine, ReplyFinisher, TurnContext, TurnTrigger};

/// The one contract both delivery paths honor: every call yields exactly one
/// finished utterance.
#[async_trait]
pub trait BeatDelivery: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compose(&self, turn: &TurnContext) -> ComposedReply;

    /// Pause between composing a reply and persisting it.
    fn delay_for(&self, trigger: &TurnTrigger) -> DelaySpec;
}

/// Focus, stage chain and finisher run inside this process.
pub struct InProcessDelivery {
    engine: Arc<ReplyEngine>,
    beat_delay: DelaySpec,
    direct_delay: DelaySpec,
}

impl InProcessDelivery {
    pub fn new(engine: Arc<ReplyEngine>, beat_delay: DelaySpec, direct_delay: DelaySpec) -> Self {
        Self {
            engine,
            beat_delay,
            direct_delay,
        }
    }
}

#[async_trait]
impl BeatDelivery for InProcessDelivery {
    fn name(&self) -> &'static str {
        "in_process"
    }

    async fn compose(&self, turn: &TurnContext) -> ComposedReply {
        self.engine.compose(turn).await
    }

    fn delay_for(&self, trigger: &TurnTrigger) -> DelaySpec {
        if trigger.is_beat() {
            self.beat_delay
        } else {
            self.direct_delay
        }
    }
}

#[derive(Debug, Serialize)]
struct AgentRequest<'a> {
    session_id: &'a str,
    candidate_last_message: &'a str,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    #[serde(default)]
    agent: Option<String>,
    #[serde(default)]
    text: String,
}

fn workflow_client(timeout_ms: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .unwrap_or_default()
}

/// An external workflow engine writes the reply; this side only naturalizes
/// it and falls back to the heuristic when the engine misbehaves.
pub struct WorkflowDelivery {
    client: reqwest::Client,
    config: WorkflowConfig,
    heuristic: HeuristicStage,
    finisher: Arc<ReplyFinisher>,
}

impl WorkflowDelivery {
    pub fn new(config: WorkflowConfig, heuristic: HeuristicStage, finisher: Arc<ReplyFinisher>) -> Self {
        Self {
            client: workflow_client(config.timeout_ms),
            config,
            heuristic,
            finisher,
        }
    }

    async fn fetch(&self, url: &str, turn: &TurnContext) -> Result<String> {
        let request = AgentRequest {
            session_id: &turn.session_id,
            candidate_last_message: turn.participant_text(),
        };
        let resp = self
            .client
            .post(url)
            .json(&request)
            .send()
            .await
            .context("workflow agent unreachable")?;
        let status = resp.status();
        if !status.is_success() {
            return Err(anyhow!("workflow agent returned {status}"));
        }
        let body: AgentResponse = resp
            .json()
            .await
            .context("workflow agent returned malformed body")?;
        let text = body.text.trim();
        if text.is_empty() {
            return Err(anyhow!("workflow agent returned empty text"));
        }
        if let Some(agent) = body.agent.as_deref().and_then(Role::parse) {
            if agent != turn.role {
                tracing::debug!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    agent = %agent,
                    "workflow agent answered under another role"
                );
            }
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl BeatDelivery for WorkflowDelivery {
    fn name(&self) -> &'static str {
        "workflow"
    }

    async fn compose(&self, turn: &TurnContext) -> ComposedReply {
        let fetched = match self.config.agent_url(turn.role) {
            Some(url) => self.fetch(url, turn).await,
            None => Err(anyhow!("no workflow agent url for {}", turn.role)),
        };
        let draft = match fetched {
            Ok(text) => Draft {
                text,
                source: ReplySource::Workflow,
            },
            Err(e) => {
                tracing::warn!(
                    session_id = %turn.session_id,
                    role = %turn.role,
                    error = %e,
                    "workflow delivery failed, using heuristic reply"
                );
                self.heuristic.compose(turn)
            }
        };
        self.finisher.finish(turn, draft, None).await
    }

    fn delay_for(&self, trigger: &TurnTrigger) -> DelaySpec {
        if trigger.is_beat() {
            self.config.beat_delay
        } else {
            self.config.direct_delay
        }
    }
}

/// Outcome of the best-effort start notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookOutcome {
    pub ok: bool,
    /// HTTP status, `0` when the engine was unreachable.
    pub status: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HookOutcome {
    fn unreachable() -> Self {
        Self {
            ok: false,
            status: 0,
            body: None,
            error: Some("workflow_start_unreachable".to_string()),
        }
    }
}

/// Start hook reply as a JSON object. Anything else is kept under `raw`.
fn hook_body(text: &str) -> Value {
    match serde_json::from_str::<Value>(text) {
        Ok(body @ Value::Object(_)) => body,
        _ if text.trim().is_empty() => json!({}),
        _ => json!({ "raw": text }),
    }
}

/// Fire-and-report notifications to the workflow engine. Used in both
/// delivery modes whenever the URLs are configured.
pub struct WorkflowHooks {
    client: reqwest::Client,
    start_url: Option<String>,
    event_url: Option<String>,
    callback_url: String,
}

impl WorkflowHooks {
    pub fn new(config: &WorkflowConfig, public_base_url: &str) -> Self {
        let non_empty = |url: &Option<String>| url.clone().filter(|u| !u.trim().is_empty());
        Self {
            client: workflow_client(config.timeout_ms),
            start_url: non_empty(&config.start_url),
            event_url: non_empty(&config.event_url),
            callback_url: format!(
                "{}/sim/session/agent-message",
                public_base_url.trim_end_matches('/')
            ),
        }
    }

    pub fn has_event_hook(&self) -> bool {
        self.event_url.is_some()
    }

    /// `None` when no start hook is configured.
    pub async fn notify_start(&self, session_id: &str, duration_sec: u64) -> Option<HookOutcome> {
        let url = self.start_url.as_deref()?;
        let payload = json!({
            "session_id": session_id,
            "duration_sec": duration_sec,
            "frontend_agent_webhook": self.callback_url,
        });
        let outcome = match self.client.post(url).json(&payload).send().await {
            Ok(resp) => {
                let status = resp.status();
                let text = resp.text().await.unwrap_or_default();
                HookOutcome {
                    ok: status.is_success(),
                    status: status.as_u16(),
                    body: Some(hook_body(&text)),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(session_id, error = %e, "workflow start hook unreachable");
                HookOutcome::unreachable()
            }
        };
        Some(outcome)
    }

    /// Forwards a participant message the in-process pipeline did not answer.
    pub async fn relay_event(
        &self,
        session_id: &str,
        event_type: &str,
        text: &str,
        addressed_to: Option<Role>,
        thread_root: Option<&str>,
    ) -> Result<()> {
        let Some(url) = self.event_url.as_deref() else {
            return Ok(());
        };
        let payload = json!({
            "session_id": session_id,
            "event_type": event_type,
            "frontend_agent_webhook": self.callback_url,
            "data": {
                "text": text,
                "addressed_to": addressed_to.map(|r| r.as_str()),
                "thread_root": thread_root,
            },
        });
        let resp = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .context("workflow event hook unreachable")?;
        if !resp.status().is_success() {
            return Err(anyhow!("workflow event hook returned {}", resp.status()));
        }
        Ok(())
    }
}
