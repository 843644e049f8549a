use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use drillroom_bus::BusPublisher;
use drillroom_memory::{AppendOutcome, TranscriptArchive, TranscriptStore};
use drillroom_provider::{register_from_configs, ProviderRegistry};
use drillroom_scheduler::{announce_end, BeatCue, BeatSink, SchedulerConfig, SessionRuntime, TickScheduler, TurnPlan};
use drillroom_schema::{BusMessage, Message, MessageKind, MessageMeta, Role, SignalEvent};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::{DeliveryMode, DrillroomConfig, PipelineConfig};
use crate::delivery::{BeatDelivery, InProcessDelivery, WorkflowDelivery, WorkflowHooks};
use crate::evaluation::{evaluate_transcript, EvaluationReport};
use crate::fact_sheet::IncidentBrief;
use crate::focus::FocusClassifier;
use crate::llm::TextGenerator;
use crate::naturalizer::Naturalizer;
use crate::persona::{PersonaCatalog, PersonaPrompts};
use crate::repetition::RepetitionGuard;
use crate::reply::{
    GenerativeStage, HeuristicStage, ReplyEngine, ReplyFinisher, ReplyPipeline, ReplyStage, TurnContext, TurnTrigger,
};
use crate::router::{LlmRouter, RoutedGenerator};
use crate::session::{SessionError, SessionStarted, SessionStatus, SessionStore};
use crate::workstream::{KeywordClassifier, TopicClassifier};

const START_MESSAGE: &str = "Simulation started. Timer is running.";
const END_MESSAGE: &str = "Session ended. Input is now locked.";

/// Generative capabilities per pipeline stage. `None` means that stage runs
/// without a model.
#[derive(Clone, Default)]
pub struct Generators {
    pub focus: Option<Arc<dyn TextGenerator>>,
    pub reply: Option<Arc<dyn TextGenerator>>,
    pub naturalizer: Option<Arc<dyn TextGenerator>>,
}

impl Generators {
    pub fn offline() -> Self {
        Self::default()
    }

    /// Same generator for every stage, honoring the enable flags.
    pub fn uniform(generator: Arc<dyn TextGenerator>, pipeline: &PipelineConfig) -> Self {
        Self {
            focus: pipeline.enable_focus.then(|| Arc::clone(&generator)),
            naturalizer: pipeline.enable_naturalizer.then(|| Arc::clone(&generator)),
            reply: Some(generator),
        }
    }

    pub fn from_router(router: &Arc<LlmRouter>, pipeline: &PipelineConfig) -> Self {
        Self {
            focus: if pipeline.enable_focus {
                RoutedGenerator::available(router, pipeline.focus_policy())
            } else {
                None
            },
            reply: RoutedGenerator::available(router, pipeline.reply_model.as_ref()),
            naturalizer: if pipeline.enable_naturalizer {
                RoutedGenerator::available(router, pipeline.naturalizer_policy())
            } else {
                None
            },
        }
    }

    /// Registers the configured providers and routes every stage through
    /// them. With no usable provider the result is offline.
    pub fn from_config(config: &DrillroomConfig) -> Self {
        let mut registry = ProviderRegistry::new();
        let registered = register_from_configs(&mut registry, &config.providers);
        if registered == 0 {
            tracing::warn!("no usable provider configured, replies will use heuristics only");
            return Self::offline();
        }
        let pipeline = &config.main.pipeline;
        let router = Arc::new(LlmRouter::new(
            registry,
            pipeline.model_aliases.clone(),
            pipeline.global_fallbacks.clone(),
        ));
        Self::from_router(&router, pipeline)
    }

    pub fn is_offline(&self) -> bool {
        self.focus.is_none() && self.reply.is_none() && self.naturalizer.is_none()
    }
}

/// Voices turns: gathers context, composes through the active delivery
/// path, waits the reply delay and persists the result. Also the scheduler's
/// beat sink.
pub struct TurnRunner {
    transcript: Arc<TranscriptStore>,
    sessions: Arc<SessionStore>,
    delivery: Arc<dyn BeatDelivery>,
    classifier: Arc<dyn TopicClassifier>,
    catalog: Arc<PersonaCatalog>,
    archive: Option<TranscriptArchive>,
    bus: BusPublisher,
}

impl TurnRunner {
    /// True while `runtime` is running and still the one registered under
    /// `session_id`. A restart under the same id swaps the runtime.
    fn still_current(&self, session_id: &str, runtime: &Arc<SessionRuntime>) -> bool {
        !runtime.is_ended()
            && self
                .sessions
                .get(session_id)
                .map(|handle| Arc::ptr_eq(handle.runtime(), runtime))
                .unwrap_or(false)
    }

    /// Appends without the duplicate check and announces the entry.
    pub async fn record(&self, message: Message) -> Message {
        let stored = self.transcript.append(message);
        self.announce(&stored).await;
        stored
    }

    async fn announce(&self, message: &Message) {
        if let Some(archive) = &self.archive {
            if let Err(e) = archive.append(message).await {
                tracing::warn!(session_id = %message.session_id, error = %e, "transcript archive write failed");
            }
        }
        let _ = self
            .bus
            .publish(BusMessage::TranscriptAppended {
                message: message.clone(),
            })
            .await;
    }

    /// Runs one persona turn. `None` when the session is unknown, ended or
    /// was restarted while the reply was pending, or the final duplicate
    /// check suppressed it.
    pub async fn run_turn(&self, session_id: &str, role: Role, trigger: TurnTrigger) -> Option<Message> {
        let runtime = Arc::clone(self.sessions.get(session_id).ok()?.runtime());
        let turn = TurnContext::gather(
            &self.transcript,
            self.classifier.as_ref(),
            session_id,
            role,
            trigger,
            Utc::now(),
        );
        let reply = self.delivery.compose(&turn).await;

        let delay = {
            let mut rng = rand::thread_rng();
            self.delivery.delay_for(&turn.trigger).sample(&mut rng)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !self.still_current(session_id, &runtime) {
            tracing::info!(session_id, role = %role, "session ended or restarted before reply landed, dropping it");
            return None;
        }

        let meta = MessageMeta {
            addressed_to: (!turn.trigger.is_beat()).then_some(Role::Participant),
            turn_id: Some(format!("turn_{}_{}", role, Utc::now().timestamp_millis())),
            persona_role: Some(self.catalog.title(role)),
            focus: reply.focus,
            reply_source: Some(reply.source),
            naturalized: reply.naturalized,
            role_violation: reply.violation,
            beat_index: turn.trigger.beat_index(),
            intent: turn.trigger.intent().map(str::to_string),
            duplicate_breaker: reply.duplicate_breaker,
            ..Default::default()
        };
        let message = Message::new(session_id, role, MessageKind::Question, reply.text).with_meta(meta);
        match self.transcript.append_unique(message) {
            AppendOutcome::Stored(stored) => {
                tracing::info!(
                    session_id,
                    role = %role,
                    source = reply.source.as_str(),
                    beat = ?turn.trigger.beat_index(),
                    naturalized = reply.naturalized,
                    duplicate_breaker = reply.duplicate_breaker,
                    "persona reply stored"
                );
                self.announce(&stored).await;
                Some(stored)
            }
            AppendOutcome::Suppressed { .. } => None,
        }
    }
}

#[async_trait]
impl BeatSink for TurnRunner {
    fn last_speaker(&self, session_id: &str) -> Option<Role> {
        self.transcript
            .session(session_id)
            .iter()
            .rev()
            .find(|m| m.role != Role::Participant)
            .map(|m| m.role)
    }

    async fn deliver(&self, cue: BeatCue) -> Result<()> {
        let session_id = cue.session_id.clone();
        let role = cue.role;
        self.run_turn(&session_id, role, TurnTrigger::Beat(cue)).await;
        Ok(())
    }
}

/// What an ingested event led to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestOutcome {
    /// `signal`, `direct`, `relayed` or `stored`.
    pub mode: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<Message>,
}

impl IngestOutcome {
    fn new(mode: &str, event: &SignalEvent) -> Self {
        Self {
            mode: mode.to_string(),
            event_type: event.name().to_string(),
            message: None,
            reply: None,
        }
    }
}

/// Builds a signal event from the loose boundary shape: an event type, a
/// free-form `data` object and top-level message fields.
pub fn parse_event(
    event_type: &str,
    data: &Value,
    text: Option<&str>,
    addressed_to: Option<&str>,
    thread_root: Option<&str>,
) -> Result<SignalEvent, SessionError> {
    let flag = |key: &str| data.get(key).and_then(Value::as_bool).unwrap_or(false);
    let field = |key: &str| data.get(key).and_then(Value::as_str);
    match event_type.trim() {
        "mic_state_changed" => Ok(SignalEvent::MicStateChanged {
            mic_active: flag("mic_active"),
        }),
        "speech_end" => Ok(SignalEvent::SpeechEnd),
        "typing_state_changed" => Ok(SignalEvent::TypingStateChanged {
            typing_active: flag("typing_active"),
        }),
        "participant_message" | "candidate_message" | "" => {
            let text = text.or_else(|| field("text")).unwrap_or_default().trim();
            if text.is_empty() {
                return Err(SessionError::Rejected("participant message has no text".into()));
            }
            let addressed_to = addressed_to
                .or_else(|| field("addressed_to"))
                .and_then(Role::parse)
                .filter(Role::is_persona);
            let thread_root = thread_root
                .or_else(|| field("thread_root"))
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Ok(SignalEvent::ParticipantMessage {
                text: text.to_string(),
                addressed_to,
                thread_root,
            })
        }
        other => Err(SessionError::Rejected(format!("unknown event type: {other}"))),
    }
}

/// Facade over sessions, scheduling, the reply pipeline and the transcript.
pub struct Orchestrator {
    scheduler_config: SchedulerConfig,
    sessions: Arc<SessionStore>,
    transcript: Arc<TranscriptStore>,
    runner: Arc<TurnRunner>,
    scheduler: TickScheduler,
    hooks: WorkflowHooks,
    catalog: Arc<PersonaCatalog>,
    archive: Option<TranscriptArchive>,
    bus: BusPublisher,
}

impl Orchestrator {
    pub fn new(config: &DrillroomConfig, generators: Generators, bus: BusPublisher) -> Result<Self> {
        let main = &config.main;
        let scenario = &main.scenario;
        let pipeline = &main.pipeline;

        let brief = Arc::new(
            scenario
                .brief_path
                .as_deref()
                .map(|p| IncidentBrief::load(&config.resolve_path(p)))
                .unwrap_or_default(),
        );
        let catalog = Arc::new(match scenario.personas_path.as_deref() {
            Some(p) => PersonaCatalog::load(&config.resolve_path(p))?,
            None => PersonaCatalog::default(),
        });
        let prompts = Arc::new(match scenario.persona_prompts_path.as_deref() {
            Some(p) => PersonaPrompts::load(&config.resolve_path(p))?,
            None => PersonaPrompts::default(),
        });
        let classifier: Arc<dyn TopicClassifier> =
            Arc::new(KeywordClassifier::with_overrides(&scenario.checklist_patterns)?);

        let transcript = Arc::new(TranscriptStore::new(main.transcript.store.clone()));
        let guard = Arc::new(RepetitionGuard::new(
            Arc::clone(&transcript),
            pipeline.own_history_lookback,
            pipeline.breaker_lookback,
        ));
        let finisher = Arc::new(ReplyFinisher::new(
            Arc::clone(&guard),
            Naturalizer::new(generators.naturalizer.clone()),
        ));
        let heuristic = HeuristicStage::new(Arc::clone(&brief));

        let delivery: Arc<dyn BeatDelivery> = match main.delivery.mode {
            DeliveryMode::InProcess => {
                let generative = generators.reply.clone().map(|generator| {
                    Arc::new(GenerativeStage::new(
                        generator,
                        Arc::clone(&catalog),
                        Arc::clone(&prompts),
                        Arc::clone(&brief),
                        Arc::clone(&guard),
                    )) as Arc<dyn ReplyStage>
                });
                let engine = ReplyEngine::new(
                    FocusClassifier::new(generators.focus.clone()),
                    ReplyPipeline::standard(generative, pipeline.strict, heuristic),
                    finisher,
                );
                tracing::info!(stages = ?engine.pipeline().stage_names(), "reply pipeline ready");
                Arc::new(InProcessDelivery::new(
                    Arc::new(engine),
                    pipeline.beat_delay,
                    pipeline.direct_delay,
                ))
            }
            DeliveryMode::Workflow => Arc::new(WorkflowDelivery::new(
                main.delivery.workflow.clone(),
                heuristic,
                finisher,
            )),
        };

        let archive = main
            .transcript
            .archive_dir
            .as_deref()
            .map(|dir| TranscriptArchive::new(config.resolve_path(dir)));
        let sessions = Arc::new(SessionStore::new());
        let runner = Arc::new(TurnRunner {
            transcript: Arc::clone(&transcript),
            sessions: Arc::clone(&sessions),
            delivery,
            classifier,
            catalog: Arc::clone(&catalog),
            archive: archive.clone(),
            bus: bus.clone(),
        });
        let scheduler = TickScheduler::new(main.orchestrator.clone(), Arc::clone(&runner) as Arc<dyn BeatSink>)
            .with_bus(bus.clone());

        Ok(Self {
            scheduler_config: main.orchestrator.clone(),
            sessions,
            transcript,
            runner,
            scheduler,
            hooks: WorkflowHooks::new(&main.delivery.workflow, &main.app.public_base_url),
            catalog,
            archive,
            bus,
        })
    }

    pub fn from_config(config: &DrillroomConfig, bus: BusPublisher) -> Result<Self> {
        Self::new(config, Generators::from_config(config), bus)
    }

    pub fn catalog(&self) -> &PersonaCatalog {
        &self.catalog
    }

    pub fn transcript(&self) -> &Arc<TranscriptStore> {
        &self.transcript
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Starts (or restarts) a session and arms its scheduler.
    pub async fn start_session(&self, session_id: Option<String>, duration_sec: Option<u64>) -> SessionStarted {
        let session_id = session_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("sess_{}", Uuid::new_v4().simple()));
        let duration_sec = self.scheduler_config.effective_duration(duration_sec);
        let plan = {
            let mut rng = rand::thread_rng();
            TurnPlan::materialize(duration_sec, self.scheduler_config.compressed_max_duration_sec, &mut rng)
        };
        let beats = plan.len();
        let runtime = Arc::new(SessionRuntime::new(session_id.clone(), plan));
        let handle = self.sessions.create(Arc::clone(&runtime));

        if let Some(archive) = &self.archive {
            if let Err(e) = archive
                .start_session(&session_id, runtime.started_at(), duration_sec)
                .await
            {
                tracing::warn!(session_id = %session_id, error = %e, "transcript archive not started");
            }
        }
        let workflow = self.hooks.notify_start(&session_id, duration_sec).await;

        self.runner
            .record(Message::system(&session_id, MessageKind::SessionStart, START_MESSAGE))
            .await;
        let _ = self
            .bus
            .publish(BusMessage::SessionStarted {
                session_id: session_id.clone(),
                started_at: runtime.started_at(),
                end_at: runtime.end_at(),
                beats,
            })
            .await;
        handle.attach_ticker(self.scheduler.spawn(Arc::clone(&runtime)));

        tracing::info!(
            session_id = %session_id,
            duration_sec,
            beats,
            compressed = runtime.plan().is_compressed(),
            "session started"
        );
        SessionStarted {
            session_id,
            started_at_ms: runtime.started_at().timestamp_millis(),
            end_at_ms: runtime.end_at().timestamp_millis(),
            duration_sec,
            workflow,
        }
    }

    /// Ends the session, cancels its scheduler and returns the evaluation.
    pub async fn stop_session(&self, session_id: &str) -> Result<EvaluationReport, SessionError> {
        let handle = self.sessions.get(session_id)?;
        let first = handle.stop();
        if !first {
            if let Some(report) = handle.evaluation() {
                return Ok(report);
            }
        }
        announce_end(&self.bus, handle.runtime()).await;

        let report = evaluate_transcript(session_id, &self.transcript.session(session_id));
        handle.store_evaluation(report.clone());
        if first {
            self.runner
                .record(Message::system(session_id, MessageKind::SessionEnd, END_MESSAGE))
                .await;
        }
        tracing::info!(
            session_id,
            total = report.total_score,
            recommendation = ?report.recommendation,
            "session stopped"
        );
        Ok(report)
    }

    pub fn status(&self, session_id: &str) -> Result<SessionStatus, SessionError> {
        let handle = self.sessions.get(session_id)?;
        Ok(SessionStatus::of(handle.runtime()))
    }

    /// Applies a participant signal. Messages addressed to a persona get a
    /// direct reply; other messages are relayed to the workflow engine when
    /// one listens.
    pub async fn ingest_event(&self, session_id: &str, event: SignalEvent) -> Result<IngestOutcome, SessionError> {
        let handle = self.sessions.get(session_id)?;
        let runtime = handle.writable()?;
        runtime.apply_signal(&event);

        let SignalEvent::ParticipantMessage {
            text,
            addressed_to,
            thread_root,
        } = &event
        else {
            tracing::debug!(session_id, event = event.name(), "signal applied");
            return Ok(IngestOutcome::new("signal", &event));
        };

        let stored = self
            .runner
            .record(
                Message::new(session_id, Role::Participant, MessageKind::ParticipantMessage, text.as_str()).with_meta(
                    MessageMeta {
                        addressed_to: *addressed_to,
                        thread_root: thread_root.clone(),
                        ..Default::default()
                    },
                ),
            )
            .await;

        if let Some(role) = addressed_to.filter(Role::is_persona) {
            let reply = self
                .runner
                .run_turn(session_id, role, TurnTrigger::Direct { text: text.clone() })
                .await;
            let mut outcome = IngestOutcome::new("direct", &event);
            outcome.message = Some(stored);
            outcome.reply = reply;
            return Ok(outcome);
        }

        let mut outcome = IngestOutcome::new("stored", &event);
        if self.hooks.has_event_hook() {
            match self
                .hooks
                .relay_event(session_id, event.name(), text, None, thread_root.as_deref())
                .await
            {
                Ok(()) => outcome.mode = "relayed".to_string(),
                Err(e) => tracing::warn!(session_id, error = %e, "workflow event relay failed"),
            }
        }
        outcome.message = Some(stored);
        Ok(outcome)
    }

    pub async fn submit_code(&self, session_id: &str, code: &str) -> Result<Message, SessionError> {
        let handle = self.sessions.get(session_id)?;
        let runtime = handle.writable()?;
        let code = code.trim();
        if code.is_empty() {
            return Err(SessionError::MissingCode);
        }
        runtime.record_participant_activity();
        Ok(self
            .runner
            .record(Message::new(session_id, Role::Participant, MessageKind::ParticipantCode, code))
            .await)
    }

    /// Persists a reply pushed back by the workflow engine. `None` when the
    /// final duplicate check suppressed it.
    pub async fn record_agent_message(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
        thread_root: Option<String>,
    ) -> Result<Option<Message>, SessionError> {
        let handle = self.sessions.get(session_id)?;
        handle.writable()?;
        if !role.is_persona() {
            return Err(SessionError::Rejected(format!("{role} is not a persona role")));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::Rejected("agent message has no text".into()));
        }
        let message = Message::new(session_id, role, MessageKind::Question, text).with_meta(MessageMeta {
            thread_root,
            persona_role: Some(self.catalog.title(role)),
            reply_source: Some(drillroom_schema::ReplySource::Workflow),
            ..Default::default()
        });
        match self.transcript.append_unique(message) {
            AppendOutcome::Stored(stored) => {
                self.runner.announce(&stored).await;
                Ok(Some(stored))
            }
            AppendOutcome::Suppressed { .. } => Ok(None),
        }
    }

    /// Computes and stores the report from the transcript as it stands.
    pub fn evaluate(&self, session_id: &str) -> Result<EvaluationReport, SessionError> {
        let handle = self.sessions.get(session_id)?;
        let report = evaluate_transcript(session_id, &self.transcript.session(session_id));
        handle.store_evaluation(report.clone());
        Ok(report)
    }

    pub fn evaluation(&self, session_id: &str) -> Result<Option<EvaluationReport>, SessionError> {
        Ok(self.sessions.get(session_id)?.evaluation())
    }

    /// All messages, or one session's, oldest first.
    pub fn messages(&self, session_id: Option<&str>) -> Vec<Message> {
        match session_id {
            Some(id) => self.transcript.session(id),
            None => self.transcript.all(),
        }
    }

    pub fn clear(&self, session_id: Option<&str>) -> usize {
        let removed = self.transcript.clear(session_id);
        tracing::info!(session_id = ?session_id, removed, "transcript cleared");
        removed
    }

    /// Stops every session's scheduler.
    pub fn shutdown(&self) {
        self.sessions.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parse_event_shapes() {
        assert_eq!(
            parse_event("mic_state_changed", &json!({"mic_active": true}), None, None, None),
            Ok(SignalEvent::MicStateChanged { mic_active: true })
        );
        assert_eq!(
            parse_event("typing_state_changed", &json!({}), None, None, None),
            Ok(SignalEvent::TypingStateChanged { typing_active: false })
        );
        assert_eq!(
            parse_event("candidate_message", &Value::Null, Some(" hotfix first "), Some("techlead"), Some(" ")),
            Ok(SignalEvent::ParticipantMessage {
                text: "hotfix first".into(),
                addressed_to: Some(Role::TechLead),
                thread_root: None,
            })
        );
        assert_eq!(
            parse_event(
                "participant_message",
                &json!({"text": "eta?", "addressed_to": "everyone", "thread_root": "msg_1"}),
                None,
                None,
                None
            ),
            Ok(SignalEvent::ParticipantMessage {
                text: "eta?".into(),
                addressed_to: None,
                thread_root: Some("msg_1".into()),
            })
        );
    }

    #[test]
    fn parse_event_rejections() {
        let err = parse_event("video_frame", &Value::Null, None, None, None).unwrap_err();
        assert_eq!(err.code(), "invalid_event");
        assert!(parse_event("participant_message", &Value::Null, Some("   "), None, None).is_err());
    }

    #[test]
    fn uniform_generators_respect_flags() {
        struct Echo;

        #[async_trait]
        impl TextGenerator for Echo {
            async fn generate(
                &self,
                _system: &str,
                user: &str,
                _profile: crate::llm::GenerationProfile,
            ) -> Result<String> {
                Ok(user.to_string())
            }
        }

        let pipeline = PipelineConfig {
            enable_focus: false,
            ..Default::default()
        };
        let generators = Generators::uniform(Arc::new(Echo), &pipeline);
        assert!(generators.focus.is_none());
        assert!(generators.reply.is_some());
        assert!(generators.naturalizer.is_some());
        assert!(!generators.is_offline());
        assert!(Generators::offline().is_offline());
    }

    #[test]
    fn config_without_providers_is_offline() {
        let config = DrillroomConfig::offline(std::env::temp_dir());
        assert!(Generators::from_config(&config).is_offline());
    }
}
