use std::sync::Arc;

use async_trait::async_trait;
use drillroom_schema::{FocusDecision, ReplySource};

use super::{HeuristicStage, TurnContext};

pub const STRICT_FALLBACK_LINE: &str =
    "Let us stay on incident execution. Confirm your next containment action and one validation signal.";

/// One candidate reply and the stage that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub source: ReplySource,
}

/// A step of the fallback chain. Returning `None` hands the turn to the next
/// stage.
#[async_trait]
pub trait ReplyStage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn draft(&self, turn: &TurnContext, focus: &FocusDecision) -> Option<Draft>;
}

/// Uses the classifier's nudge verbatim when the participant drifted.
pub struct NudgeStage;

#[async_trait]
impl ReplyStage for NudgeStage {
    fn name(&self) -> &'static str {
        "nudge"
    }

    async fn draft(&self, _turn: &TurnContext, focus: &FocusDecision) -> Option<Draft> {
        let nudge = focus.nudge.trim();
        if !focus.is_drifting() || nudge.is_empty() {
            return None;
        }
        Some(Draft {
            text: nudge.to_string(),
            source: ReplySource::NudgeOnly,
        })
    }
}

/// Strict mode: never fall through to scripted heuristics while a
/// generative capability is configured; redirect instead.
pub struct StrictStage;

#[async_trait]
impl ReplyStage for StrictStage {
    fn name(&self) -> &'static str {
        "strict"
    }

    async fn draft(&self, _turn: &TurnContext, focus: &FocusDecision) -> Option<Draft> {
        let nudge = focus.nudge.trim();
        let text = if nudge.is_empty() { STRICT_FALLBACK_LINE } else { nudge };
        Some(Draft {
            text: text.to_string(),
            source: ReplySource::NudgeOnly,
        })
    }
}

/// Ordered stages ending in the heuristic, which always answers.
pub struct ReplyPipeline {
    stages: Vec<Arc<dyn ReplyStage>>,
    terminal: HeuristicStage,
}

impl ReplyPipeline {
    pub fn new(terminal: HeuristicStage) -> Self {
        Self {
            stages: Vec::new(),
            terminal,
        }
    }

    pub fn with_stage(mut self, stage: Arc<dyn ReplyStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Generative draft (when available), nudge, strict redirect (strict mode
    /// with a generative capability only), heuristic.
    pub fn standard(generative: Option<Arc<dyn ReplyStage>>, strict: bool, terminal: HeuristicStage) -> Self {
        let has_generative = generative.is_some();
        let mut pipeline = Self::new(terminal);
        if let Some(stage) = generative {
            pipeline = pipeline.with_stage(stage);
        }
        pipeline = pipeline.with_stage(Arc::new(NudgeStage));
        if strict && has_generative {
            pipeline = pipeline.with_stage(Arc::new(StrictStage));
        }
        pipeline
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages
            .iter()
            .map(|s| s.name())
            .chain(std::iter::once("heuristic"))
            .collect()
    }

    pub async fn run(&self, turn: &TurnContext, focus: &FocusDecision) -> Draft {
        for stage in &self.stages {
            match stage.draft(turn, focus).await {
                Some(draft) if !draft.text.trim().is_empty() => {
                    tracing::debug!(
                        session_id = %turn.session_id,
                        role = %turn.role,
                        stage = stage.name(),
                        "reply drafted"
                    );
                    return draft;
                }
                _ => {}
            }
        }
        self.terminal.compose(turn)
    }
}
