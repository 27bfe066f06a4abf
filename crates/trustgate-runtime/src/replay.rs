//! Staged replay of a stored run.
//!
//! A replay copies the source run's stage artifacts, applies caller
//! overrides, and recomputes every stage from `replay_from_stage` onward.
//! An overridden stage is pinned: it is never recomputed, but the stages
//! after it are. The question is an input and is never recomputed.
//!
//! Every replay persists a new run pointing at its source, including
//! replays that were blocked by the input guard or whose generator failed.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use trustgate_core::alerts::metric;
use trustgate_core::{
    parse_generation, replay_triage, GenerationOutput, ParseArtifact, Provenance, Run, RunStatus,
    Stage, StageArtifactSet, StageOverrides, StageValue, TriageInput,
};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::execution::{GenerationStep, StageCollaborators, StageExecutor};
use crate::pipeline::{elapsed_ms, ExecutionOptions, DEFAULT_CORPUS};
use crate::prompts::truncate_chars;
use crate::store::{event, RunPatch, RunStore, StoreError};

pub mod tag {
    pub const REPLAY_FROM_STAGE: &str = "replay_from_stage";
    pub const RECOMPUTED_STAGES: &str = "recomputed_stages";
    pub const CARRIED_STAGES: &str = "carried_stages";
    pub const OVERRIDDEN_STAGES: &str = "overridden_stages";
}

pub use trustgate_core::alerts::metric::PARSE_SUCCESS;
pub const PROMPT_LENGTH_CHARS: &str = "prompt_length_chars";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReplayError {
    #[error("source run {id} not found")]
    SourceNotFound { id: String },

    #[error("replay stage index {0} is out of range 0..=5")]
    InvalidStageIndex(u8),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequest {
    pub source_run_id: String,
    pub replay_from_stage: Stage,
    #[serde(default)]
    pub overrides: StageOverrides,
    #[serde(skip)]
    pub options: ExecutionOptions,
}

impl ReplayRequest {
    pub fn new(source_run_id: impl Into<String>, replay_from_stage: Stage) -> Self {
        Self {
            source_run_id: source_run_id.into(),
            replay_from_stage,
            overrides: StageOverrides::default(),
            options: ExecutionOptions::default(),
        }
    }

    /// Build from a numeric stage index, as sent over the wire.
    pub fn from_index(source_run_id: impl Into<String>, index: u8) -> Result<Self, ReplayError> {
        let stage = Stage::from_index(index).ok_or(ReplayError::InvalidStageIndex(index))?;
        Ok(Self::new(source_run_id, stage))
    }

    pub fn with_overrides(mut self, overrides: StageOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    pub fn with_options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOutcome {
    pub run: Run,
    pub recomputed: Vec<Stage>,
    pub carried: Vec<Stage>,
    pub overridden: Vec<Stage>,
}

impl ReplayOutcome {
    pub fn blocked(&self) -> bool {
        self.run.status == RunStatus::Blocked
    }
}

fn stage_list(stages: &[Stage]) -> String {
    stages
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

/// Where recomputation stopped early.
enum Halt {
    Blocked(String),
    Upstream { stage: Stage, error: String },
}

pub struct ReplayEngine {
    executor: StageExecutor,
    store: Arc<dyn RunStore>,
    default_top_k: usize,
    question_param_max_chars: usize,
}

impl ReplayEngine {
    pub fn new(
        config: &RuntimeConfig,
        collaborators: StageCollaborators,
        store: Arc<dyn RunStore>,
    ) -> Self {
        Self {
            executor: StageExecutor::new(
                collaborators,
                config.generator.clone(),
                config.replay.system_prompt.clone(),
            ),
            store,
            default_top_k: config.replay.default_top_k,
            question_param_max_chars: config.replay.question_param_max_chars,
        }
    }

    pub async fn replay(&self, request: ReplayRequest) -> Result<ReplayOutcome, ReplayError> {
        let started = Instant::now();
        let source = self
            .store
            .get(&request.source_run_id)
            .await
            .map_err(|e| match e {
                StoreError::NotFound { id } => ReplayError::SourceNotFound { id },
                other => ReplayError::Store(other),
            })?;
        let from = request.replay_from_stage;

        let mut stages = source.stages.carried();
        let overridden = stages.apply_overrides(request.overrides);
        let pinned = |stage: Stage| overridden.contains(&stage);

        let options = &request.options;
        let corpus = options
            .corpus
            .clone()
            .or_else(|| source.params.get("corpus").and_then(|v| v.as_str()).map(String::from))
            .unwrap_or_else(|| DEFAULT_CORPUS.to_string());
        let top_k = options
            .top_k
            .or_else(|| source.params.get("top_k").and_then(|v| v.as_u64()).map(|k| k as usize))
            .unwrap_or(self.default_top_k);
        let params = self
            .executor
            .params(options.model.clone(), options.temperature);

        let question = stages.question_text().unwrap_or_default().to_string();
        let mut notes = Vec::new();
        let mut halt = None;

        for stage in Stage::ALL {
            if !stage.in_replay_range(from) || pinned(stage) || stage == Stage::Question {
                continue;
            }
            debug!(stage = %stage, "recomputing stage");
            match stage {
                Stage::Question => {}
                Stage::Retrieval => match self.executor.retrieve(&question, &corpus, top_k).await {
                    Ok(chunks) => stages.retrieval = Some(StageValue::recomputed(chunks)),
                    Err(e) => {
                        halt = Some(Halt::Upstream { stage, error: e.to_string() });
                        break;
                    }
                },
                Stage::SummaryContext => {
                    let result = self.executor.summarize(&question, stages.chunks()).await;
                    match result {
                        Ok(summary) => stages.summary_context = Some(StageValue::recomputed(summary)),
                        Err(e) => {
                            halt = Some(Halt::Upstream { stage, error: e.to_string() });
                            break;
                        }
                    }
                }
                Stage::PromptAssembly => {
                    let summary = stages
                        .summary_context
                        .as_ref()
                        .map(|s| s.value.clone())
                        .unwrap_or(serde_json::Value::Null);
                    let result = self
                        .executor
                        .assemble(&question, stages.chunks(), &summary)
                        .await;
                    match result {
                        Ok(prompt) => stages.prompt_assembly = Some(StageValue::recomputed(prompt)),
                        Err(e) => {
                            halt = Some(Halt::Upstream { stage, error: e.to_string() });
                            break;
                        }
                    }
                }
                Stage::Generation => {
                    let prompt = stages.prompt_text().unwrap_or_default().to_string();
                    let step = self.executor.generate(&prompt, &params).await;
                    notes.extend(step.guard_notes());
                    // Record what was sent; an override stays as given
                    if let Some(sent) = step.sent_prompt().filter(|sent| *sent != prompt) {
                        if !pinned(Stage::PromptAssembly) {
                            stages.prompt_assembly = Some(StageValue::recomputed(sent.to_string()));
                        }
                    }
                    match step {
                        GenerationStep::Blocked { verdict } => {
                            halt = Some(Halt::Blocked(verdict.message.unwrap_or_default()));
                            break;
                        }
                        other => stages.generation = other.output().map(StageValue::recomputed),
                    }
                }
                Stage::Parse => {
                    stages.parse = Some(StageValue::recomputed(parse_stage(&stages)));
                }
            }
        }

        let status = match halt {
            Some(Halt::Blocked(message)) => {
                // Nothing downstream of the prompt belongs to this replay
                stages.generation = None;
                stages.parse = None;
                notes.push(format!("Blocked by input guard: {}", message));
                RunStatus::Blocked
            }
            Some(Halt::Upstream { stage, error }) => {
                warn!(stage = %stage, error = %error, "replay stage failed");
                clear_from(&mut stages, stage, &overridden);
                let message = format!("{} failed: {}", stage, error);
                if !pinned(Stage::Generation) {
                    stages.generation = Some(StageValue::recomputed(GenerationOutput::Error(message.clone())));
                }
                if !pinned(Stage::Parse) {
                    stages.parse = Some(StageValue::recomputed(parse_stage(&stages)));
                }
                notes.push(message);
                // A pinned generation does not make up for missing upstream stages
                RunStatus::Failed
            }
            None => status_for(&stages),
        };

        let recomputed = stages.stages_with(Provenance::Recomputed);
        let carried = stages.stages_with(Provenance::Source);
        let overridden_stages = stages.stages_with(Provenance::Overridden);

        let response_text = stages.generation_text().unwrap_or_default().to_string();
        let parse_ok = stages.parse.as_ref().is_some_and(|p| p.value.succeeded());
        let generation_failed = stages.generation.as_ref().map_or(true, |g| g.value.is_error());
        let retrieval_count = stages.retrieval_count();
        let prompt_chars = stages.prompt_text().map_or(0, |p| p.chars().count());

        let triage = replay_triage(&TriageInput {
            response_text: &response_text,
            parse_succeeded: parse_ok,
            retrieval_count,
            generation_failed,
        });

        let mut patch = RunPatch::new()
            .status(status)
            .triage(triage.clone())
            .param("model", json!(params.model))
            .param("temperature", json!(params.temperature))
            .param(
                "user_question",
                json!(truncate_chars(&question, self.question_param_max_chars)),
            )
            .tag(tag::REPLAY_FROM_STAGE, from.as_str())
            .tag(tag::RECOMPUTED_STAGES, stage_list(&recomputed))
            .tag(tag::CARRIED_STAGES, stage_list(&carried))
            .tag(tag::OVERRIDDEN_STAGES, stage_list(&overridden_stages));
        patch = if status == RunStatus::Blocked {
            [
                metric::LATENCY_MS,
                metric::CONFIDENCE,
                PARSE_SUCCESS,
                metric::RETRIEVAL_COUNT,
                PROMPT_LENGTH_CHARS,
            ]
            .into_iter()
            .fold(patch, |p, name| p.metric(name, 0.0))
        } else {
            patch
                .metric(metric::LATENCY_MS, elapsed_ms(started))
                .metric(metric::CONFIDENCE, triage.score)
                .metric(PARSE_SUCCESS, if parse_ok { 1.0 } else { 0.0 })
                .metric(metric::RETRIEVAL_COUNT, retrieval_count as f64)
                .metric(PROMPT_LENGTH_CHARS, prompt_chars as f64)
        };
        for note in notes {
            patch = patch.note(note);
        }

        let mut child = Run::new(Uuid::new_v4().to_string());
        child.parent_id = Some(source.id.clone());
        child.status = RunStatus::Running;
        child.stages = stages;
        let child_id = child.id.clone();
        self.store.create(child).await?;
        let run = self.store.upsert(&child_id, patch).await?;

        self.store
            .append_event(
                &child_id,
                event::REPLAY_CREATED,
                json!({
                    "source_run_id": source.id,
                    "replay_from_stage": from.as_str(),
                    "status": status.as_str(),
                    "recomputed_stages": recomputed,
                }),
            )
            .await?;
        if status == RunStatus::Blocked {
            self.store
                .append_event(&child_id, event::RUN_BLOCKED, json!({ "stage": Stage::Generation }))
                .await?;
        }
        info!(
            run_id = %child_id,
            parent_id = %source.id,
            from = %from,
            status = %status,
            triage = triage.score,
            "replay persisted"
        );

        Ok(ReplayOutcome {
            run,
            recomputed,
            carried,
            overridden: overridden_stages,
        })
    }
}

fn parse_stage(stages: &StageArtifactSet) -> ParseArtifact {
    match stages.generation.as_ref().map(|g| &g.value) {
        Some(GenerationOutput::Text(text)) => parse_generation(text),
        Some(GenerationOutput::Error(e)) => ParseArtifact::failure(format!("generation failed: {}", e)),
        None => ParseArtifact::failure("no generation output"),
    }
}

fn status_for(stages: &StageArtifactSet) -> RunStatus {
    match stages.generation.as_ref() {
        Some(g) if !g.value.is_error() => RunStatus::Completed,
        _ => RunStatus::Failed,
    }
}

/// Drop carried values from `failed` up to the prompt; they were due for
/// recompute and must not appear as this replay's output.
fn clear_from(stages: &mut StageArtifactSet, failed: Stage, overridden: &[Stage]) {
    for stage in [Stage::Retrieval, Stage::SummaryContext, Stage::PromptAssembly] {
        if stage < failed || overridden.contains(&stage) {
            continue;
        }
        match stage {
            Stage::Retrieval => stages.retrieval = None,
            Stage::SummaryContext => stages.summary_context = None,
            Stage::PromptAssembly => stages.prompt_assembly = None,
            _ => {}
        }
    }
}
