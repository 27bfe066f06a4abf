//! The primary answer flow: stages, guards, generation, scoring, alerts.

use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{info, warn};
use trustgate_core::alerts::metric;
use trustgate_core::{
    parse_generation, Alert, AlertEvaluator, JudgeError, ParseArtifact, Run, RunStatus,
    StageArtifactSet, StageValue,
};
use uuid::Uuid;

use crate::alerts::AlertService;
use crate::collaborators::Judge;
use crate::config::RuntimeConfig;
use crate::deep_eval::DeepEvalScheduler;
use crate::execution::{GenerationStep, StageCollaborators, StageExecutor};
use crate::judge::JudgeInvoker;
use crate::scoring::{ConfidenceService, ScoringError};
use crate::store::{event, AlertStore, RunPatch, RunStore, StoreError};

pub const DEFAULT_CORPUS: &str = "default";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-request execution options. Unset fields fall back to config.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub corpus: Option<String>,
    pub top_k: Option<usize>,
}

#[derive(Debug)]
pub struct AnswerOutcome {
    pub run: Run,
    pub alerts: Vec<Alert>,
    /// Set when the run finished but could not be scored
    pub confidence_error: Option<JudgeError>,
    /// Present when the run was sampled for deep evaluation
    pub deep_eval: Option<JoinHandle<()>>,
}

pub struct AnswerPipeline {
    executor: StageExecutor,
    scoring: ConfidenceService,
    alerts: AlertService,
    deep_eval: Option<DeepEvalScheduler>,
    store: Arc<dyn RunStore>,
    default_top_k: usize,
}

impl AnswerPipeline {
    pub fn new(
        config: &RuntimeConfig,
        collaborators: StageCollaborators,
        judge: Arc<dyn Judge>,
        store: Arc<dyn RunStore>,
        alert_store: Arc<dyn AlertStore>,
    ) -> Self {
        Self {
            executor: StageExecutor::new(
                collaborators,
                config.generator.clone(),
                config.replay.system_prompt.clone(),
            ),
            scoring: ConfidenceService::new(JudgeInvoker::new(judge, &config.judge)),
            alerts: AlertService::new(
                AlertEvaluator::new(config.alerts.latency_threshold_ms),
                alert_store,
            ),
            deep_eval: None,
            store,
            default_top_k: config.replay.default_top_k,
        }
    }

    pub fn with_deep_eval(mut self, scheduler: DeepEvalScheduler) -> Self {
        self.deep_eval = Some(scheduler);
        self
    }

    pub fn alerts(&self) -> &AlertService {
        &self.alerts
    }

    pub fn scoring(&self) -> &ConfidenceService {
        &self.scoring
    }

    /// Answer `question` from `options.corpus` and persist the run.
    ///
    /// Collaborator failures end up in the run (status `failed` or
    /// `blocked`); only store failures are returned as errors.
    pub async fn run(
        &self,
        question: &str,
        options: &ExecutionOptions,
    ) -> Result<AnswerOutcome, PipelineError> {
        let started = Instant::now();
        let corpus = options.corpus.as_deref().unwrap_or(DEFAULT_CORPUS);
        let top_k = options.top_k.unwrap_or(self.default_top_k);

        let mut run = Run::new(Uuid::new_v4().to_string());
        run.status = RunStatus::Running;
        run.params.insert("corpus".into(), json!(corpus));
        run.params.insert("top_k".into(), json!(top_k));
        run.params.insert("model".into(), json!(options.model));
        let run_id = run.id.clone();
        self.store.create(run).await?;
        self.store
            .append_event(&run_id, event::RUN_CREATED, json!({ "corpus": corpus }))
            .await?;
        info!(run_id = %run_id, corpus, "run created");

        let mut stages = StageArtifactSet {
            question: Some(StageValue::source(question.to_string())),
            ..Default::default()
        };

        let chunks = match self.executor.retrieve(question, corpus, top_k).await {
            Ok(chunks) => chunks,
            Err(e) => return self.fail_early(&run_id, stages, "retrieval", e.to_string()).await,
        };
        stages.retrieval = Some(StageValue::source(chunks.clone()));

        let summary = match self.executor.summarize(question, &chunks).await {
            Ok(summary) => summary,
            Err(e) => return self.fail_early(&run_id, stages, "summary_context", e.to_string()).await,
        };
        stages.summary_context = Some(StageValue::source(summary.clone()));

        let prompt = match self.executor.assemble(question, &chunks, &summary).await {
            Ok(prompt) => prompt,
            Err(e) => return self.fail_early(&run_id, stages, "prompt_assembly", e.to_string()).await,
        };
        stages.prompt_assembly = Some(StageValue::source(prompt.clone()));

        let params = self
            .executor
            .params(options.model.clone(), options.temperature);
        let step = self.executor.generate(&prompt, &params).await;
        if let Some(sent) = step.sent_prompt().filter(|sent| *sent != prompt) {
            stages.prompt_assembly = Some(StageValue::source(sent.to_string()));
        }
        let mut patch = RunPatch::new()
            .metric(metric::RETRIEVAL_COUNT, chunks.len() as f64)
            .param("temperature", json!(params.temperature));
        for note in step.guard_notes() {
            patch = patch.note(note);
        }

        let (status, kind) = match &step {
            GenerationStep::Blocked { verdict } => {
                let run = self
                    .store
                    .upsert(
                        &run_id,
                        patch
                            .stages(stages)
                            .status(RunStatus::Blocked)
                            .metric(metric::LATENCY_MS, elapsed_ms(started)),
                    )
                    .await?;
                self.store
                    .append_event(
                        &run_id,
                        event::RUN_BLOCKED,
                        json!({ "failures": verdict.failures, "message": verdict.message }),
                    )
                    .await?;
                info!(run_id = %run_id, "run blocked by input guard");
                return Ok(AnswerOutcome {
                    run,
                    alerts: Vec::new(),
                    confidence_error: None,
                    deep_eval: None,
                });
            }
            GenerationStep::Generated { text, .. } => {
                stages.parse = Some(StageValue::source(parse_generation(text)));
                (RunStatus::Completed, event::RUN_COMPLETED)
            }
            GenerationStep::Failed { error, .. } => {
                stages.parse = Some(StageValue::source(ParseArtifact::failure(format!(
                    "generation failed: {}",
                    error
                ))));
                (RunStatus::Failed, event::RUN_FAILED)
            }
        };
        stages.generation = step.output().map(StageValue::source);

        let parse_ok = stages.parse.as_ref().is_some_and(|p| p.value.succeeded());
        let run = self
            .store
            .upsert(
                &run_id,
                patch
                    .stages(stages)
                    .status(status)
                    .metric(metric::PARSE_SUCCESS, if parse_ok { 1.0 } else { 0.0 })
                    .metric(metric::LATENCY_MS, elapsed_ms(started)),
            )
            .await?;
        self.store
            .append_event(&run_id, kind, json!({ "parse_success": parse_ok }))
            .await?;
        info!(run_id = %run_id, status = %run.status, "run finished");

        if run.status != RunStatus::Completed {
            return Ok(AnswerOutcome {
                run,
                alerts: Vec::new(),
                confidence_error: None,
                deep_eval: None,
            });
        }

        let (run, confidence_error) = match self.scoring.recompute(self.store.as_ref(), &run_id).await {
            Ok(run) => (run, None),
            Err(ScoringError::Judge(e)) => (self.store.get(&run_id).await?, Some(e)),
            Err(ScoringError::Store(e)) => return Err(e.into()),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "run not scored");
                (self.store.get(&run_id).await?, None)
            }
        };

        let alerts = self.alerts.evaluate_and_store(&run).await?;
        let deep_eval = match &self.deep_eval {
            Some(scheduler) => scheduler.maybe_schedule(&run).await,
            None => None,
        };

        Ok(AnswerOutcome {
            run,
            alerts,
            confidence_error,
            deep_eval,
        })
    }

    async fn fail_early(
        &self,
        run_id: &str,
        stages: StageArtifactSet,
        stage: &str,
        error: String,
    ) -> Result<AnswerOutcome, PipelineError> {
        warn!(run_id, stage, error = %error, "stage collaborator failed");
        let run = self
            .store
            .upsert(
                run_id,
                RunPatch::new()
                    .stages(stages)
                    .status(RunStatus::Failed)
                    .note(format!("{} failed: {}", stage, error)),
            )
            .await?;
        self.store
            .append_event(run_id, event::RUN_FAILED, json!({ "stage": stage, "error": error }))
            .await?;
        Ok(AnswerOutcome {
            run,
            alerts: Vec::new(),
            confidence_error: None,
            deep_eval: None,
        })
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
