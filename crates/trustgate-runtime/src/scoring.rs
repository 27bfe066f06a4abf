//! Confidence computation against stored runs.
//!
//! `compute` is a function of the run's stage artifacts only; `recompute`
//! writes the result back. Running either twice on an unchanged run yields
//! the same report, so concurrent recomputes need no coordination beyond
//! the store's per-patch atomicity.

use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};
use trustgate_core::alerts::metric;
use trustgate_core::{
    ConfidenceAggregator, ConfidenceInputs, ConfidenceReport, JudgeError, RetrievedChunk, Run,
    SignalCollector,
};

use crate::judge::JudgeInvoker;
use crate::store::{event, RunPatch, RunStore, StoreError};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScoringError {
    #[error("run {run_id} has no question to score against")]
    MissingQuestion { run_id: String },

    #[error("run {run_id} has no generated answer to score")]
    MissingAnswer { run_id: String },

    #[error(transparent)]
    Judge(#[from] JudgeError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct ConfidenceService {
    invoker: JudgeInvoker,
    collector: SignalCollector,
    aggregator: ConfidenceAggregator,
}

impl ConfidenceService {
    pub fn new(invoker: JudgeInvoker) -> Self {
        Self {
            invoker,
            collector: SignalCollector::new(),
            aggregator: ConfidenceAggregator::new(),
        }
    }

    /// Score one answer. The policy judge is skipped when the regex scan
    /// already found PII/PCI, since the policy component is 0 either way.
    pub async fn score(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        answer: &str,
    ) -> Result<ConfidenceReport, JudgeError> {
        let signals = self.collector.collect(chunks, answer);
        debug!(
            retrieval_quality = signals.retrieval.score,
            pii_hits = signals.policy_scan.hits.len(),
            "signals collected"
        );

        let policy_judgment = if signals.policy_scan.is_clean() {
            Some(self.invoker.judge_policy(answer).await?)
        } else {
            None
        };
        let grounding = self
            .invoker
            .judge_groundedness(question, chunks, answer)
            .await?;

        Ok(self.aggregator.aggregate(&ConfidenceInputs {
            answer,
            retrieval: &signals.retrieval,
            policy_scan: &signals.policy_scan,
            policy_judgment: policy_judgment.as_ref(),
            grounding: &grounding,
        }))
    }

    /// Score a run from its stored stage artifacts.
    pub async fn compute(&self, run: &Run) -> Result<ConfidenceReport, ScoringError> {
        let question = run
            .stages
            .question_text()
            .ok_or_else(|| ScoringError::MissingQuestion {
                run_id: run.id.clone(),
            })?;
        let answer = match &run.stages.generation {
            Some(g) if !g.value.is_error() => g.value.text(),
            _ => {
                return Err(ScoringError::MissingAnswer {
                    run_id: run.id.clone(),
                })
            }
        };

        Ok(self.score(question, run.stages.chunks(), answer).await?)
    }

    /// Compute and persist confidence for a stored run.
    ///
    /// On a judge failure the run keeps its prior confidence; the failure
    /// is recorded as a note and a `confidence_error` event.
    pub async fn recompute(&self, store: &dyn RunStore, run_id: &str) -> Result<Run, ScoringError> {
        let run = store.get(run_id).await?;

        match self.compute(&run).await {
            Ok(report) => {
                let patch = RunPatch::new()
                    .metric(metric::CONFIDENCE, f64::from(report.score) / 100.0)
                    .metric(
                        metric::POLICY_PASS,
                        if report.policy_passed() { 1.0 } else { 0.0 },
                    )
                    .confidence(Some(report.clone()));
                let updated = store.upsert(run_id, patch).await?;
                store
                    .append_event(
                        run_id,
                        event::CONFIDENCE_COMPUTED,
                        json!({
                            "score": report.score,
                            "routing": report.routing.as_str(),
                            "gates": report.gates,
                        }),
                    )
                    .await?;
                info!(
                    run_id,
                    score = report.score,
                    routing = %report.routing,
                    "confidence computed"
                );
                Ok(updated)
            }
            Err(ScoringError::Judge(e)) => {
                warn!(run_id, kind = e.kind(), error = %e, "confidence computation failed");
                store
                    .upsert(
                        run_id,
                        RunPatch::new().note(format!("Confidence computation failed: {}", e)),
                    )
                    .await?;
                store
                    .append_event(
                        run_id,
                        event::CONFIDENCE_ERROR,
                        json!({ "kind": e.kind(), "error": e.to_string() }),
                    )
                    .await?;
                Err(ScoringError::Judge(e))
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::config::JudgeConfig;
    use crate::store::InMemoryRunStore;
    use crate::testing::{sample_chunks, ScriptedJudge};
    use std::sync::Arc;
    use trustgate_core::{Gate, GenerationOutput, Routing, RunStatus, StageArtifactSet, StageValue};

    fn service(judge: Arc<ScriptedJudge>) -> ConfidenceService {
        ConfidenceService::new(JudgeInvoker::new(judge, &JudgeConfig::default()))
    }

    fn completed_run(id: &str, answer: &str) -> Run {
        let mut run = Run::new(id);
        run.status = RunStatus::Completed;
        run.stages = StageArtifactSet {
            question: Some(StageValue::source("What is the Q3 forecast?".to_string())),
            retrieval: Some(StageValue::source(sample_chunks())),
            generation: Some(StageValue::source(GenerationOutput::Text(answer.to_string()))),
            ..Default::default()
        };
        run
    }

    #[tokio::test(start_paused = true)]
    async fn test_score_clean_answer() {
        // rq 0.9, g 0.95, policy 1.0 => 0.315 + 0.475 + 0.15 = 0.94
        let judge = Arc::new(ScriptedJudge::new(0.95, true));
        let report = service(judge.clone())
            .score("Q?", &sample_chunks(), "Pipeline grew 12%.")
            .await
            .unwrap();

        assert_eq!(report.score, 94);
        assert_eq!(report.routing, Routing::Stp);
        assert!(report.gates.is_empty());
        assert_eq!(judge.policy_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pii_skips_policy_judge() {
        let judge = Arc::new(ScriptedJudge::new(0.95, true));
        let report = service(judge.clone())
            .score("Q?", &sample_chunks(), "Mail jane@corp.com for details.")
            .await
            .unwrap();

        assert!(report.score <= 20);
        assert!(report.gates.contains(&Gate::PiiPciDetected));
        assert_eq!(judge.policy_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recompute_is_idempotent() {
        let store = InMemoryRunStore::new();
        store.create(completed_run("r1", "Pipeline grew 12%.")).await.unwrap();
        let svc = service(Arc::new(ScriptedJudge::new(0.7, true)));

        let first = svc.recompute(&store, "r1").await.unwrap();
        let second = svc.recompute(&store, "r1").await.unwrap();

        assert_eq!(first.confidence, second.confidence);
        assert_eq!(first.metrics, second.metrics);
        assert_eq!(second.metric(metric::POLICY_PASS), Some(1.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_judge_failure_leaves_run_unscored() {
        let down = || Err(CollaboratorError::Transport("down".into()));
        let judge = Arc::new(
            ScriptedJudge::new(0.7, true)
                .push_grounding(down())
                .push_grounding(down())
                .push_grounding(down()),
        );
        let store = InMemoryRunStore::new();
        store.create(completed_run("r1", "Pipeline grew 12%.")).await.unwrap();

        let err = service(judge).recompute(&store, "r1").await.unwrap_err();
        assert!(matches!(
            err,
            ScoringError::Judge(JudgeError::TransportExhausted { attempts: 3, .. })
        ));

        let run = store.get("r1").await.unwrap();
        assert!(!run.has_confidence());
        assert!(run.notes[0].starts_with("Confidence computation failed"));
        let events = store.events("r1").await.unwrap();
        assert_eq!(events.last().unwrap().kind, event::CONFIDENCE_ERROR);
    }

    #[tokio::test]
    async fn test_failed_generation_is_not_scored() {
        let mut run = completed_run("r1", "");
        run.stages.generation = Some(StageValue::source(GenerationOutput::Error("boom".into())));

        let err = service(Arc::new(ScriptedJudge::new(0.7, true)))
            .compute(&run)
            .await
            .unwrap_err();
        assert_eq!(err, ScoringError::MissingAnswer { run_id: "r1".into() });
    }
}
