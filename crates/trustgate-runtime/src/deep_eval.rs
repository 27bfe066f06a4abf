//! Sampled deep evaluation, off the primary path.
//!
//! A selected run gets a `deep_eval_scheduled` event and a detached task.
//! The task only ever appends `deep_eval_complete` or `deep_eval_error`;
//! nothing on the primary path waits for it.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use trustgate_core::Run;

use crate::collaborators::DeepEvaluator;
use crate::store::{event, RunStore};

pub struct DeepEvalScheduler {
    sample_rate: f64,
    evaluator: Arc<dyn DeepEvaluator>,
    store: Arc<dyn RunStore>,
    rng: Mutex<StdRng>,
}

impl DeepEvalScheduler {
    pub fn new(sample_rate: f64, evaluator: Arc<dyn DeepEvaluator>, store: Arc<dyn RunStore>) -> Self {
        Self::with_rng(sample_rate, evaluator, store, StdRng::from_entropy())
    }

    pub fn with_rng(
        sample_rate: f64,
        evaluator: Arc<dyn DeepEvaluator>,
        store: Arc<dyn RunStore>,
        rng: StdRng,
    ) -> Self {
        Self {
            sample_rate: if sample_rate.is_finite() {
                sample_rate.clamp(0.0, 1.0)
            } else {
                0.0
            },
            evaluator,
            store,
            rng: Mutex::new(rng),
        }
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn selected(&self) -> bool {
        self.rng.lock().gen::<f64>() < self.sample_rate
    }

    /// Maybe start a deep evaluation of `run`. Returns the task handle when
    /// one was spawned.
    pub async fn maybe_schedule(&self, run: &Run) -> Option<JoinHandle<()>> {
        if !self.selected() {
            return None;
        }

        if let Err(e) = self
            .store
            .append_event(
                &run.id,
                event::DEEP_EVAL_SCHEDULED,
                json!({ "sample_rate": self.sample_rate }),
            )
            .await
        {
            warn!(run_id = %run.id, error = %e, "could not record deep eval schedule");
            return None;
        }

        let evaluator = Arc::clone(&self.evaluator);
        let store = Arc::clone(&self.store);
        let run = run.clone();

        Some(tokio::spawn(async move {
            let (kind, payload) = match evaluator.evaluate(&run).await {
                Ok(scores) => {
                    info!(run_id = %run.id, metrics = scores.len(), "deep eval complete");
                    (event::DEEP_EVAL_COMPLETE, json!({ "metrics": scores }))
                }
                Err(e) => {
                    warn!(run_id = %run.id, error = %e, "deep eval failed");
                    (event::DEEP_EVAL_ERROR, json!({ "error": e.to_string() }))
                }
            };
            if let Err(e) = store.append_event(&run.id, kind, payload).await {
                warn!(run_id = %run.id, error = %e, "could not record deep eval result");
            }
        }))
    }
}
