//! Alert evaluation and persistence.

use std::sync::Arc;
use tracing::info;
use trustgate_core::{Alert, AlertEvaluator, Run};
use uuid::Uuid;

use crate::store::{AlertStore, StoreError};

pub const DEFAULT_LIST_LIMIT: usize = 50;

pub struct AlertService {
    evaluator: AlertEvaluator,
    store: Arc<dyn AlertStore>,
}

impl AlertService {
    pub fn new(evaluator: AlertEvaluator, store: Arc<dyn AlertStore>) -> Self {
        Self { evaluator, store }
    }

    /// Evaluate every rule against `run` and persist what fires.
    ///
    /// Rule errors are logged by the evaluator and do not stop the others.
    pub async fn evaluate_and_store(&self, run: &Run) -> Result<Vec<Alert>, StoreError> {
        let evaluation = self.evaluator.evaluate(run);
        let mut stored = Vec::with_capacity(evaluation.drafts.len());

        for draft in evaluation.drafts {
            let alert = Alert::from_draft(Uuid::new_v4().to_string(), &run.id, draft);
            info!(
                run_id = %run.id,
                alert_id = %alert.id,
                kind = %alert.kind,
                "alert raised"
            );
            self.store.append(alert.clone()).await?;
            stored.push(alert);
        }
        Ok(stored)
    }

    pub async fn list(&self, resolved: Option<bool>, limit: usize) -> Result<Vec<Alert>, StoreError> {
        self.store.list(resolved, limit).await
    }

    /// Unresolved alerts, newest first.
    pub async fn open(&self) -> Result<Vec<Alert>, StoreError> {
        self.store.list(Some(false), DEFAULT_LIST_LIMIT).await
    }

    pub async fn resolve(&self, alert_id: &str) -> Result<Alert, StoreError> {
        let alert = self.store.resolve(alert_id).await?;
        info!(alert_id, "alert resolved");
        Ok(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAlertStore;
    use trustgate_core::alerts::metric;
    use trustgate_core::{AlertKind, RunStatus};

    fn service() -> AlertService {
        AlertService::new(AlertEvaluator::default(), Arc::new(InMemoryAlertStore::new()))
    }

    fn completed(confidence: f64) -> Run {
        let mut run = Run::new("r1");
        run.status = RunStatus::Completed;
        run.metrics.insert(metric::CONFIDENCE.into(), confidence);
        run.metrics.insert(metric::POLICY_PASS.into(), 1.0);
        run.metrics.insert(metric::LATENCY_MS.into(), 250.0);
        run.metrics.insert(metric::RETRIEVAL_COUNT.into(), 3.0);
        run
    }

    #[tokio::test]
    async fn test_low_confidence_lifecycle() {
        let alerts = service();
        let raised = alerts.evaluate_and_store(&completed(0.3)).await.unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].kind, AlertKind::LowConfidence);
        assert_eq!(raised[0].run_id, "r1");

        let id = raised[0].id.clone();
        assert_eq!(alerts.open().await.unwrap().len(), 1);

        assert!(alerts.resolve(&id).await.unwrap().resolved);
        assert!(alerts.open().await.unwrap().is_empty());

        // Second resolve is a no-op success
        assert!(alerts.resolve(&id).await.unwrap().resolved);
        assert_eq!(alerts.list(Some(true), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id() {
        assert!(matches!(
            service().resolve("missing").await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_healthy_run_raises_nothing() {
        let alerts = service();
        assert!(alerts.evaluate_and_store(&completed(0.9)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unique_alert_ids() {
        let alerts = service();
        let mut run = completed(0.1);
        run.metrics.insert(metric::POLICY_PASS.into(), 0.0);
        let raised = alerts.evaluate_and_store(&run).await.unwrap();
        assert_eq!(raised.len(), 2);
        assert_ne!(raised[0].id, raised[1].id);
    }
}
