//! KPI reporting over the runs in a time range.

use std::sync::Arc;
use tracing::debug;
use trustgate_core::{confidence_distribution, metrics_summary, range_days, ConfidenceBin, RunKpis};

use crate::store::{RunStore, StoreError};

pub struct KpiService {
    store: Arc<dyn RunStore>,
}

impl KpiService {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// KPIs for the runs created within `range` (`24h`, `7d`, `30d`, `90d`).
    pub async fn summary(&self, range: &str) -> Result<RunKpis, StoreError> {
        let days = range_days(range);
        let runs = self.store.list_in_range(days).await?;
        debug!(range, days, runs = runs.len(), "summarizing runs");
        Ok(metrics_summary(&runs))
    }

    pub async fn confidence_distribution(&self, range: &str) -> Result<Vec<ConfidenceBin>, StoreError> {
        let runs = self.store.list_in_range(range_days(range)).await?;
        Ok(confidence_distribution(&runs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryRunStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use trustgate_core::alerts::metric;
    use trustgate_core::Run;

    async fn seeded() -> Arc<InMemoryRunStore> {
        let store = Arc::new(InMemoryRunStore::new());
        for (id, latency, confidence, age_days) in
            [("r1", 100.0, 0.92, 0), ("r2", 300.0, 0.35, 2), ("old", 9000.0, 0.05, 30)]
        {
            let mut run = Run::new(id);
            run.created_at = Utc::now() - ChronoDuration::days(age_days);
            run.metrics.insert(metric::LATENCY_MS.into(), latency);
            run.metrics.insert(metric::CONFIDENCE.into(), confidence);
            store.create(run).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_summary_respects_range() {
        let service = KpiService::new(seeded().await);

        let week = service.summary("7d").await.unwrap();
        assert_eq!(week.run_count, 2);
        assert_eq!(week.p95_latency_ms, 300.0);

        let quarter = service.summary("90d").await.unwrap();
        assert_eq!(quarter.run_count, 3);
        assert_eq!(quarter.p95_latency_ms, 9000.0);
    }

    #[tokio::test]
    async fn test_distribution_over_range() {
        let service = KpiService::new(seeded().await);
        let bins = service.confidence_distribution("24h").await.unwrap();
        let total: usize = bins.iter().map(|b| b.count).sum();
        assert_eq!(total, 1);
        assert_eq!(bins[9].count, 1);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let service = KpiService::new(Arc::new(InMemoryRunStore::new()));
        assert_eq!(service.summary("7d").await.unwrap(), RunKpis::default());
    }
}
