//! Run and alert persistence.
//!
//! Stores apply each patch atomically: the whole patch lands or none of it
//! does. Stage artifacts are write-once, and so are the stages of a run that
//! reached a terminal status. Derived fields (confidence, triage, metrics)
//! stay writable so confidence can be recomputed on a finished run.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use trustgate_core::{Alert, ConfidenceReport, Run, RunStatus, Stage, StageArtifactSet, TriageScore};

/// Run event types.
pub mod event {
    pub const RUN_CREATED: &str = "run_created";
    pub const RUN_BLOCKED: &str = "run_blocked";
    pub const RUN_COMPLETED: &str = "run_completed";
    pub const RUN_FAILED: &str = "run_failed";
    pub const CONFIDENCE_COMPUTED: &str = "confidence_computed";
    pub const CONFIDENCE_ERROR: &str = "confidence_error";
    pub const DEEP_EVAL_SCHEDULED: &str = "deep_eval_scheduled";
    pub const DEEP_EVAL_COMPLETE: &str = "deep_eval_complete";
    pub const DEEP_EVAL_ERROR: &str = "deep_eval_error";
    pub const REPLAY_CREATED: &str = "replay_created";
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("not found: {id}")]
    NotFound { id: String },

    #[error("run {id} already exists")]
    AlreadyExists { id: String },

    #[error("run {id}: stage {stage} is immutable")]
    StageImmutable { id: String, stage: Stage },

    #[error("run {id}: illegal status change {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: RunStatus,
        to: RunStatus,
    },
}

/// Append-only audit record attached to a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEvent {
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

/// Field-wise update applied by [`RunStore::upsert`].
///
/// Notes are appended (duplicates skipped), maps are merged key by key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunPatch {
    pub parent_id: Option<String>,
    pub status: Option<RunStatus>,
    pub stages: Option<StageArtifactSet>,
    /// `Some(None)` clears a stored report.
    pub confidence: Option<Option<ConfidenceReport>>,
    pub triage: Option<TriageScore>,
    pub notes: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub params: BTreeMap<String, serde_json::Value>,
    pub tags: BTreeMap<String, String>,
}

impl RunPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn stages(mut self, stages: StageArtifactSet) -> Self {
        self.stages = Some(stages);
        self
    }

    pub fn confidence(mut self, report: Option<ConfidenceReport>) -> Self {
        self.confidence = Some(report);
        self
    }

    pub fn triage(mut self, triage: TriageScore) -> Self {
        self.triage = Some(triage);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    pub fn metric(mut self, name: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(name.into(), value);
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    /// Apply to `run` in place. Fails without touching `run`.
    pub fn apply_to(self, run: &mut Run) -> Result<(), StoreError> {
        let mut next = run.clone();

        if let Some(stages) = self.stages {
            if run.status.is_terminal() {
                if let Some(stage) = Stage::ALL.iter().copied().find(|s| stages.is_set(*s)) {
                    return Err(StoreError::StageImmutable {
                        id: run.id.clone(),
                        stage,
                    });
                }
            }
            next.stages
                .merge_from(stages)
                .map_err(|conflict| StoreError::StageImmutable {
                    id: run.id.clone(),
                    stage: conflict.stage,
                })?;
        }

        if let Some(status) = self.status {
            if !run.status.can_transition_to(status) {
                return Err(StoreError::InvalidTransition {
                    id: run.id.clone(),
                    from: run.status,
                    to: status,
                });
            }
            next.status = status;
        }

        if let Some(parent_id) = self.parent_id {
            next.parent_id = Some(parent_id);
        }
        if let Some(confidence) = self.confidence {
            next.confidence = confidence;
        }
        if let Some(triage) = self.triage {
            next.triage = Some(triage);
        }
        for note in self.notes {
            if !next.notes.contains(&note) {
                next.notes.push(note);
            }
        }
        next.metrics.extend(self.metrics);
        next.params.extend(self.params);
        next.tags.extend(self.tags);
        next.updated_at = Utc::now();

        *run = next;
        Ok(())
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert a new run. Fails if the id is taken.
    async fn create(&self, run: Run) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Run, StoreError>;

    /// Apply `patch` to the run with `id`, starting from an empty run if
    /// none exists. Returns the stored result.
    async fn upsert(&self, id: &str, patch: RunPatch) -> Result<Run, StoreError>;

    async fn append_event(
        &self,
        id: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError>;

    async fn events(&self, id: &str) -> Result<Vec<RunEvent>, StoreError>;

    /// Runs created within the last `days` days, newest first.
    async fn list_in_range(&self, days: u32) -> Result<Vec<Run>, StoreError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    async fn append(&self, alert: Alert) -> Result<(), StoreError>;

    async fn get(&self, id: &str) -> Result<Alert, StoreError>;

    /// Newest first. `resolved = None` lists both.
    async fn list(&self, resolved: Option<bool>, limit: usize) -> Result<Vec<Alert>, StoreError>;

    /// Mark resolved. Resolving twice succeeds.
    async fn resolve(&self, id: &str) -> Result<Alert, StoreError>;
}

#[derive(Default)]
struct RunRecords {
    runs: HashMap<String, Run>,
    events: HashMap<String, Vec<RunEvent>>,
}

/// In-process run store.
#[derive(Default)]
pub struct InMemoryRunStore {
    inner: RwLock<RunRecords>,
}

impl InMemoryRunStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RunStore for InMemoryRunStore {
    async fn create(&self, run: Run) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::AlreadyExists { id: run.id });
        }
        inner.runs.insert(run.id.clone(), run);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Run, StoreError> {
        self.inner
            .read()
            .runs
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn upsert(&self, id: &str, patch: RunPatch) -> Result<Run, StoreError> {
        let mut inner = self.inner.write();
        let run = inner
            .runs
            .entry(id.to_string())
            .or_insert_with(|| Run::new(id));
        patch.apply_to(run)?;
        Ok(run.clone())
    }

    async fn append_event(
        &self,
        id: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write();
        if !inner.runs.contains_key(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        inner.events.entry(id.to_string()).or_default().push(RunEvent {
            run_id: id.to_string(),
            kind: kind.to_string(),
            payload,
            at: Utc::now(),
        });
        Ok(())
    }

    async fn events(&self, id: &str) -> Result<Vec<RunEvent>, StoreError> {
        let inner = self.inner.read();
        if !inner.runs.contains_key(id) {
            return Err(StoreError::NotFound { id: id.to_string() });
        }
        Ok(inner.events.get(id).cloned().unwrap_or_default())
    }

    async fn list_in_range(&self, days: u32) -> Result<Vec<Run>, StoreError> {
        let since = Utc::now() - ChronoDuration::days(i64::from(days));
        let mut runs: Vec<Run> = self
            .inner
            .read()
            .runs
            .values()
            .filter(|r| r.created_at >= since)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }
}

/// In-process alert store. Keeps insertion order.
#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn append(&self, alert: Alert) -> Result<(), StoreError> {
        self.alerts.write().push(alert);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Alert, StoreError> {
        self.alerts
            .read()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })
    }

    async fn list(&self, resolved: Option<bool>, limit: usize) -> Result<Vec<Alert>, StoreError> {
        Ok(self
            .alerts
            .read()
            .iter()
            .rev()
            .filter(|a| resolved.map_or(true, |r| a.resolved == r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resolve(&self, id: &str) -> Result<Alert, StoreError> {
        let mut alerts = self.alerts.write();
        let alert = alerts
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or_else(|| StoreError::NotFound { id: id.to_string() })?;
        alert.resolved = true;
        Ok(alert.clone())
    }
}
