//! Core types for TrustGate runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::aggregator::ConfidenceReport;
use crate::evidence::Evidence;
use crate::router::Routing;
use crate::stages::StageArtifactSet;
use crate::triage::TriageScore;

/// Lifecycle status of a run.
///
/// `created -> running -> {completed, failed, blocked}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Completed,
    Failed,
    Blocked,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Blocked => "blocked",
        }
    }

    /// Terminal runs no longer accept stage-artifact writes.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Blocked)
    }

    /// Whether a status change is a legal lifecycle step.
    ///
    /// Re-asserting the current status is always allowed.
    pub fn can_transition_to(self, next: RunStatus) -> bool {
        if self == next {
            return true;
        }
        match self {
            Self::Created => matches!(next, Self::Running),
            Self::Running => next.is_terminal(),
            Self::Completed | Self::Failed | Self::Blocked => false,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chunk returned by the retrieval collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub source_id: String,
    pub chunk_id: String,
    pub text: String,

    /// Similarity in [0, 1], when the retriever reports one
    #[serde(default)]
    pub similarity: Option<f64>,

    #[serde(default)]
    pub rank: Option<u32>,

    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl RetrievedChunk {
    pub fn new(
        source_id: impl Into<String>,
        chunk_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            chunk_id: chunk_id.into(),
            text: text.into(),
            similarity: None,
            rank: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_similarity(mut self, similarity: f64) -> Self {
        self.similarity = Some(similarity);
        self
    }
}

/// A named sub-score contributing to a confidence value.
///
/// Values are never negative, except the explicit `error_penalty`
/// component of a failed run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceComponent {
    pub value: f64,
    pub fired: bool,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<Evidence>,
}

impl ConfidenceComponent {
    /// A component that contributed its value.
    pub fn fired(value: f64, reason: impl Into<String>) -> Self {
        Self {
            value,
            fired: true,
            reason: reason.into(),
            evidence: None,
        }
    }

    /// A component that did not contribute.
    pub fn idle(reason: impl Into<String>) -> Self {
        Self {
            value: 0.0,
            fired: false,
            reason: reason.into(),
            evidence: None,
        }
    }

    pub fn with_evidence(mut self, evidence: Option<Evidence>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// A named condition that caps the aggregate score when fired.
///
/// Components contribute; gates constrain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gate {
    /// Regex pre-filter matched a PII/PCI category
    PiiPciDetected,
    /// Policy judge returned `pass: false`
    PolicyJudgeFail,
    /// Policy score is zero; aggregate capped at 0.2
    PolicyViolation,
    /// Groundedness under 0.4; aggregate capped at 0.5
    LowGroundedness,
}

impl Gate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PiiPciDetected => "PII_PCI_DETECTED",
            Self::PolicyJudgeFail => "POLICY_JUDGE_FAIL",
            Self::PolicyViolation => "POLICY_VIOLATION",
            Self::LowGroundedness => "LOW_GROUNDEDNESS",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single answer-production run, primary or replayed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,

    /// Set only on replays; points at the source run
    #[serde(default)]
    pub parent_id: Option<String>,

    pub status: RunStatus,

    #[serde(default)]
    pub stages: StageArtifactSet,

    /// Full judged confidence. `None` until computed, or when computation failed.
    #[serde(default)]
    pub confidence: Option<ConfidenceReport>,

    /// Cheap replay triage score, distinct from `confidence`
    #[serde(default)]
    pub triage: Option<TriageScore>,

    /// Pipeline notes, including confidence computation errors
    #[serde(default)]
    pub notes: Vec<String>,

    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Run {
    /// Create an empty run in `created` status.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            parent_id: None,
            status: RunStatus::Created,
            stages: StageArtifactSet::default(),
            confidence: None,
            triage: None,
            notes: Vec::new(),
            metrics: BTreeMap::new(),
            params: BTreeMap::new(),
            tags: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn confidence_score(&self) -> Option<u8> {
        self.confidence.as_ref().map(|c| c.score)
    }

    pub fn routing(&self) -> Option<Routing> {
        self.confidence.as_ref().map(|c| c.routing)
    }

    pub fn gates_triggered(&self) -> BTreeSet<Gate> {
        self.confidence
            .as_ref()
            .map(|c| c.gates.clone())
            .unwrap_or_default()
    }

    /// A run without confidence signals a computation failure (or none yet);
    /// a score of 0 signals a real low-trust answer.
    pub fn has_confidence(&self) -> bool {
        self.confidence.is_some()
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Named artifact view consumed by downstream surfaces.
    ///
    /// Returns `None` for unknown names and for artifacts not yet produced.
    pub fn artifact(&self, name: &str) -> Option<serde_json::Value> {
        use serde_json::json;

        match name {
            "user_question" => self.stages.question_text().map(|q| json!(q)),
            "retrieved_sources" => self
                .stages
                .retrieval
                .as_ref()
                .and_then(|s| serde_json::to_value(&s.value).ok()),
            "summary_context" => self.stages.summary_context.as_ref().map(|s| s.value.clone()),
            "prompt_packet" => self.stages.prompt_text().map(|p| json!(p)),
            "llm_response" => self.stages.generation_text().map(|t| json!(t)),
            "parsed_forecast" => self
                .stages
                .parse
                .as_ref()
                .and_then(|s| s.value.payload.clone()),
            "parse_error" => self
                .stages
                .parse
                .as_ref()
                .and_then(|s| s.value.error.as_ref())
                .map(|e| json!({ "error": e })),
            "confidence_components" => {
                if let Some(report) = &self.confidence {
                    serde_json::to_value(&report.components).ok()
                } else {
                    self.triage
                        .as_ref()
                        .and_then(|t| serde_json::to_value(&t.components).ok())
                }
            }
            "confidence_explanation" => self
                .confidence
                .as_ref()
                .and_then(|c| serde_json::to_value(&c.explanation).ok()),
            _ => None,
        }
    }
}
