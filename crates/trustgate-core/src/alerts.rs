//! AlertEvaluator: post-hoc rules over a completed run's metrics.
//!
//! Each rule yields zero or one alert. Rules are independent: one rule
//! failing to evaluate is recorded and the others still run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{Run, RunStatus};

pub const DEFAULT_LATENCY_THRESHOLD_MS: u64 = 5000;
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// Metric names the rules read.
pub mod metric {
    pub const CONFIDENCE: &str = "confidence";
    pub const POLICY_PASS: &str = "policy_pass";
    pub const LATENCY_MS: &str = "latency_ms";
    pub const RETRIEVAL_COUNT: &str = "retrieval_count";
    pub const PARSE_SUCCESS: &str = "parse_success";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    LowConfidence,
    PolicyFail,
    HighLatency,
    RetrievalEmpty,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LowConfidence => "LOW_CONFIDENCE",
            Self::PolicyFail => "POLICY_FAIL",
            Self::HighLatency => "HIGH_LATENCY",
            Self::RetrievalEmpty => "RETRIEVAL_EMPTY",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A fired rule, before it is assigned an identity and stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDraft {
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
}

/// A stored alert. Created append-only; only `resolved` ever changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub run_id: String,
    #[serde(rename = "type")]
    pub kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved: bool,
}

impl Alert {
    pub fn from_draft(id: impl Into<String>, run_id: impl Into<String>, draft: AlertDraft) -> Self {
        Self {
            id: id.into(),
            run_id: run_id.into(),
            kind: draft.kind,
            severity: draft.severity,
            message: draft.message,
            created_at: Utc::now(),
            resolved: false,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlertRuleError {
    #[error("metric '{name}' holds a non-finite value")]
    InvalidMetric { name: String },
}

fn finite_metric(run: &Run, name: &str) -> Result<Option<f64>, AlertRuleError> {
    match run.metric(name) {
        Some(v) if !v.is_finite() => Err(AlertRuleError::InvalidMetric {
            name: name.to_string(),
        }),
        other => Ok(other),
    }
}

/// A single alert rule.
pub trait AlertRule: Send + Sync {
    fn kind(&self) -> AlertKind;

    fn check(&self, run: &Run) -> Result<Option<AlertDraft>, AlertRuleError>;
}

/// Confidence below 0.5, from the `confidence` metric or the judged score.
#[derive(Debug, Default)]
pub struct LowConfidenceRule;

impl AlertRule for LowConfidenceRule {
    fn kind(&self) -> AlertKind {
        AlertKind::LowConfidence
    }

    fn check(&self, run: &Run) -> Result<Option<AlertDraft>, AlertRuleError> {
        let confidence = match finite_metric(run, metric::CONFIDENCE)? {
            Some(c) => Some(c),
            None => run.confidence_score().map(|s| f64::from(s) / 100.0),
        };
        Ok(confidence
            .filter(|c| *c < LOW_CONFIDENCE_THRESHOLD)
            .map(|c| AlertDraft {
                kind: self.kind(),
                severity: Severity::Medium,
                message: format!("Run {} has low confidence ({:.2}).", run.id, c),
            }))
    }
}

#[derive(Debug, Default)]
pub struct PolicyFailRule;

impl AlertRule for PolicyFailRule {
    fn kind(&self) -> AlertKind {
        AlertKind::PolicyFail
    }

    fn check(&self, run: &Run) -> Result<Option<AlertDraft>, AlertRuleError> {
        Ok(finite_metric(run, metric::POLICY_PASS)?
            .filter(|p| *p == 0.0)
            .map(|_| AlertDraft {
                kind: self.kind(),
                severity: Severity::High,
                message: format!("Run {} failed policy checks.", run.id),
            }))
    }
}

#[derive(Debug)]
pub struct HighLatencyRule {
    pub threshold_ms: u64,
}

impl Default for HighLatencyRule {
    fn default() -> Self {
        Self {
            threshold_ms: DEFAULT_LATENCY_THRESHOLD_MS,
        }
    }
}

impl AlertRule for HighLatencyRule {
    fn kind(&self) -> AlertKind {
        AlertKind::HighLatency
    }

    fn check(&self, run: &Run) -> Result<Option<AlertDraft>, AlertRuleError> {
        let threshold = self.threshold_ms as f64;
        Ok(finite_metric(run, metric::LATENCY_MS)?
            .filter(|l| *l > threshold)
            .map(|l| AlertDraft {
                kind: self.kind(),
                severity: Severity::Low,
                message: format!(
                    "Run {} took {}ms (threshold: {}ms).",
                    run.id, l as u64, self.threshold_ms
                ),
            }))
    }
}

/// Zero retrievals, only when the count was recorded.
#[derive(Debug, Default)]
pub struct RetrievalEmptyRule;

impl AlertRule for RetrievalEmptyRule {
    fn kind(&self) -> AlertKind {
        AlertKind::RetrievalEmpty
    }

    fn check(&self, run: &Run) -> Result<Option<AlertDraft>, AlertRuleError> {
        Ok(finite_metric(run, metric::RETRIEVAL_COUNT)?
            .filter(|c| *c == 0.0)
            .map(|_| AlertDraft {
                kind: self.kind(),
                severity: Severity::Medium,
                message: format!("Run {} yielded no retrieved context.", run.id),
            }))
    }
}

/// Outcome of evaluating every rule against one run.
#[derive(Debug, Default)]
pub struct AlertEvaluation {
    pub drafts: Vec<AlertDraft>,
    pub errors: Vec<(AlertKind, AlertRuleError)>,
    /// The run was not in a completed status, so no rule ran
    pub skipped: bool,
}

pub struct AlertEvaluator {
    rules: Vec<Box<dyn AlertRule>>,
}

impl AlertEvaluator {
    pub fn new(latency_threshold_ms: u64) -> Self {
        Self {
            rules: vec![
                Box::new(LowConfidenceRule),
                Box::new(PolicyFailRule),
                Box::new(HighLatencyRule {
                    threshold_ms: latency_threshold_ms,
                }),
                Box::new(RetrievalEmptyRule),
            ],
        }
    }

    pub fn evaluate(&self, run: &Run) -> AlertEvaluation {
        if run.status != RunStatus::Completed {
            return AlertEvaluation {
                skipped: true,
                ..Default::default()
            };
        }

        let mut evaluation = AlertEvaluation::default();
        for rule in &self.rules {
            match rule.check(run) {
                Ok(Some(draft)) => evaluation.drafts.push(draft),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(run_id = %run.id, rule = %rule.kind(), error = %e, "alert rule failed");
                    evaluation.errors.push((rule.kind(), e));
                }
            }
        }
        evaluation
    }
}

impl Default for AlertEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_LATENCY_THRESHOLD_MS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn completed(metrics: &[(&str, f64)]) -> Run {
        let mut run = Run::new("r1");
        run.status = RunStatus::Completed;
        for (k, v) in metrics {
            run.metrics.insert(k.to_string(), *v);
        }
        run
    }

    fn kinds(eval: &AlertEvaluation) -> Vec<AlertKind> {
        eval.drafts.iter().map(|d| d.kind).collect()
    }

    #[test]
    fn test_low_confidence_only() {
        let run = completed(&[("confidence", 0.3), ("policy_pass", 1.0), ("latency_ms", 100.0)]);
        let eval = AlertEvaluator::default().evaluate(&run);
        assert_eq!(kinds(&eval), vec![AlertKind::LowConfidence]);
        assert_eq!(eval.drafts[0].severity, Severity::Medium);
        assert_eq!(eval.drafts[0].message, "Run r1 has low confidence (0.30).");
    }

    #[test]
    fn test_multiple_rules_fire() {
        let run = completed(&[
            ("confidence", 0.9),
            ("policy_pass", 0.0),
            ("latency_ms", 7200.0),
            ("retrieval_count", 0.0),
        ]);
        let eval = AlertEvaluator::default().evaluate(&run);
        assert_eq!(
            kinds(&eval),
            vec![AlertKind::PolicyFail, AlertKind::HighLatency, AlertKind::RetrievalEmpty]
        );
        assert_eq!(eval.drafts[1].message, "Run r1 took 7200ms (threshold: 5000ms).");
    }

    #[test]
    fn test_custom_latency_threshold() {
        let run = completed(&[("latency_ms", 1500.0)]);
        assert!(AlertEvaluator::default().evaluate(&run).drafts.is_empty());
        assert_eq!(kinds(&AlertEvaluator::new(1000).evaluate(&run)), vec![AlertKind::HighLatency]);
    }

    #[test]
    fn test_thresholds_are_strict() {
        let run = completed(&[("confidence", 0.5), ("latency_ms", 5000.0)]);
        assert!(AlertEvaluator::default().evaluate(&run).drafts.is_empty());

        let run = completed(&[("confidence", 0.49), ("latency_ms", 5000.5)]);
        assert_eq!(
            kinds(&AlertEvaluator::default().evaluate(&run)),
            vec![AlertKind::LowConfidence, AlertKind::HighLatency]
        );
    }

    #[test]
    fn test_only_completed_runs() {
        let mut run = completed(&[("confidence", 0.1)]);
        run.status = RunStatus::Failed;
        let eval = AlertEvaluator::default().evaluate(&run);
        assert!(eval.skipped);
        assert!(eval.drafts.is_empty());
    }

    #[test]
    fn test_rule_error_is_isolated() {
        let run = completed(&[("confidence", f64::NAN), ("policy_pass", 0.0)]);
        let eval = AlertEvaluator::default().evaluate(&run);
        assert_eq!(kinds(&eval), vec![AlertKind::PolicyFail]);
        assert_eq!(eval.errors.len(), 1);
        assert_eq!(eval.errors[0].0, AlertKind::LowConfidence);
    }

    #[test]
    fn test_unrecorded_retrieval_count_is_silent() {
        let eval = AlertEvaluator::default().evaluate(&completed(&[]));
        assert!(eval.drafts.is_empty());
    }

    #[test]
    fn test_alert_serializes_type_field() {
        let alert = Alert::from_draft(
            "a1",
            "r1",
            AlertDraft {
                kind: AlertKind::PolicyFail,
                severity: Severity::High,
                message: "m".into(),
            },
        );
        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "POLICY_FAIL");
        assert_eq!(json["severity"], "high");
        assert_eq!(json["resolved"], false);
    }
}
