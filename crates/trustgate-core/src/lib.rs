//! # trustgate-core
//!
//! Deterministic trust scoring for LLM answers.
//!
//! This crate decides how far an answer can be trusted and how it should be
//! handled:
//! - Stp: accept automatically
//! - Assist / Escalate: bring a human in
//! - Block: stop
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: Same signals and judgments always give the same score
//! 2. **No LLM calls**: Judge output arrives as text and is parsed here
//! 3. **Gates only lower**: A fired gate caps the score, never raises it
//! 4. **Auditable**: Every report keeps components, gates, notes and raw judge payloads
//!
//! ## Example
//!
//! ```rust,ignore
//! use trustgate_core::{ConfidenceAggregator, ConfidenceInputs, ParsedJudgment, SignalCollector};
//!
//! let signals = SignalCollector::new().collect(&chunks, answer);
//! let grounding = ParsedJudgment::parse(&judge_text)?;
//! let report = ConfidenceAggregator::new().aggregate(&ConfidenceInputs {
//!     answer,
//!     retrieval: &signals.retrieval,
//!     policy_scan: &signals.policy_scan,
//!     policy_judgment: None,
//!     grounding: &grounding,
//! });
//! println!("{} -> {}", report.score, report.routing);
//! ```

pub mod aggregator;
pub mod alerts;
pub mod evidence;
pub mod judgment;
pub mod kpis;
pub mod router;
pub mod signals;
pub mod stages;
pub mod triage;
pub mod types;

// Re-export main types at crate root
pub use aggregator::{
    weighted_score, ConfidenceAggregator, ConfidenceExplanation, ConfidenceInputs,
    ConfidenceReport, ScoreBreakdown,
};
pub use alerts::{
    Alert, AlertDraft, AlertEvaluation, AlertEvaluator, AlertKind, AlertRule, AlertRuleError,
    Severity,
};
pub use evidence::Evidence;
pub use judgment::{
    clamp01, extract_json, GroundednessJudgment, JudgeError, ParsedJudgment, PolicyJudgment,
};
pub use kpis::{confidence_distribution, metrics_summary, range_days, ConfidenceBin, RunKpis};
pub use router::Routing;
pub use signals::{PiiCategory, PolicyScan, RetrievalSignal, SignalCollector, Signals};
pub use stages::{
    parse_generation, GenerationOutput, ParseArtifact, Provenance, Stage, StageArtifactSet,
    StageConflict, StageOverrides, StageValue,
};
pub use triage::{replay_triage, TriageInput, TriageLabel, TriageScore};
pub use types::{ConfidenceComponent, Gate, RetrievedChunk, Run, RunStatus};
