//! ConfidenceAggregator: combine signals and judgments into a 0-100 score.
//!
//! ```text
//! raw = 0.35 * retrieval_quality + 0.50 * groundedness + 0.15 * policy_score
//! if policy_score == 0.0: raw = min(raw, 0.2)
//! if groundedness < 0.4:  raw = min(raw, 0.5)
//! score = round(clamp(raw, 0, 1) * 100)
//! ```
//!
//! Gates are applied strictly after the weighted sum and only ever lower it.
//! The aggregator is pure: the same inputs always give the same report.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::evidence::Evidence;
use crate::judgment::{clamp01, GroundednessJudgment, ParsedJudgment, PolicyJudgment};
use crate::router::Routing;
use crate::signals::{PolicyScan, RetrievalSignal};
use crate::types::{ConfidenceComponent, Gate};

pub const RETRIEVAL_WEIGHT: f64 = 0.35;
pub const GROUNDEDNESS_WEIGHT: f64 = 0.50;
pub const POLICY_WEIGHT: f64 = 0.15;

pub const POLICY_VIOLATION_CAP: f64 = 0.2;
pub const LOW_GROUNDEDNESS_CAP: f64 = 0.5;
pub const LOW_GROUNDEDNESS_THRESHOLD: f64 = 0.4;

pub const EXPLANATION_VERSION: &str = "v0.1";
pub const FORMULA: &str = "0.35*retrieval_quality + 0.50*groundedness + 0.15*policy_score";

/// Component names, as stored in `ConfidenceReport::components`.
pub const RETRIEVAL_QUALITY: &str = "retrieval_quality";
pub const GROUNDEDNESS: &str = "groundedness";
pub const POLICY_SCORE: &str = "policy_score";

/// Everything the aggregator scores for one answer.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs<'a> {
    pub answer: &'a str,
    pub retrieval: &'a RetrievalSignal,
    pub policy_scan: &'a PolicyScan,
    /// `None` when the regex scan already failed and the backstop was skipped
    pub policy_judgment: Option<&'a ParsedJudgment<PolicyJudgment>>,
    pub grounding: &'a ParsedJudgment<GroundednessJudgment>,
}

/// The numeric core of the aggregate: weighted sum, gates, final score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    pub weighted_sum: f64,
    pub capped: f64,
    pub score: u8,
    pub policy_capped: bool,
    pub low_groundedness: bool,
}

/// Weighted sum and caps over already-clamped sub-scores.
pub fn weighted_score(retrieval_quality: f64, groundedness: f64, policy_score: f64) -> ScoreBreakdown {
    let weighted_sum = RETRIEVAL_WEIGHT * retrieval_quality
        + GROUNDEDNESS_WEIGHT * groundedness
        + POLICY_WEIGHT * policy_score;

    let mut capped = weighted_sum;
    let policy_capped = policy_score == 0.0;
    if policy_capped {
        capped = capped.min(POLICY_VIOLATION_CAP);
    }
    let low_groundedness = groundedness < LOW_GROUNDEDNESS_THRESHOLD;
    if low_groundedness {
        capped = capped.min(LOW_GROUNDEDNESS_CAP);
    }

    // Ties round to even
    let score = (clamp01(capped) * 100.0).round_ties_even() as u8;

    ScoreBreakdown {
        weighted_sum,
        capped,
        score,
        policy_capped,
        low_groundedness,
    }
}

/// Audit description of how a score was produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceExplanation {
    pub version: String,
    pub formula: String,
    pub weights: BTreeMap<String, f64>,
    /// Weighted sum before gates
    pub weighted_sum: f64,
    /// Value after gates, before clamping and rounding
    pub capped: f64,
    pub gates: Vec<Gate>,
    pub reasons: BTreeMap<String, String>,
}

/// Full judged confidence for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub score: u8,
    pub routing: Routing,
    pub components: BTreeMap<String, ConfidenceComponent>,
    pub gates: BTreeSet<Gate>,
    pub notes: Vec<String>,
    pub raw_judge_outputs: BTreeMap<String, serde_json::Value>,
    pub explanation: ConfidenceExplanation,
}

impl ConfidenceReport {
    pub fn component_value(&self, name: &str) -> Option<f64> {
        self.components.get(name).map(|c| c.value)
    }

    /// Policy passed when the policy component kept its full value.
    pub fn policy_passed(&self) -> bool {
        self.component_value(POLICY_SCORE) == Some(1.0)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ConfidenceAggregator;

impl ConfidenceAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn aggregate(&self, input: &ConfidenceInputs<'_>) -> ConfidenceReport {
        let mut gates = BTreeSet::new();
        let mut notes = Vec::new();
        let mut raw = BTreeMap::new();

        // Retrieval
        let rq = clamp01(input.retrieval.score);
        raw.insert("retrieval".to_string(), input.retrieval.details());
        let retrieval_component = match &input.retrieval.reason {
            Some(reason) => ConfidenceComponent::idle(reason.clone()),
            None => ConfidenceComponent::fired(
                rq,
                format!(
                    "max similarity {:.2}, avg {:.2} over {} chunks",
                    input.retrieval.max_similarity.unwrap_or_default(),
                    input.retrieval.avg_similarity.unwrap_or_default(),
                    input.retrieval.scored_chunks
                ),
            ),
        };

        // Policy: regex pre-filter, then judge backstop
        let mut policy_score = 1.0;
        let mut policy_reason = "no policy violations".to_string();
        let mut policy_evidence = None;

        if !input.policy_scan.is_clean() {
            policy_score = 0.0;
            gates.insert(Gate::PiiPciDetected);
            policy_reason = format!("PII/PCI detected: {}", input.policy_scan.label());
            notes.push(policy_reason.clone());
            policy_evidence = input.policy_scan.evidence(input.answer);
        }

        if let Some(judged) = input.policy_judgment {
            raw.insert("policy_judge".to_string(), judged.raw.clone());
            if !judged.judgment.pass {
                policy_score = 0.0;
                gates.insert(Gate::PolicyJudgeFail);
                policy_reason = format!("Policy violations: {}", judged.judgment.violations.join(", "));
                notes.push(policy_reason.clone());
                if policy_evidence.is_none() && !judged.judgment.rationale.is_empty() {
                    policy_evidence = Some(
                        Evidence::whole("llm_response", judged.judgment.rationale.clone())
                            .with_note("policy judge rationale"),
                    );
                }
            }
        }

        let policy_component = if policy_score == 1.0 {
            ConfidenceComponent::fired(1.0, policy_reason)
        } else {
            ConfidenceComponent::idle(policy_reason).with_evidence(policy_evidence)
        };

        // Groundedness
        let grounding = &input.grounding.judgment;
        let groundedness = grounding.groundedness();
        raw.insert("grounding_judge".to_string(), input.grounding.raw.clone());
        let grounding_reason = if grounding.rationale.is_empty() {
            format!("judge score {:.2}", groundedness)
        } else {
            grounding.rationale.clone()
        };
        let grounding_evidence = grounding.unsupported_claims.first().map(|claim| {
            Evidence::whole("llm_response", claim.clone()).with_note("unsupported claim")
        });
        let grounding_component = ConfidenceComponent::fired(groundedness, grounding_reason)
            .with_evidence(grounding_evidence);

        let breakdown = weighted_score(rq, groundedness, policy_score);
        if breakdown.policy_capped {
            gates.insert(Gate::PolicyViolation);
        }
        if breakdown.low_groundedness {
            gates.insert(Gate::LowGroundedness);
            notes.push(format!(
                "Low groundedness: {:.2} < {:.2}",
                groundedness, LOW_GROUNDEDNESS_THRESHOLD
            ));
        }

        let routing = Routing::route(breakdown.score);
        tracing::debug!(
            score = breakdown.score,
            routing = %routing,
            gates = gates.len(),
            "confidence aggregated"
        );

        let mut components = BTreeMap::new();
        components.insert(RETRIEVAL_QUALITY.to_string(), retrieval_component);
        components.insert(GROUNDEDNESS.to_string(), grounding_component);
        components.insert(POLICY_SCORE.to_string(), policy_component);

        let explanation = ConfidenceExplanation {
            version: EXPLANATION_VERSION.to_string(),
            formula: FORMULA.to_string(),
            weights: BTreeMap::from([
                (RETRIEVAL_QUALITY.to_string(), RETRIEVAL_WEIGHT),
                (GROUNDEDNESS.to_string(), GROUNDEDNESS_WEIGHT),
                (POLICY_SCORE.to_string(), POLICY_WEIGHT),
            ]),
            weighted_sum: breakdown.weighted_sum,
            capped: breakdown.capped,
            gates: gates.iter().copied().collect(),
            reasons: components
                .iter()
                .map(|(name, c)| (name.clone(), c.reason.clone()))
                .collect(),
        };

        ConfidenceReport {
            score: breakdown.score,
            routing,
            components,
            gates,
            notes,
            raw_judge_outputs: raw,
            explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalCollector;
    use crate::types::RetrievedChunk;
    use proptest::prelude::*;

    fn grounding(score: f64) -> ParsedJudgment<GroundednessJudgment> {
        ParsedJudgment::parse(&format!("{{\"score\": {}, \"rationale\": \"checked\"}}", score)).unwrap()
    }

    fn policy(pass: bool) -> ParsedJudgment<PolicyJudgment> {
        ParsedJudgment::parse(&format!(
            "{{\"pass\": {}, \"violations\": [\"promises refund\"]}}",
            pass
        ))
        .unwrap()
    }

    fn chunks() -> Vec<RetrievedChunk> {
        vec![
            RetrievedChunk::new("kb", "1", "a").with_similarity(1.0),
            RetrievedChunk::new("kb", "2", "b").with_similarity(0.5),
        ]
    }

    fn aggregate(answer: &str, g: f64, judge_pass: Option<bool>) -> ConfidenceReport {
        let signals = SignalCollector::new().collect(&chunks(), answer);
        let grounding = grounding(g);
        let policy = judge_pass.map(policy);
        ConfidenceAggregator::new().aggregate(&ConfidenceInputs {
            answer,
            retrieval: &signals.retrieval,
            policy_scan: &signals.policy_scan,
            policy_judgment: policy.as_ref(),
            grounding: &grounding,
        })
    }

    #[test]
    fn test_clean_high_confidence() {
        let report = aggregate("Revenue rose.", 0.95, Some(true));
        // 0.35*0.9 + 0.5*0.95 + 0.15 = 0.94
        assert_eq!(report.score, 94);
        assert_eq!(report.routing, Routing::Stp);
        assert!(report.gates.is_empty());
        assert!(report.policy_passed());
        assert_eq!(report.explanation.version, "v0.1");
        assert!(report.raw_judge_outputs.contains_key("policy_judge"));
    }

    #[test]
    fn test_regex_hit_caps_and_skips_backstop() {
        let report = aggregate("Write to a@b.io", 1.0, None);
        assert_eq!(report.score, 20);
        assert!(report.gates.contains(&Gate::PiiPciDetected));
        assert!(report.gates.contains(&Gate::PolicyViolation));
        assert!(!report.raw_judge_outputs.contains_key("policy_judge"));
        assert_eq!(report.notes[0], "PII/PCI detected: EMAIL");

        let policy = &report.components[POLICY_SCORE];
        assert_eq!(policy.value, 0.0);
        assert_eq!(policy.evidence.as_ref().unwrap().excerpt, "[REDACTED]");
    }

    #[test]
    fn test_policy_judge_fail() {
        let report = aggregate("We will refund you twice.", 1.0, Some(false));
        assert!(report.gates.contains(&Gate::PolicyJudgeFail));
        assert!(report.score <= 20);
        assert_eq!(report.notes[0], "Policy violations: promises refund");
        assert!(!report.policy_passed());
    }

    #[test]
    fn test_low_groundedness_gate() {
        let report = aggregate("Revenue rose.", 0.3, Some(true));
        assert!(report.score <= 50);
        assert!(report.gates.contains(&Gate::LowGroundedness));
        assert_eq!(report.explanation.gates, vec![Gate::LowGroundedness]);
    }

    #[test]
    fn test_aggregate_is_deterministic() {
        let a = aggregate("Revenue rose.", 0.7, Some(true));
        let b = aggregate("Revenue rose.", 0.7, Some(true));
        assert_eq!(a, b);
    }

    #[test]
    fn test_score_bounds() {
        // 0.35*1 + 0.5*0.3 + 0 => capped at 0.2
        assert_eq!(weighted_score(1.0, 0.3, 0.0).score, 20);
        assert_eq!(weighted_score(0.0, 0.0, 0.0).score, 0);
        assert_eq!(weighted_score(1.0, 1.0, 1.0).score, 100);
    }

    proptest! {
        #[test]
        fn policy_zero_caps_at_20(rq in 0.0f64..=1.0, g in 0.0f64..=1.0) {
            prop_assert!(weighted_score(rq, g, 0.0).score <= 20);
        }

        #[test]
        fn low_groundedness_caps_at_50(rq in 0.0f64..=1.0, g in 0.0f64..0.4, p in prop::sample::select(vec![0.0, 1.0])) {
            let b = weighted_score(rq, g, p);
            prop_assert!(b.score <= 50);
            prop_assert!(b.low_groundedness);
        }

        #[test]
        fn gates_never_raise(rq in 0.0f64..=1.0, g in 0.0f64..=1.0, p in prop::sample::select(vec![0.0, 1.0])) {
            let b = weighted_score(rq, g, p);
            prop_assert!(b.capped <= b.weighted_sum);
            prop_assert!(b.score <= 100);
        }
    }
}
