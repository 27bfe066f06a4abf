//! Replay triage: a cheap confidence heuristic for fast feedback.
//!
//! This is not the judged score from [`crate::aggregator`]. It looks only at
//! observable output features and is recorded separately on the run.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::evidence::{keyword_window, Evidence};
use crate::types::ConfidenceComponent;

pub const JSON_PARSED: f64 = 0.35;
pub const RETRIEVAL_MULTI: f64 = 0.25;
pub const RETRIEVAL_SINGLE: f64 = 0.15;
pub const KEYWORD_HIT: f64 = 0.15;
pub const STRUCTURED_LIST: f64 = 0.15;
pub const ERROR_PENALTY: f64 = -1.0;

const WINDOW_BEFORE: usize = 20;
const WINDOW_AFTER: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriageLabel {
    High,
    Medium,
    Low,
}

impl TriageLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl fmt::Display for TriageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable features of a replayed answer.
#[derive(Debug, Clone, Copy)]
pub struct TriageInput<'a> {
    pub response_text: &'a str,
    pub parse_succeeded: bool,
    pub retrieval_count: usize,
    /// The generator failed; the text holds the error
    pub generation_failed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageScore {
    /// In [0, 1], two decimals
    pub score: f64,
    pub label: TriageLabel,
    pub components: BTreeMap<String, ConfidenceComponent>,
}

fn keyword_component(text: &str, keyword: &str, reason_hit: &str, reason_miss: &str) -> ConfidenceComponent {
    match keyword_window(text, keyword, WINDOW_BEFORE, WINDOW_AFTER) {
        Some((start, end)) => {
            let snippet = text[start..end].replace('\n', " ");
            let evidence = Evidence::span("llm_response", text, start, end)
                .with_note(format!("Detected keyword '{}'", keyword));
            ConfidenceComponent::fired(KEYWORD_HIT, reason_hit).with_evidence(Some(Evidence {
                excerpt: format!("...{}...", snippet),
                ..evidence
            }))
        }
        None => ConfidenceComponent::idle(reason_miss),
    }
}

fn has_bullet(text: &str) -> bool {
    text.contains("- ") || text.contains("* ")
}

/// Score a replayed answer.
pub fn replay_triage(input: &TriageInput<'_>) -> TriageScore {
    let mut components = BTreeMap::new();

    if input.generation_failed {
        components.insert(
            "error_penalty".to_string(),
            ConfidenceComponent::fired(ERROR_PENALTY, "Generation failed"),
        );
        return TriageScore {
            score: 0.0,
            label: TriageLabel::Low,
            components,
        };
    }

    let parsed = if input.parse_succeeded {
        ConfidenceComponent::fired(JSON_PARSED, "Structured output (JSON) successfully parsed")
            .with_evidence(Some(Evidence::whole("parsed_forecast", "(valid JSON)")))
    } else {
        ConfidenceComponent::idle("No valid JSON structure found in output")
    };
    components.insert("json_parsed".to_string(), parsed);

    let count = input.retrieval_count;
    let retrieval = match count {
        0 => ConfidenceComponent::idle("No context retrieved"),
        1 => ConfidenceComponent::fired(RETRIEVAL_SINGLE, "Partial grounding: 1 source retrieved"),
        n => ConfidenceComponent::fired(
            RETRIEVAL_MULTI,
            format!("High grounding: {} sources retrieved", n),
        ),
    };
    let retrieval = if count > 0 {
        retrieval.with_evidence(Some(Evidence::whole(
            "retrieved_sources",
            format!("count={}", count),
        )))
    } else {
        retrieval
    };
    components.insert("retrieval_boost".to_string(), retrieval);

    let text = input.response_text;
    components.insert(
        "assumption_check".to_string(),
        keyword_component(
            text,
            "assumption",
            "Model explicitly stated assumptions",
            "Model did not state assumptions",
        ),
    );
    components.insert(
        "risk_analysis".to_string(),
        keyword_component(text, "risk", "Model performed risk analysis", "No risk analysis found"),
    );

    let list = if has_bullet(text) {
        ConfidenceComponent::fired(STRUCTURED_LIST, "Answer uses a bulleted list")
    } else {
        ConfidenceComponent::idle("No bulleted list found")
    };
    components.insert("structured_list".to_string(), list);

    let sum: f64 = components.values().map(|c| c.value).sum();
    let score = ((sum.min(1.0)) * 100.0).round() / 100.0;

    TriageScore {
        score,
        label: TriageLabel::from_score(score),
        components,
    }
}
