//! SignalCollector: heuristic sub-scores computed without external calls.
//!
//! - Retrieval quality from chunk similarities
//! - Regex PII/PCI pre-filter over the answer text
//!
//! A regex hit drives the policy score to 0.0 and lets the caller skip the
//! judge-based policy backstop. The penalty itself is never skipped.

pub mod patterns;
pub mod retrieval;

pub use patterns::{PatternHit, PiiCategory};
pub use retrieval::{retrieval_quality, RetrievalSignal};

use crate::evidence::Evidence;
use crate::types::RetrievedChunk;

/// Result of the regex policy scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PolicyScan {
    pub hits: Vec<PatternHit>,
}

impl PolicyScan {
    pub fn is_clean(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn categories(&self) -> Vec<PiiCategory> {
        self.hits.iter().map(|h| h.category).collect()
    }

    /// Categories joined for notes, e.g. "EMAIL, SSN"
    pub fn label(&self) -> String {
        self.categories()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Redacted evidence for the first hit.
    pub fn evidence(&self, answer: &str) -> Option<Evidence> {
        self.hits.first().map(|hit| {
            Evidence::span("llm_response", answer, hit.start, hit.end)
                .redacted()
                .with_note(hit.category.as_str())
        })
    }
}

/// Collected heuristic signals for one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    pub retrieval: RetrievalSignal,
    pub policy_scan: PolicyScan,
}

/// Stateless collector of heuristic signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalCollector;

impl SignalCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn retrieval(&self, chunks: &[RetrievedChunk]) -> RetrievalSignal {
        RetrievalSignal::from_chunks(chunks)
    }

    pub fn scan_policy(&self, answer: &str) -> PolicyScan {
        let hits = patterns::scan(answer);
        if !hits.is_empty() {
            tracing::debug!(hits = hits.len(), "regex policy scan matched");
        }
        PolicyScan { hits }
    }

    pub fn collect(&self, chunks: &[RetrievedChunk], answer: &str) -> Signals {
        Signals {
            retrieval: self.retrieval(chunks),
            policy_scan: self.scan_policy(answer),
        }
    }
}
