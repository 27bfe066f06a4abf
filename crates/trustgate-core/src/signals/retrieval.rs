//! Retrieval quality signal.

use serde::{Deserialize, Serialize};

use crate::types::RetrievedChunk;

pub const MAX_WEIGHT: f64 = 0.6;
pub const AVG_WEIGHT: f64 = 0.4;

pub const NO_SIMILARITY_SCORES: &str = "no_similarity_scores";

/// Retrieval quality with the values it was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSignal {
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_similarity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avg_similarity: Option<f64>,
    pub scored_chunks: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RetrievalSignal {
    /// `0.6 * max + 0.4 * mean` over the chunks that carry a similarity.
    ///
    /// Chunks without a similarity are ignored. If none carry one the score
    /// is 0.0 with reason `no_similarity_scores`.
    pub fn from_chunks(chunks: &[RetrievedChunk]) -> Self {
        let sims: Vec<f64> = chunks
            .iter()
            .filter_map(|c| c.similarity)
            .filter(|s| s.is_finite())
            .collect();

        if sims.is_empty() {
            return Self {
                score: 0.0,
                max_similarity: None,
                avg_similarity: None,
                scored_chunks: 0,
                reason: Some(NO_SIMILARITY_SCORES.to_string()),
            };
        }

        let max = sims.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = sims.iter().sum::<f64>() / sims.len() as f64;
        let score = (MAX_WEIGHT * max + AVG_WEIGHT * mean).clamp(0.0, 1.0);

        tracing::debug!(score, max, mean, chunks = sims.len(), "retrieval quality");

        Self {
            score,
            max_similarity: Some(max),
            avg_similarity: Some(mean),
            scored_chunks: sims.len(),
            reason: None,
        }
    }

    /// Audit blob stored under `raw_judge_outputs["retrieval"]`.
    pub fn details(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

pub fn retrieval_quality(chunks: &[RetrievedChunk]) -> f64 {
    RetrievalSignal::from_chunks(chunks).score
}
