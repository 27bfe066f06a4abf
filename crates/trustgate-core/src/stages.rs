//! Staged artifacts of the answer-production pipeline.
//!
//! A run holds up to six named stages, in order:
//! Question, Retrieval, SummaryContext, PromptAssembly, Generation, Parse.
//! Each stored value records its provenance so a replay can state exactly
//! which stages it recomputed and which it carried over.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::RetrievedChunk;

lazy_static! {
    /// Fenced ```json block, non-greedy body
    static ref FENCED_JSON: Regex = Regex::new(r"```json\s*([\s\S]*?)\s*```").unwrap();
}

/// One named step of the pipeline, ordered by index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Question,
    Retrieval,
    SummaryContext,
    PromptAssembly,
    Generation,
    Parse,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Question,
        Stage::Retrieval,
        Stage::SummaryContext,
        Stage::PromptAssembly,
        Stage::Generation,
        Stage::Parse,
    ];

    pub fn index(self) -> u8 {
        match self {
            Self::Question => 0,
            Self::Retrieval => 1,
            Self::SummaryContext => 2,
            Self::PromptAssembly => 3,
            Self::Generation => 4,
            Self::Parse => 5,
        }
    }

    pub fn from_index(index: u8) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::Retrieval => "retrieval",
            Self::SummaryContext => "summary_context",
            Self::PromptAssembly => "prompt_assembly",
            Self::Generation => "generation",
            Self::Parse => "parse",
        }
    }

    /// Whether this stage lies in the recompute range of a replay starting at `from`.
    pub fn in_replay_range(self, from: Stage) -> bool {
        self >= from
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a stage value came from, relative to the run holding it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Produced by the source run pipeline, or carried unchanged from the parent run
    Source,
    /// Supplied by the caller as a replay override
    Overridden,
    /// Recomputed by the replay
    Recomputed,
}

/// A stage value with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageValue<T> {
    pub value: T,
    pub provenance: Provenance,
}

impl<T> StageValue<T> {
    pub fn source(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Source,
        }
    }

    pub fn overridden(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Overridden,
        }
    }

    pub fn recomputed(value: T) -> Self {
        Self {
            value,
            provenance: Provenance::Recomputed,
        }
    }
}

impl<T: Clone> StageValue<T> {
    /// The same value, marked as carried from a parent run.
    pub fn carried(&self) -> Self {
        Self::source(self.value.clone())
    }
}

/// Generation stage content. A collaborator failure is kept as text for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "content", rename_all = "snake_case")]
pub enum GenerationOutput {
    Text(String),
    Error(String),
}

impl GenerationOutput {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(t) | Self::Error(t) => t,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Parse stage content: the extracted payload, or the reason there is none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParseArtifact {
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ParseArtifact {
    pub fn success(payload: serde_json::Value) -> Self {
        Self {
            payload: Some(payload),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.payload.is_some() && self.error.is_none()
    }
}

/// Extract the structured payload from generation text.
///
/// A fenced ```json block wins; otherwise the whole text is tried as JSON.
/// A single object is normalized to a one-element array. Never fails: a
/// parse problem is recorded in the artifact.
pub fn parse_generation(text: &str) -> ParseArtifact {
    let (candidate, fenced) = match FENCED_JSON.captures(text).and_then(|c| c.get(1)) {
        Some(m) => (m.as_str(), true),
        None => (text.trim(), false),
    };

    match serde_json::from_str::<serde_json::Value>(candidate) {
        Ok(value @ serde_json::Value::Object(_)) => {
            ParseArtifact::success(serde_json::Value::Array(vec![value]))
        }
        Ok(value) => ParseArtifact::success(value),
        Err(e) if fenced => ParseArtifact::failure(format!("invalid JSON in fenced block: {}", e)),
        Err(e) => ParseArtifact::failure(format!("no JSON payload found: {}", e)),
    }
}

/// Attempt to rewrite a stage that already holds a different value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("stage '{stage}' is already set and cannot be changed")]
pub struct StageConflict {
    pub stage: Stage,
}

/// The six optional named stages of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageArtifactSet {
    #[serde(default)]
    pub question: Option<StageValue<String>>,
    #[serde(default)]
    pub retrieval: Option<StageValue<Vec<RetrievedChunk>>>,
    #[serde(default)]
    pub summary_context: Option<StageValue<serde_json::Value>>,
    #[serde(default)]
    pub prompt_assembly: Option<StageValue<String>>,
    #[serde(default)]
    pub generation: Option<StageValue<GenerationOutput>>,
    #[serde(default)]
    pub parse: Option<StageValue<ParseArtifact>>,
}

impl StageArtifactSet {
    pub fn provenance(&self, stage: Stage) -> Option<Provenance> {
        match stage {
            Stage::Question => self.question.as_ref().map(|s| s.provenance),
            Stage::Retrieval => self.retrieval.as_ref().map(|s| s.provenance),
            Stage::SummaryContext => self.summary_context.as_ref().map(|s| s.provenance),
            Stage::PromptAssembly => self.prompt_assembly.as_ref().map(|s| s.provenance),
            Stage::Generation => self.generation.as_ref().map(|s| s.provenance),
            Stage::Parse => self.parse.as_ref().map(|s| s.provenance),
        }
    }

    pub fn is_set(&self, stage: Stage) -> bool {
        self.provenance(stage).is_some()
    }

    /// Stages holding a value with the given provenance, in pipeline order.
    pub fn stages_with(&self, provenance: Provenance) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.provenance(*s) == Some(provenance))
            .collect()
    }

    /// A working copy for a child run: every value marked as carried.
    pub fn carried(&self) -> Self {
        Self {
            question: self.question.as_ref().map(StageValue::carried),
            retrieval: self.retrieval.as_ref().map(StageValue::carried),
            summary_context: self.summary_context.as_ref().map(StageValue::carried),
            prompt_assembly: self.prompt_assembly.as_ref().map(StageValue::carried),
            generation: self.generation.as_ref().map(StageValue::carried),
            parse: self.parse.as_ref().map(StageValue::carried),
        }
    }

    /// Apply overrides onto this set. Returns the overridden stages.
    pub fn apply_overrides(&mut self, overrides: StageOverrides) -> Vec<Stage> {
        let applied = overrides.stages();
        if let Some(v) = overrides.question {
            self.question = Some(StageValue::overridden(v));
        }
        if let Some(v) = overrides.retrieval {
            self.retrieval = Some(StageValue::overridden(v));
        }
        if let Some(v) = overrides.summary_context {
            self.summary_context = Some(StageValue::overridden(v));
        }
        if let Some(v) = overrides.prompt_assembly {
            self.prompt_assembly = Some(StageValue::overridden(v));
        }
        if let Some(v) = overrides.generation {
            self.generation = Some(StageValue::overridden(GenerationOutput::Text(v)));
        }
        if let Some(v) = overrides.parse {
            self.parse = Some(StageValue::overridden(v));
        }
        applied
    }

    /// Fill stages from `incoming`. A stage that is already set may only be
    /// re-written with an identical value.
    pub fn merge_from(&mut self, incoming: StageArtifactSet) -> Result<(), StageConflict> {
        // Check every slot first so a conflict leaves `self` untouched.
        let mut staged = self.clone();
        merge_slot(&mut staged.question, incoming.question, Stage::Question)?;
        merge_slot(&mut staged.retrieval, incoming.retrieval, Stage::Retrieval)?;
        merge_slot(
            &mut staged.summary_context,
            incoming.summary_context,
            Stage::SummaryContext,
        )?;
        merge_slot(
            &mut staged.prompt_assembly,
            incoming.prompt_assembly,
            Stage::PromptAssembly,
        )?;
        merge_slot(&mut staged.generation, incoming.generation, Stage::Generation)?;
        merge_slot(&mut staged.parse, incoming.parse, Stage::Parse)?;
        *self = staged;
        Ok(())
    }

    pub fn question_text(&self) -> Option<&str> {
        self.question.as_ref().map(|s| s.value.as_str())
    }

    pub fn chunks(&self) -> &[RetrievedChunk] {
        self.retrieval
            .as_ref()
            .map(|s| s.value.as_slice())
            .unwrap_or(&[])
    }

    pub fn retrieval_count(&self) -> usize {
        self.chunks().len()
    }

    pub fn prompt_text(&self) -> Option<&str> {
        self.prompt_assembly.as_ref().map(|s| s.value.as_str())
    }

    pub fn generation_text(&self) -> Option<&str> {
        self.generation.as_ref().map(|s| s.value.text())
    }
}

fn merge_slot<T: PartialEq>(
    slot: &mut Option<StageValue<T>>,
    incoming: Option<StageValue<T>>,
    stage: Stage,
) -> Result<(), StageConflict> {
    match (slot.as_ref(), incoming) {
        (_, None) => Ok(()),
        (None, Some(v)) => {
            *slot = Some(v);
            Ok(())
        }
        (Some(existing), Some(v)) if *existing == v => Ok(()),
        (Some(_), Some(_)) => Err(StageConflict { stage }),
    }
}

/// Caller-supplied replacement values for a replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StageOverrides {
    #[serde(default)]
    pub question: Option<String>,
    #[serde(default)]
    pub retrieval: Option<Vec<RetrievedChunk>>,
    #[serde(default)]
    pub summary_context: Option<serde_json::Value>,
    #[serde(default)]
    pub prompt_assembly: Option<String>,
    #[serde(default)]
    pub generation: Option<String>,
    #[serde(default)]
    pub parse: Option<ParseArtifact>,
}

impl StageOverrides {
    pub fn is_empty(&self) -> bool {
        self.stages().is_empty()
    }

    /// Stages this set overrides, in pipeline order.
    pub fn stages(&self) -> Vec<Stage> {
        let present = [
            (Stage::Question, self.question.is_some()),
            (Stage::Retrieval, self.retrieval.is_some()),
            (Stage::SummaryContext, self.summary_context.is_some()),
            (Stage::PromptAssembly, self.prompt_assembly.is_some()),
            (Stage::Generation, self.generation.is_some()),
            (Stage::Parse, self.parse.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(stage, set)| set.then_some(stage))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stage_index_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_index(stage.index()), Some(stage));
        }
        assert_eq!(Stage::from_index(6), None);
    }

    #[test]
    fn test_replay_range() {
        assert!(Stage::Parse.in_replay_range(Stage::Generation));
        assert!(Stage::Generation.in_replay_range(Stage::Generation));
        assert!(!Stage::PromptAssembly.in_replay_range(Stage::Generation));
    }

    #[test]
    fn test_parse_fenced_block() {
        let text = "Forecast below.\n```json\n{\"forecast_adjustment\": \"+12%\"}\n```\nDone.";
        let artifact = parse_generation(text);
        assert!(artifact.succeeded());
        assert_eq!(artifact.payload.unwrap(), json!([{"forecast_adjustment": "+12%"}]));
    }

    #[test]
    fn test_parse_whole_text() {
        let artifact = parse_generation("  [1, 2, 3] ");
        assert_eq!(artifact.payload.unwrap(), json!([1, 2, 3]));
    }

    #[test]
    fn test_parse_failure_is_recorded() {
        let artifact = parse_generation("Plain prose answer.");
        assert!(!artifact.succeeded());
        assert!(artifact.error.unwrap().starts_with("no JSON payload found"));

        let broken = parse_generation("```json\n{not json}\n```");
        assert!(broken.error.unwrap().starts_with("invalid JSON in fenced block"));
    }

    #[test]
    fn test_overrides_mark_provenance() {
        let mut set = StageArtifactSet {
            question: Some(StageValue::source("q".to_string())),
            prompt_assembly: Some(StageValue::source("p".to_string())),
            ..Default::default()
        };
        let applied = set.apply_overrides(StageOverrides {
            prompt_assembly: Some("p2".to_string()),
            ..Default::default()
        });

        assert_eq!(applied, vec![Stage::PromptAssembly]);
        assert_eq!(set.prompt_text(), Some("p2"));
        assert_eq!(set.provenance(Stage::PromptAssembly), Some(Provenance::Overridden));
        assert_eq!(set.provenance(Stage::Question), Some(Provenance::Source));
    }

    #[test]
    fn test_carried_resets_provenance() {
        let set = StageArtifactSet {
            question: Some(StageValue::recomputed("q".to_string())),
            ..Default::default()
        };
        let carried = set.carried();
        assert_eq!(carried.provenance(Stage::Question), Some(Provenance::Source));
        assert_eq!(carried.question_text(), Some("q"));
    }

    #[test]
    fn test_merge_rejects_rewrite() {
        let mut set = StageArtifactSet {
            question: Some(StageValue::source("q".to_string())),
            ..Default::default()
        };

        // Identical value is accepted, new stage is filled
        let same = StageArtifactSet {
            question: Some(StageValue::source("q".to_string())),
            prompt_assembly: Some(StageValue::source("p".to_string())),
            ..Default::default()
        };
        assert!(set.merge_from(same).is_ok());
        assert_eq!(set.prompt_text(), Some("p"));

        let different = StageArtifactSet {
            question: Some(StageValue::source("other".to_string())),
            parse: Some(StageValue::source(ParseArtifact::failure("x"))),
            ..Default::default()
        };
        let err = set.merge_from(different).unwrap_err();
        assert_eq!(err.stage, Stage::Question);
        // Nothing from the rejected merge leaked in
        assert!(set.parse.is_none());
    }
}
