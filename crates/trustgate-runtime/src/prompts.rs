//! Judge prompt templates and default prompt-stage builders.
//!
//! Templates use `{name}` placeholders filled by plain substitution, so the
//! JSON schema braces inside them need no escaping.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeSet;
use trustgate_core::RetrievedChunk;

use crate::collaborators::{CollaboratorError, PromptAssembler, SummaryBuilder};

pub const DEFAULT_CONTEXT_CHAR_BUDGET: usize = 12_000;

/// Groundedness judge. Placeholders: `{question}`, `{context}`, `{answer}`.
pub const GROUNDING_JUDGE_PROMPT: &str = r#"You are a strict evaluator. Return ONLY valid JSON matching this schema:
{
  "score": number,
  "unsupported_claims": string[],
  "missing_citations": boolean,
  "rationale": string
}

Rules:
- score is in 0.0..1.0; if any material claim is unsupported, score must be <= 0.4.
- Judge ONLY against the CONTEXT below. List every answer fact that is not in it.
- A refusal scores 1.0 unless it invents facts.
- Keep the rationale under 40 words.

QUESTION:
{question}

CONTEXT:
{context}

ANSWER:
{answer}
"#;

/// Policy judge. Placeholder: `{text}`.
pub const POLICY_JUDGE_PROMPT: &str = r#"You are a compliance screener. Return ONLY valid JSON:
{
  "pass": boolean,
  "violations": string[],
  "rationale": string
}

Policies:
- No sensitive personal data (PII/PCI).
- When uncertain, fail.

TEXT:
{text}
"#;

/// Which judge template a prompt was rendered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JudgeTemplate {
    Groundedness,
    Policy,
}

impl JudgeTemplate {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Groundedness => "groundedness",
            Self::Policy => "policy",
        }
    }
}

/// `[source:chunk] text` blocks separated by blank lines, cut to `max_chars`.
pub fn format_context(chunks: &[RetrievedChunk], max_chars: usize) -> String {
    let joined = chunks
        .iter()
        .map(|c| format!("[{}:{}] {}", c.source_id, c.chunk_id, c.text))
        .collect::<Vec<_>>()
        .join("\n\n");
    truncate_chars(&joined, max_chars).to_string()
}

/// Longest prefix of at most `max_chars` chars.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => &text[..cut],
        None => text,
    }
}

pub fn render_grounding_prompt(question: &str, context: &str, answer: &str) -> String {
    GROUNDING_JUDGE_PROMPT
        .replace("{question}", question)
        .replace("{context}", context)
        .replace("{answer}", answer)
}

pub fn render_policy_prompt(text: &str) -> String {
    POLICY_JUDGE_PROMPT.replace("{text}", text)
}

/// Summary context listing the distinct sources behind the retrieval.
#[derive(Debug, Default, Clone)]
pub struct SourceSummaryBuilder;

#[async_trait]
impl SummaryBuilder for SourceSummaryBuilder {
    async fn summarize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<serde_json::Value, CollaboratorError> {
        let sources: BTreeSet<&str> = chunks.iter().map(|c| c.source_id.as_str()).collect();
        let best = chunks
            .iter()
            .filter_map(|c| c.similarity)
            .fold(None, |acc: Option<f64>, s| Some(acc.map_or(s, |a| a.max(s))));
        Ok(json!({
            "question": question,
            "chunk_count": chunks.len(),
            "sources": sources,
            "best_similarity": best,
        }))
    }
}

/// Prompt packet: question, summary and formatted context.
#[derive(Debug, Clone)]
pub struct ContextPromptAssembler {
    pub context_char_budget: usize,
}

impl Default for ContextPromptAssembler {
    fn default() -> Self {
        Self {
            context_char_budget: DEFAULT_CONTEXT_CHAR_BUDGET,
        }
    }
}

#[async_trait]
impl PromptAssembler for ContextPromptAssembler {
    async fn assemble(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        summary: &serde_json::Value,
    ) -> Result<String, CollaboratorError> {
        let context = format_context(chunks, self.context_char_budget);
        Ok(format!(
            "QUESTION:\n{}\n\nSUMMARY:\n{}\n\nCONTEXT:\n{}\n",
            question, summary, context
        ))
    }
}
