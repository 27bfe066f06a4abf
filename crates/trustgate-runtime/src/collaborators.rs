//! Capability traits for the external collaborators.
//!
//! The runtime never talks to a model, a search index or a store directly:
//! each is reached through one of these traits so deterministic doubles can
//! stand in for tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use trustgate_core::{RetrievedChunk, Run};

/// Failure of an external collaborator call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CollaboratorError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("collaborator unavailable: {0}")]
    Unavailable(String),
}

impl CollaboratorError {
    /// Transport failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout(_))
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// `None` uses the generator's own default model
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// Produces answer text.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, CollaboratorError>;
}

/// Judge-capable text completion.
#[async_trait]
pub trait Judge: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError>;
}

/// Ranked context search.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        corpus: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError>;
}

/// Builds the summary-context stage from retrieved chunks.
#[async_trait]
pub trait SummaryBuilder: Send + Sync {
    async fn summarize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<serde_json::Value, CollaboratorError>;
}

/// Renders the prompt-assembly stage.
#[async_trait]
pub trait PromptAssembler: Send + Sync {
    async fn assemble(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        summary: &serde_json::Value,
    ) -> Result<String, CollaboratorError>;
}

/// Secondary metric judge run off the primary path.
#[async_trait]
pub trait DeepEvaluator: Send + Sync {
    async fn evaluate(&self, run: &Run) -> Result<BTreeMap<String, f64>, CollaboratorError>;
}
