//! LLM provider abstraction and the judge/generator adapters over it.
//!
//! The HTTP transport is not part of this crate: implement [`LlmProvider`]
//! for your backend and wrap it in [`ProviderJudge`] or [`ProviderGenerator`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::collaborators::{CollaboratorError, GenerationParams, Generator, Judge};
use crate::config::JudgeConfig;

/// System message sent with every judge prompt.
pub const JUDGE_SYSTEM_MESSAGE: &str = "Return ONLY valid JSON.";

/// Errors from LLM providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl From<ProviderError> for CollaboratorError {
    fn from(e: ProviderError) -> Self {
        match e {
            ProviderError::Timeout(d) => CollaboratorError::Timeout(d),
            ProviderError::ApiError { status, .. } if status < 500 && status != 429 => {
                CollaboratorError::Unavailable(e.to_string())
            }
            ProviderError::AuthError | ProviderError::NotConfigured(_) => {
                CollaboratorError::Unavailable(e.to_string())
            }
            other => CollaboratorError::Transport(other.to_string()),
        }
    }
}

/// Configuration for a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionConfig {
    pub model: String,
    pub max_tokens: u32,
    /// 0.0 for deterministic
    pub temperature: f32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 600,
            temperature: 0.0,
        }
    }
}

/// A chat message for LLM completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Role: "system", "user", or "assistant"
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

/// Token usage from a completion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionResponse {
    pub content: String,
    pub usage: TokenUsage,
    pub model: String,
}

/// Chat completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Provider name for logs.
    fn name(&self) -> &str;
}

/// [`Judge`] over a chat provider.
pub struct ProviderJudge<P> {
    provider: P,
    config: CompletionConfig,
}

impl<P: LlmProvider> ProviderJudge<P> {
    pub fn new(provider: P, judge: &JudgeConfig) -> Self {
        Self {
            provider,
            config: CompletionConfig {
                model: judge.model.clone(),
                max_tokens: judge.max_tokens,
                temperature: judge.temperature,
            },
        }
    }
}

#[async_trait]
impl<P: LlmProvider> Judge for ProviderJudge<P> {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        let messages = vec![ChatMessage::system(JUDGE_SYSTEM_MESSAGE), ChatMessage::user(prompt)];
        let response = self.provider.complete(messages, &self.config).await?;
        tracing::debug!(
            provider = self.provider.name(),
            tokens = response.usage.total(),
            "judge completion"
        );
        Ok(response.content)
    }
}

/// [`Generator`] over a chat provider.
pub struct ProviderGenerator<P> {
    provider: P,
    default_model: String,
}

impl<P: LlmProvider> ProviderGenerator<P> {
    pub fn new(provider: P, default_model: impl Into<String>) -> Self {
        Self {
            provider,
            default_model: default_model.into(),
        }
    }
}

#[async_trait]
impl<P: LlmProvider> Generator for ProviderGenerator<P> {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, CollaboratorError> {
        let config = CompletionConfig {
            model: params
                .model
                .clone()
                .unwrap_or_else(|| self.default_model.clone()),
            max_tokens: params.max_tokens,
            temperature: params.temperature,
        };
        let messages = vec![
            ChatMessage::system(system_prompt),
            ChatMessage::user(user_prompt),
        ];
        let response = self.provider.complete(messages, &config).await?;
        Ok(response.content)
    }
}
