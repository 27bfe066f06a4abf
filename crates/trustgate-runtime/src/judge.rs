//! JudgeInvoker: prompts the judge, extracts JSON, retries transport failures.

use serde::de::DeserializeOwned;
use std::sync::Arc;
use trustgate_core::{
    GroundednessJudgment, JudgeError, ParsedJudgment, PolicyJudgment, RetrievedChunk,
};

use crate::cache::{CacheKey, JudgeCache};
use crate::collaborators::Judge;
use crate::config::JudgeConfig;
use crate::prompts::{format_context, render_grounding_prompt, render_policy_prompt, JudgeTemplate};
use crate::resilience::{RetryExhausted, RetryPolicy};

fn transport_exhausted(e: RetryExhausted) -> JudgeError {
    JudgeError::TransportExhausted {
        attempts: e.attempts,
        last_error: e.last.to_string(),
    }
}

/// Calls the judge collaborator with retry and an optional response cache.
pub struct JudgeInvoker {
    judge: Arc<dyn Judge>,
    retry: RetryPolicy,
    context_char_budget: usize,
    cache: Option<JudgeCache>,
}

impl JudgeInvoker {
    pub fn new(judge: Arc<dyn Judge>, config: &JudgeConfig) -> Self {
        let cache = (config.cache_entries > 0)
            .then(|| JudgeCache::new(config.cache_entries, config.cache_ttl));
        Self {
            judge,
            retry: config.retry_policy(),
            context_char_budget: config.context_char_budget,
            cache,
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn context_char_budget(&self) -> usize {
        self.context_char_budget
    }

    pub async fn judge_groundedness(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        answer: &str,
    ) -> Result<ParsedJudgment<GroundednessJudgment>, JudgeError> {
        let context = format_context(chunks, self.context_char_budget);
        let prompt = render_grounding_prompt(question, &context, answer);
        self.invoke(JudgeTemplate::Groundedness, &prompt).await
    }

    pub async fn judge_policy(
        &self,
        answer: &str,
    ) -> Result<ParsedJudgment<PolicyJudgment>, JudgeError> {
        let prompt = render_policy_prompt(answer);
        self.invoke(JudgeTemplate::Policy, &prompt).await
    }

    async fn invoke<T: DeserializeOwned>(
        &self,
        template: JudgeTemplate,
        prompt: &str,
    ) -> Result<ParsedJudgment<T>, JudgeError> {
        let key = CacheKey::new(template, prompt);
        if let Some(cache) = &self.cache {
            if let Some(text) = cache.get(&key).await {
                tracing::debug!(template = template.as_str(), "judge cache hit");
                return ParsedJudgment::parse(&text);
            }
        }

        let text = self
            .retry
            .run("judge", || self.judge.complete(prompt))
            .await
            .map_err(transport_exhausted)?;

        let parsed = ParsedJudgment::parse(&text);
        match &parsed {
            Ok(_) => {
                if let Some(cache) = &self.cache {
                    cache.insert(key, text).await;
                }
            }
            Err(e) => {
                tracing::warn!(template = template.as_str(), error = %e, "judge response rejected");
            }
        }
        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::CollaboratorError;
    use crate::testing::{sample_chunks, ScriptedJudge};

    fn config() -> JudgeConfig {
        JudgeConfig::default()
    }

    #[tokio::test(start_paused = true)]
    async fn test_groundedness_parsed() {
        let judge = Arc::new(ScriptedJudge::new(0.8, true));
        let invoker = JudgeInvoker::new(judge.clone(), &config());

        let parsed = invoker
            .judge_groundedness("Q?", &sample_chunks(), "A.")
            .await
            .unwrap();
        assert_eq!(parsed.judgment.score, 0.8);
        assert_eq!(parsed.raw["rationale"], "scripted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transport_then_succeeds() {
        let judge = Arc::new(
            ScriptedJudge::new(0.6, true)
                .push_policy(Err(CollaboratorError::Transport("reset".into())))
                .push_policy(Err(CollaboratorError::Timeout(std::time::Duration::from_secs(1)))),
        );
        let invoker = JudgeInvoker::new(judge.clone(), &config());

        let parsed = invoker.judge_policy("A.").await.unwrap();
        assert!(parsed.judgment.pass);
        assert_eq!(judge.policy_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_exhausted() {
        let down = || Err(CollaboratorError::Transport("down".into()));
        let judge = Arc::new(
            ScriptedJudge::new(0.6, true)
                .push_grounding(down())
                .push_grounding(down())
                .push_grounding(down()),
        );
        let invoker = JudgeInvoker::new(judge.clone(), &config());

        let err = invoker
            .judge_groundedness("Q?", &[], "A.")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            JudgeError::TransportExhausted {
                attempts: 3,
                last_error: "transport error: down".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_is_not_retried() {
        let judge = Arc::new(ScriptedJudge::new(0.6, true).push_grounding(Ok("I think 0.7".into())));
        let invoker = JudgeInvoker::new(judge.clone(), &config());

        let err = invoker.judge_groundedness("Q?", &[], "A.").await.unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
        assert_eq!(judge.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_pins_repeated_prompt() {
        let judge = Arc::new(
            ScriptedJudge::new(0.2, true).push_grounding(Ok("{\"score\": 0.9}".into())),
        );
        let invoker = JudgeInvoker::new(judge.clone(), &config());

        let first = invoker.judge_groundedness("Q?", &[], "A.").await.unwrap();
        let second = invoker.judge_groundedness("Q?", &[], "A.").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(judge.calls(), 1);

        let uncached = JudgeInvoker::new(judge.clone(), &config()).without_cache();
        let third = uncached.judge_groundedness("Q?", &[], "A.").await.unwrap();
        assert_eq!(third.judgment.score, 0.2);
    }
}
