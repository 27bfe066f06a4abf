//! Stage execution shared by the answer pipeline and the replay engine.

use std::sync::Arc;
use tracing::{debug, warn};
use trustgate_core::{GenerationOutput, RetrievedChunk};

use crate::collaborators::{
    CollaboratorError, GenerationParams, Generator, PromptAssembler, Retriever, SummaryBuilder,
};
use crate::config::GeneratorConfig;
use crate::guard::{Disposition, GuardVerdict, PolicyGuard};
use crate::prompts::{ContextPromptAssembler, SourceSummaryBuilder};
use crate::resilience::RetryPolicy;

pub const GUARDRAILS_WARNING: &str = "[GUARDRAILS WARNING]";

/// The collaborators a staged run calls, one per producing stage.
#[derive(Clone)]
pub struct StageCollaborators {
    pub retriever: Arc<dyn Retriever>,
    pub summarizer: Arc<dyn SummaryBuilder>,
    pub assembler: Arc<dyn PromptAssembler>,
    pub generator: Arc<dyn Generator>,
    pub guard: Arc<dyn PolicyGuard>,
}

impl StageCollaborators {
    /// Default summary and prompt builders around the given collaborators.
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        guard: Arc<dyn PolicyGuard>,
    ) -> Self {
        Self {
            retriever,
            summarizer: Arc::new(SourceSummaryBuilder),
            assembler: Arc::new(ContextPromptAssembler::default()),
            generator,
            guard,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<dyn SummaryBuilder>) -> Self {
        self.summarizer = summarizer;
        self
    }

    pub fn with_assembler(mut self, assembler: Arc<dyn PromptAssembler>) -> Self {
        self.assembler = assembler;
        self
    }
}

/// Outcome of the guarded generation step.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationStep {
    /// The input guard failed hard; the generator was not called.
    Blocked { verdict: GuardVerdict },
    Generated {
        text: String,
        input: GuardVerdict,
        output: GuardVerdict,
    },
    Failed { error: String, input: GuardVerdict },
}

impl GenerationStep {
    /// Generation stage content. `None` when blocked.
    pub fn output(&self) -> Option<GenerationOutput> {
        match self {
            Self::Blocked { .. } => None,
            Self::Generated { text, .. } => Some(GenerationOutput::Text(text.clone())),
            Self::Failed { error, .. } => Some(GenerationOutput::Error(error.clone())),
        }
    }

    /// Prompt the generator was handed, after input guard fixes. `None` when blocked.
    pub fn sent_prompt(&self) -> Option<&str> {
        match self {
            Self::Blocked { .. } => None,
            Self::Generated { input, .. } | Self::Failed { input, .. } => {
                Some(input.validated_text.as_str())
            }
        }
    }

    /// Guard messages worth keeping as run notes.
    pub fn guard_notes(&self) -> Vec<String> {
        let mut notes = Vec::new();
        let input = match self {
            Self::Blocked { verdict } => verdict,
            Self::Generated { input, .. } | Self::Failed { input, .. } => input,
        };
        if let Some(msg) = &input.message {
            notes.push(format!("Input guard: {}", msg));
        }
        if let Self::Generated { output, .. } = self {
            if let Some(msg) = &output.message {
                notes.push(format!("Output guard: {}", msg));
            }
        }
        notes
    }
}

/// Final answer text after the output guard: fixes applied, and a warning
/// appended when any policy was hit. Content is never dropped.
pub fn apply_output_verdict(verdict: &GuardVerdict) -> String {
    match (&verdict.message, verdict.disposition) {
        (Some(msg), Disposition::Enforced | Disposition::MonitorOnly) => {
            format!("{}\n{}: {}", verdict.validated_text, GUARDRAILS_WARNING, msg)
        }
        _ => verdict.validated_text.clone(),
    }
}

pub(crate) struct StageExecutor {
    collaborators: StageCollaborators,
    retry: RetryPolicy,
    system_prompt: String,
    generator_config: GeneratorConfig,
}

impl StageExecutor {
    pub fn new(
        collaborators: StageCollaborators,
        generator_config: GeneratorConfig,
        system_prompt: impl Into<String>,
    ) -> Self {
        Self {
            collaborators,
            retry: generator_config.retry_policy(),
            system_prompt: system_prompt.into(),
            generator_config,
        }
    }

    pub fn params(&self, model: Option<String>, temperature: Option<f32>) -> GenerationParams {
        GenerationParams {
            model,
            temperature: temperature.unwrap_or(self.generator_config.temperature),
            max_tokens: self.generator_config.max_tokens,
        }
    }

    pub async fn retrieve(
        &self,
        question: &str,
        corpus: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        let chunks = self
            .collaborators
            .retriever
            .search(question, corpus, top_k)
            .await?;
        debug!(corpus, top_k, returned = chunks.len(), "retrieval done");
        Ok(chunks)
    }

    pub async fn summarize(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
    ) -> Result<serde_json::Value, CollaboratorError> {
        self.collaborators.summarizer.summarize(question, chunks).await
    }

    pub async fn assemble(
        &self,
        question: &str,
        chunks: &[RetrievedChunk],
        summary: &serde_json::Value,
    ) -> Result<String, CollaboratorError> {
        self.collaborators
            .assembler
            .assemble(question, chunks, summary)
            .await
    }

    /// Input guard, generator with retry, output guard.
    pub async fn generate(&self, prompt: &str, params: &GenerationParams) -> GenerationStep {
        let input = self.collaborators.guard.validate_input(prompt);
        if input.is_hard_failure() {
            warn!(failures = ?input.failures, "input guard blocked generation");
            return GenerationStep::Blocked { verdict: input };
        }

        let user_prompt = input.validated_text.as_str();
        let result = self
            .retry
            .run("generator", || {
                self.collaborators
                    .generator
                    .generate(&self.system_prompt, user_prompt, params)
            })
            .await;

        match result {
            Ok(raw) => {
                let output = self.collaborators.guard.validate_output(&raw);
                GenerationStep::Generated {
                    text: apply_output_verdict(&output),
                    input,
                    output,
                }
            }
            Err(e) => {
                warn!(attempts = e.attempts, error = %e.last, "generation failed");
                GenerationStep::Failed {
                    error: e.to_string(),
                    input,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::{GuardConfig, GuardMetrics, PolicyMode, StandardGuard};
    use crate::testing::{sample_chunks, ScriptedGenerator, StaticRetriever};
    use std::time::Duration;

    fn executor(generator: Arc<ScriptedGenerator>) -> StageExecutor {
        let config = GuardConfig {
            toxic_blocklist: vec!["idiot".into()],
            ..GuardConfig::default()
        };
        let guard = Arc::new(StandardGuard::new(config, GuardMetrics::new()));
        let collaborators = StageCollaborators::new(
            Arc::new(StaticRetriever::new(sample_chunks())),
            generator,
            guard,
        );
        let generator_config = GeneratorConfig {
            backoff: Duration::from_millis(10),
            ..GeneratorConfig::default()
        };
        StageExecutor::new(collaborators, generator_config, "SYSTEM")
    }

    #[tokio::test(start_paused = true)]
    async fn test_input_guard_blocks_before_generation() {
        let generator = Arc::new(ScriptedGenerator::new("ok"));
        let exec = executor(generator.clone());

        let step = exec
            .generate("Email jane@corp.com", &exec.params(None, None))
            .await;
        assert!(matches!(step, GenerationStep::Blocked { .. }));
        assert_eq!(step.output(), None);
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_output_guard_fixes_and_warns() {
        let generator = Arc::new(ScriptedGenerator::new("You idiot, revenue is up."));
        let exec = executor(generator.clone());

        let step = exec.generate("Forecast?", &exec.params(None, Some(0.7))).await;
        let GenerationStep::Generated { text, .. } = &step else {
            panic!("expected generated, got {:?}", step);
        };
        assert!(text.starts_with("You *****, revenue is up.\n[GUARDRAILS WARNING]: toxicity:"));
        assert_eq!(generator.last_params().unwrap().temperature, 0.7);
        assert_eq!(generator.last_user_prompt().as_deref(), Some("Forecast?"));
        assert_eq!(step.sent_prompt(), Some("Forecast?"));
        assert_eq!(step.guard_notes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_fix_reaches_generator() {
        let generator = Arc::new(ScriptedGenerator::new("ok"));
        let mut config = GuardConfig {
            toxic_blocklist: vec!["idiot".into()],
            ..GuardConfig::default()
        };
        config.modes.insert("toxicity".into(), PolicyMode::Monitor);
        let collaborators = StageCollaborators::new(
            Arc::new(StaticRetriever::new(sample_chunks())),
            generator.clone(),
            Arc::new(StandardGuard::new(config, GuardMetrics::new())),
        );
        let exec = StageExecutor::new(collaborators, GeneratorConfig::default(), "SYSTEM");

        let step = exec.generate("Why is the idiot late?", &exec.params(None, None)).await;
        assert_eq!(step.sent_prompt(), Some("Why is the ***** late?"));
        assert_eq!(generator.last_user_prompt().as_deref(), step.sent_prompt());
    }

    #[tokio::test(start_paused = true)]
    async fn test_generator_failure_is_captured() {
        let down = || Err(CollaboratorError::Transport("503".into()));
        let generator = Arc::new(ScriptedGenerator::new("ok").push(down()).push(down()).push(down()));
        let exec = executor(generator.clone());

        let step = exec.generate("Forecast?", &exec.params(None, None)).await;
        match step.output() {
            Some(GenerationOutput::Error(msg)) => assert!(msg.contains("503")),
            other => panic!("expected error output, got {:?}", other),
        }
        assert_eq!(generator.calls(), 3);
    }

    #[test]
    fn test_clean_output_untouched() {
        let verdict = GuardVerdict {
            passed: true,
            failures: vec![],
            validated_text: "fine".into(),
            message: None,
            disposition: Disposition::Passed,
        };
        assert_eq!(apply_output_verdict(&verdict), "fine");
    }
}
