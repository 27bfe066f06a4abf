//! # trustgate-runtime
//!
//! Async runtime around `trustgate-core`: calls the judge and generator,
//! runs the primary answer flow and staged replays, and persists runs,
//! events and alerts.
//!
//! ## Important
//!
//! Every external system is reached through a trait in [`collaborators`]
//! (plus [`PolicyGuard`], [`RunStore`] and [`AlertStore`]). The runtime
//! never panics on a collaborator failure: generator errors end up in the
//! run, judge errors leave the run without confidence, and deep evaluation
//! failures only append an audit event.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use trustgate_runtime::{
//!     AnswerPipeline, ExecutionOptions, GuardMetrics, InMemoryAlertStore, InMemoryRunStore,
//!     ReplayEngine, ReplayRequest, RuntimeConfig, StageCollaborators, StandardGuard,
//! };
//! use trustgate_core::Stage;
//!
//! let config = RuntimeConfig::from_yaml_file("trustgate.yaml")?.with_env_overrides()?;
//! let store = Arc::new(InMemoryRunStore::new());
//! let guard = Arc::new(StandardGuard::new(config.guard.clone(), GuardMetrics::new()));
//! let collaborators = StageCollaborators::new(retriever, generator, guard);
//!
//! let pipeline = AnswerPipeline::new(
//!     &config,
//!     collaborators.clone(),
//!     judge,
//!     store.clone(),
//!     Arc::new(InMemoryAlertStore::new()),
//! );
//! let outcome = pipeline.run("What is the Q3 forecast?", &ExecutionOptions::default()).await?;
//!
//! let replays = ReplayEngine::new(&config, collaborators, store);
//! let replay = replays
//!     .replay(ReplayRequest::new(&outcome.run.id, Stage::Generation))
//!     .await?;
//! assert_eq!(replay.run.parent_id.as_deref(), Some(outcome.run.id.as_str()));
//! ```

pub mod alerts;
pub mod cache;
pub mod collaborators;
pub mod config;
pub mod deep_eval;
pub mod execution;
pub mod guard;
pub mod judge;
pub mod pipeline;
pub mod prompts;
pub mod providers;
pub mod replay;
pub mod reporting;
pub mod resilience;
pub mod scoring;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::AlertService;
pub use cache::{CacheKey, JudgeCache};
pub use collaborators::{
    CollaboratorError, DeepEvaluator, GenerationParams, Generator, Judge, PromptAssembler,
    Retriever, SummaryBuilder,
};
pub use config::{ConfigError, RuntimeConfig};
pub use deep_eval::DeepEvalScheduler;
pub use execution::{GenerationStep, StageCollaborators};
pub use guard::{
    GuardConfig, GuardMetrics, GuardVerdict, PolicyGuard, PolicyKind, PolicyMode, PolicyPipeline,
    StandardGuard,
};
pub use judge::JudgeInvoker;
pub use pipeline::{AnswerOutcome, AnswerPipeline, ExecutionOptions, PipelineError};
pub use providers::{LlmProvider, ProviderError, ProviderGenerator, ProviderJudge};
pub use replay::{ReplayEngine, ReplayError, ReplayOutcome, ReplayRequest};
pub use reporting::KpiService;
pub use resilience::{RetryExhausted, RetryPolicy};
pub use scoring::{ConfidenceService, ScoringError};
pub use store::{
    AlertStore, InMemoryAlertStore, InMemoryRunStore, RunEvent, RunPatch, RunStore, StoreError,
};
