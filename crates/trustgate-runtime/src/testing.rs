//! Deterministic collaborator doubles for tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use trustgate_core::{RetrievedChunk, Run};

use tracing_subscriber::EnvFilter;

use crate::collaborators::{
    CollaboratorError, DeepEvaluator, GenerationParams, Generator, Judge, Retriever,
};

/// Route `tracing` output through the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Scripted = Mutex<VecDeque<Result<String, CollaboratorError>>>;

/// Judge answering from per-template scripts, falling back to fixed payloads.
pub struct ScriptedJudge {
    grounding: Scripted,
    policy: Scripted,
    default_grounding: String,
    default_policy: String,
    calls: AtomicUsize,
    policy_calls: AtomicUsize,
}

impl ScriptedJudge {
    pub fn new(grounding_score: f64, policy_pass: bool) -> Self {
        Self {
            grounding: Mutex::new(VecDeque::new()),
            policy: Mutex::new(VecDeque::new()),
            default_grounding: format!(
                "{{\"score\": {}, \"unsupported_claims\": [], \"missing_citations\": false, \"rationale\": \"scripted\"}}",
                grounding_score
            ),
            default_policy: format!(
                "{{\"pass\": {}, \"violations\": {}, \"rationale\": \"scripted\"}}",
                policy_pass,
                if policy_pass { "[]" } else { "[\"scripted violation\"]" }
            ),
            calls: AtomicUsize::new(0),
            policy_calls: AtomicUsize::new(0),
        }
    }

    pub fn push_grounding(self, response: Result<String, CollaboratorError>) -> Self {
        self.grounding.lock().push_back(response);
        self
    }

    pub fn push_policy(self, response: Result<String, CollaboratorError>) -> Self {
        self.policy.lock().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn policy_calls(&self) -> usize {
        self.policy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Judge for ScriptedJudge {
    async fn complete(&self, prompt: &str) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if prompt.contains("compliance screener") {
            self.policy_calls.fetch_add(1, Ordering::SeqCst);
            let next = self.policy.lock().pop_front();
            next.unwrap_or_else(|| Ok(self.default_policy.clone()))
        } else {
            let next = self.grounding.lock().pop_front();
            next.unwrap_or_else(|| Ok(self.default_grounding.clone()))
        }
    }
}

/// Generator replaying scripted results, then a fixed answer.
pub struct ScriptedGenerator {
    script: Scripted,
    default_answer: String,
    prompts: Mutex<Vec<(String, String, GenerationParams)>>,
}

impl ScriptedGenerator {
    pub fn new(default_answer: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_answer: default_answer.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(self, response: Result<String, CollaboratorError>) -> Self {
        self.script.lock().push_back(response);
        self
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().len()
    }

    pub fn last_user_prompt(&self) -> Option<String> {
        self.prompts.lock().last().map(|(_, user, _)| user.clone())
    }

    pub fn last_params(&self) -> Option<GenerationParams> {
        self.prompts.lock().last().map(|(_, _, p)| p.clone())
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, CollaboratorError> {
        self.prompts
            .lock()
            .push((system_prompt.to_string(), user_prompt.to_string(), params.clone()));
        let next = self.script.lock().pop_front();
        next.unwrap_or_else(|| Ok(self.default_answer.clone()))
    }
}

/// Retriever returning the same chunks for every query.
pub struct StaticRetriever {
    chunks: Vec<RetrievedChunk>,
    calls: AtomicUsize,
}

impl StaticRetriever {
    pub fn new(chunks: Vec<RetrievedChunk>) -> Self {
        Self {
            chunks,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn search(
        &self,
        _query: &str,
        _corpus: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.chunks.iter().take(top_k).cloned().collect())
    }
}

/// Retriever whose index is always offline.
pub struct DownRetriever {
    calls: AtomicUsize,
}

impl DownRetriever {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Retriever for DownRetriever {
    async fn search(
        &self,
        _query: &str,
        _corpus: &str,
        _top_k: usize,
    ) -> Result<Vec<RetrievedChunk>, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Unavailable("index offline".into()))
    }
}

/// Deep evaluator returning fixed scores, or failing.
pub struct StaticDeepEvaluator {
    pub result: Result<BTreeMap<String, f64>, CollaboratorError>,
}

#[async_trait]
impl DeepEvaluator for StaticDeepEvaluator {
    async fn evaluate(&self, _run: &Run) -> Result<BTreeMap<String, f64>, CollaboratorError> {
        self.result.clone()
    }
}

pub fn sample_chunks() -> Vec<RetrievedChunk> {
    vec![
        RetrievedChunk::new("crm", "q3-1", "Enterprise pipeline grew 12% quarter over quarter.")
            .with_similarity(1.0),
        RetrievedChunk::new("crm", "q3-2", "SMB churn rose to 4%.").with_similarity(0.5),
    ]
}

pub const SAMPLE_ANSWER: &str = "Forecast is up 12%.\n\
- Assumption: enterprise deals close on schedule\n\
- Risk: SMB churn\n\
```json\n{\"forecast_adjustment\": \"+12%\", \"risk_factor\": \"SMB churn\"}\n```";
