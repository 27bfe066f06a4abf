//! Policy validation pipeline for prompts and generated answers.
//!
//! A pipeline runs its validators in order over progressively fixed text.
//! Each policy has a mode: an `active` hit fails the verdict, a `monitor`
//! hit is only counted. Violation counters live in a [`GuardMetrics`] the
//! caller owns and shares.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use trustgate_core::signals::patterns::{EMAIL_PATTERN, PHONE_PATTERN};

pub const REDACTION_MARKER: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Pii,
    Toxicity,
    Competitors,
}

impl PolicyKind {
    pub const ALL: [PolicyKind; 3] = [PolicyKind::Pii, PolicyKind::Toxicity, PolicyKind::Competitors];

    pub fn id(self) -> &'static str {
        match self {
            Self::Pii => "pii",
            Self::Toxicity => "toxicity",
            Self::Competitors => "competitors",
        }
    }

    fn default_mode(self) -> PolicyMode {
        match self {
            Self::Competitors => PolicyMode::Monitor,
            _ => PolicyMode::Active,
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyMode {
    Active,
    Monitor,
}

/// Guard settings, part of the runtime config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub competitors: Vec<String>,
    pub toxic_blocklist: Vec<String>,
    /// Per-policy mode keyed by policy id
    pub modes: BTreeMap<String, PolicyMode>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            competitors: vec!["CompetitorX".to_string(), "BadCo".to_string()],
            toxic_blocklist: ["hate", "kill", "shut up", "idiot", "stupid"]
                .into_iter()
                .map(String::from)
                .collect(),
            modes: BTreeMap::new(),
        }
    }
}

impl GuardConfig {
    pub fn mode_for(&self, policy: &str) -> PolicyMode {
        if let Some(mode) = self.modes.get(policy) {
            return *mode;
        }
        PolicyKind::ALL
            .into_iter()
            .find(|k| k.id() == policy)
            .map(PolicyKind::default_mode)
            .unwrap_or(PolicyMode::Active)
    }

    fn mode(&self, kind: PolicyKind) -> PolicyMode {
        self.mode_for(kind.id())
    }
}

/// One validator hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorFailure {
    pub message: String,
    /// Replacement text, when the validator can repair the input
    pub fix: Option<String>,
}

pub trait Validator: Send + Sync {
    fn policy(&self) -> PolicyKind;

    fn validate(&self, text: &str) -> Option<ValidatorFailure>;
}

/// Redacts email addresses and phone numbers.
#[derive(Debug, Default)]
pub struct PiiValidator;

impl Validator for PiiValidator {
    fn policy(&self) -> PolicyKind {
        PolicyKind::Pii
    }

    fn validate(&self, text: &str) -> Option<ValidatorFailure> {
        let mut found = Vec::new();
        if EMAIL_PATTERN.is_match(text) {
            found.push("EMAIL");
        }
        if PHONE_PATTERN.is_match(text) {
            found.push("PHONE");
        }
        if found.is_empty() {
            return None;
        }
        let redacted = EMAIL_PATTERN.replace_all(text, REDACTION_MARKER);
        let redacted = PHONE_PATTERN.replace_all(&redacted, REDACTION_MARKER);
        Some(ValidatorFailure {
            message: format!("Found PII: {}", found.join(", ")),
            fix: Some(redacted.into_owned()),
        })
    }
}

/// Masks blocklisted words with `*`, case-insensitively.
#[derive(Debug)]
pub struct ToxicityValidator {
    blocklist: Vec<String>,
}

impl ToxicityValidator {
    pub fn new(blocklist: Vec<String>) -> Self {
        Self {
            blocklist: blocklist
                .into_iter()
                .map(|w| w.to_ascii_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }
}

fn mask_ascii_case_insensitive(text: &str, word: &str) -> String {
    // ASCII lowercase keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();
    let mask = "*".repeat(word.chars().count());
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (at, _) in lower.match_indices(word) {
        out.push_str(&text[cursor..at]);
        out.push_str(&mask);
        cursor = at + word.len();
    }
    out.push_str(&text[cursor..]);
    out
}

impl Validator for ToxicityValidator {
    fn policy(&self) -> PolicyKind {
        PolicyKind::Toxicity
    }

    fn validate(&self, text: &str) -> Option<ValidatorFailure> {
        let lower = text.to_ascii_lowercase();
        let word = self.blocklist.iter().find(|w| lower.contains(w.as_str()))?;
        let fixed = self
            .blocklist
            .iter()
            .fold(text.to_string(), |acc, w| mask_ascii_case_insensitive(&acc, w));
        Some(ValidatorFailure {
            message: format!("Found toxic language: {}", word),
            fix: Some(fixed),
        })
    }
}

/// Reports competitor mentions. Never rewrites text.
#[derive(Debug)]
pub struct CompetitorValidator {
    competitors: Vec<String>,
}

impl CompetitorValidator {
    pub fn new(competitors: Vec<String>) -> Self {
        Self { competitors }
    }
}

impl Validator for CompetitorValidator {
    fn policy(&self) -> PolicyKind {
        PolicyKind::Competitors
    }

    fn validate(&self, text: &str) -> Option<ValidatorFailure> {
        let lower = text.to_lowercase();
        let found: Vec<&str> = self
            .competitors
            .iter()
            .filter(|c| !c.is_empty() && lower.contains(&c.to_lowercase()))
            .map(String::as_str)
            .collect();
        if found.is_empty() {
            return None;
        }
        Some(ValidatorFailure {
            message: format!("Found competitors: {}", found.join(", ")),
            fix: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    Passed,
    /// An active policy failed
    Enforced,
    /// Only monitored policies failed
    MonitorOnly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardVerdict {
    pub passed: bool,
    /// Ids of the policies that were hit
    pub failures: Vec<String>,
    /// Input text with every available fix applied
    pub validated_text: String,
    pub message: Option<String>,
    pub disposition: Disposition,
}

impl GuardVerdict {
    pub fn is_hard_failure(&self) -> bool {
        self.disposition == Disposition::Enforced
    }
}

/// Per-policy violation counters, shared by whoever owns the guard.
#[derive(Debug, Default)]
pub struct GuardMetrics {
    violations: Mutex<BTreeMap<PolicyKind, u64>>,
}

impl GuardMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, kind: PolicyKind) {
        *self.violations.lock().entry(kind).or_insert(0) += 1;
    }

    pub fn violations(&self, kind: PolicyKind) -> u64 {
        self.violations.lock().get(&kind).copied().unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<PolicyKind, u64> {
        self.violations.lock().clone()
    }
}

/// Policy status row for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub id: String,
    pub name: String,
    pub description: String,
    pub status: PolicyMode,
    pub violations: u64,
}

/// An explicitly constructed validation pipeline.
pub struct PolicyPipeline {
    validators: Vec<Box<dyn Validator>>,
    config: GuardConfig,
    metrics: Arc<GuardMetrics>,
}

impl PolicyPipeline {
    pub fn new(
        validators: Vec<Box<dyn Validator>>,
        config: GuardConfig,
        metrics: Arc<GuardMetrics>,
    ) -> Self {
        Self {
            validators,
            config,
            metrics,
        }
    }

    pub fn validate(&self, text: &str) -> GuardVerdict {
        let mut current = text.to_string();
        let mut failures = Vec::new();
        let mut messages = Vec::new();
        let mut enforced = false;

        for validator in &self.validators {
            let kind = validator.policy();
            let Some(failure) = validator.validate(&current) else {
                continue;
            };
            self.metrics.record(kind);
            if self.config.mode(kind) == PolicyMode::Active {
                enforced = true;
            }
            tracing::debug!(policy = %kind, "policy validator hit");
            failures.push(kind.id().to_string());
            messages.push(format!("{}: {}", kind, failure.message));
            if let Some(fixed) = failure.fix {
                current = fixed;
            }
        }

        let disposition = match (failures.is_empty(), enforced) {
            (true, _) => Disposition::Passed,
            (false, true) => Disposition::Enforced,
            (false, false) => Disposition::MonitorOnly,
        };

        GuardVerdict {
            passed: disposition != Disposition::Enforced,
            failures,
            validated_text: current,
            message: (!messages.is_empty()).then(|| messages.join("; ")),
            disposition,
        }
    }
}

/// Input and output validation.
pub trait PolicyGuard: Send + Sync {
    fn validate_input(&self, text: &str) -> GuardVerdict;

    fn validate_output(&self, text: &str) -> GuardVerdict;
}

/// The standard guard: every validator on input, toxicity only on output.
pub struct StandardGuard {
    input: PolicyPipeline,
    output: PolicyPipeline,
    config: GuardConfig,
    metrics: Arc<GuardMetrics>,
}

impl StandardGuard {
    pub fn new(config: GuardConfig, metrics: Arc<GuardMetrics>) -> Self {
        let input = PolicyPipeline::new(
            vec![
                Box::new(PiiValidator),
                Box::new(ToxicityValidator::new(config.toxic_blocklist.clone())),
                Box::new(CompetitorValidator::new(config.competitors.clone())),
            ],
            config.clone(),
            metrics.clone(),
        );
        let output = PolicyPipeline::new(
            vec![Box::new(ToxicityValidator::new(config.toxic_blocklist.clone()))],
            config.clone(),
            metrics.clone(),
        );
        Self {
            input,
            output,
            config,
            metrics,
        }
    }

    pub fn policies(&self) -> Vec<PolicyStatus> {
        let row = |kind: PolicyKind, name: &str, description: &str| PolicyStatus {
            id: kind.id().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            status: self.config.mode(kind),
            violations: self.metrics.violations(kind),
        };
        vec![
            row(PolicyKind::Pii, "PII Redaction", "Detects emails and phone numbers"),
            row(PolicyKind::Toxicity, "Toxicity Filter", "Blocks toxic language"),
            row(PolicyKind::Competitors, "Competitor Check", "Monitors competitor mentions"),
        ]
    }
}

impl PolicyGuard for StandardGuard {
    fn validate_input(&self, text: &str) -> GuardVerdict {
        self.input.validate(text)
    }

    fn validate_output(&self, text: &str) -> GuardVerdict {
        self.output.validate(text)
    }
}
