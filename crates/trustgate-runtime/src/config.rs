//! Runtime configuration.
//!
//! Loaded from YAML, with a small set of environment overrides. Durations
//! are humantime strings ("500ms", "2s").

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::guard::{GuardConfig, PolicyMode};
use crate::resilience::RetryPolicy;

pub const ENV_ALERT_LATENCY_THRESHOLD_MS: &str = "TRUSTGATE_ALERT_LATENCY_THRESHOLD_MS";
pub const ENV_DEEP_EVAL_SAMPLE_RATE: &str = "TRUSTGATE_DEEP_EVAL_SAMPLE_RATE";
pub const ENV_JUDGE_MAX_ATTEMPTS: &str = "TRUSTGATE_JUDGE_MAX_ATTEMPTS";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub(crate) mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use serde::{Deserialize, Deserializer, Serializer};
        use std::time::Duration;

        pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match duration {
                Some(d) => serializer.serialize_str(&humantime::format_duration(*d).to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|s| humantime::parse_duration(&s).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Judge invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub max_attempts: u32,

    #[serde(with = "humantime_duration")]
    pub backoff: Duration,

    /// Per-attempt timeout. `None` leaves the call unbounded.
    #[serde(with = "humantime_duration::option")]
    pub call_timeout: Option<Duration>,

    /// Chars of formatted context sent to the groundedness judge
    pub context_char_budget: usize,

    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    /// 0 disables the judge cache
    pub cache_entries: u64,

    #[serde(with = "humantime_duration")]
    pub cache_ttl: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            call_timeout: Some(Duration::from_secs(30)),
            context_char_budget: 12_000,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.0,
            max_tokens: 600,
            cache_entries: 1_000,
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl JudgeConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff).with_call_timeout(self.call_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub max_attempts: u32,

    #[serde(with = "humantime_duration")]
    pub backoff: Duration,

    #[serde(with = "humantime_duration::option")]
    pub call_timeout: Option<Duration>,

    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            call_timeout: Some(Duration::from_secs(60)),
            temperature: 0.2,
            max_tokens: 800,
        }
    }
}

impl GeneratorConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.backoff).with_call_timeout(self.call_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub latency_threshold_ms: u64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            latency_threshold_ms: trustgate_core::alerts::DEFAULT_LATENCY_THRESHOLD_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeepEvalConfig {
    /// Fraction of completed runs sent to the deep evaluator, in [0, 1]
    pub sample_rate: f64,
}

impl Default for DeepEvalConfig {
    fn default() -> Self {
        Self { sample_rate: 0.05 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub system_prompt: String,
    pub default_top_k: usize,
    pub question_param_max_chars: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are a careful analyst. Answer from the provided context, state your \
                            assumptions and risks, and include a ```json block with the structured result."
                .to_string(),
            default_top_k: 5,
            question_param_max_chars: 450,
        }
    }
}

/// Top-level runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub judge: JudgeConfig,
    pub generator: GeneratorConfig,
    pub alerts: AlertsConfig,
    pub deep_eval: DeepEvalConfig,
    pub replay: ReplayConfig,
    pub guard: GuardConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validated()
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply `TRUSTGATE_*` environment overrides.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup. Used by `with_env_overrides`.
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_ALERT_LATENCY_THRESHOLD_MS) {
            self.alerts.latency_threshold_ms = parse_env(ENV_ALERT_LATENCY_THRESHOLD_MS, &v)?;
        }
        if let Some(v) = lookup(ENV_DEEP_EVAL_SAMPLE_RATE) {
            self.deep_eval.sample_rate = parse_env(ENV_DEEP_EVAL_SAMPLE_RATE, &v)?;
        }
        if let Some(v) = lookup(ENV_JUDGE_MAX_ATTEMPTS) {
            self.judge.max_attempts = parse_env(ENV_JUDGE_MAX_ATTEMPTS, &v)?;
        }
        self.validated()
    }

    fn validated(mut self) -> Result<Self, ConfigError> {
        if self.judge.max_attempts == 0 {
            return Err(ConfigError::Invalid("judge.max_attempts must be at least 1".into()));
        }
        if self.generator.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "generator.max_attempts must be at least 1".into(),
            ));
        }
        if !self.deep_eval.sample_rate.is_finite() {
            return Err(ConfigError::Invalid("deep_eval.sample_rate must be finite".into()));
        }
        self.deep_eval.sample_rate = self.deep_eval.sample_rate.clamp(0.0, 1.0);
        Ok(self)
    }

    pub fn policy_mode(&self, policy: &str) -> PolicyMode {
        self.guard.mode_for(policy)
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.judge.max_attempts, 3);
        assert_eq!(config.judge.backoff, Duration::from_millis(500));
        assert_eq!(config.judge.context_char_budget, 12_000);
        assert_eq!(config.alerts.latency_threshold_ms, 5000);
        assert_eq!(config.deep_eval.sample_rate, 0.05);
        assert_eq!(config.replay.question_param_max_chars, 450);
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
judge:
  max_attempts: 5
  backoff: 250ms
  call_timeout: 2s
alerts:
  latency_threshold_ms: 8000
guard:
  competitors: ["Acme"]
  modes:
    competitors: active
"#;
        let config = RuntimeConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.judge.max_attempts, 5);
        assert_eq!(config.judge.backoff, Duration::from_millis(250));
        assert_eq!(config.judge.call_timeout, Some(Duration::from_secs(2)));
        // Untouched fields keep defaults
        assert_eq!(config.judge.max_tokens, 600);
        assert_eq!(config.alerts.latency_threshold_ms, 8000);
        assert_eq!(config.guard.competitors, vec!["Acme".to_string()]);
        assert_eq!(config.policy_mode("competitors"), PolicyMode::Active);
    }

    #[test]
    fn test_invalid_duration() {
        let err = RuntimeConfig::from_yaml("judge:\n  backoff: soon\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_ALERT_LATENCY_THRESHOLD_MS, "1200"),
            (ENV_DEEP_EVAL_SAMPLE_RATE, "3.5"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::default()
            .with_overrides_from(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.alerts.latency_threshold_ms, 1200);
        // Clamped into [0, 1]
        assert_eq!(config.deep_eval.sample_rate, 1.0);
    }

    #[test]
    fn test_bad_env_value() {
        let err = RuntimeConfig::default()
            .with_overrides_from(|k| (k == ENV_JUDGE_MAX_ATTEMPTS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let err = RuntimeConfig::from_yaml("judge:\n  max_attempts: 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
