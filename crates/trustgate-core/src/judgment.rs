//! Typed judge payloads.
//!
//! Judge responses are free text expected to contain one JSON object. The
//! first greedy `{...}` span is extracted and decoded into a typed judgment,
//! so callers see `ParsedJudgment<T>` or a `JudgeError` and never a panic.

use lazy_static::lazy_static;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

lazy_static! {
    /// First `{` through last `}`, across lines
    static ref JSON_OBJECT_SPAN: Regex = Regex::new(r"(?s)\{.*\}").unwrap();
}

/// Failure to obtain a judgment.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum JudgeError {
    #[error("judge returned a malformed response: {reason}")]
    MalformedResponse { reason: String },

    #[error("judge transport failed after {attempts} attempts: {last_error}")]
    TransportExhausted { attempts: u32, last_error: String },
}

impl JudgeError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedResponse { .. } => "malformed_response",
            Self::TransportExhausted { .. } => "transport_exhausted",
        }
    }
}

/// Extract the JSON object embedded in a judge response.
pub fn extract_json(text: &str) -> Result<serde_json::Value, JudgeError> {
    let span = JSON_OBJECT_SPAN
        .find(text)
        .ok_or_else(|| JudgeError::malformed("no JSON object found in judge output"))?;

    let value: serde_json::Value = serde_json::from_str(span.as_str())
        .map_err(|e| JudgeError::malformed(format!("invalid JSON: {}", e)))?;

    if !value.is_object() {
        return Err(JudgeError::malformed("judge JSON is not an object"));
    }
    Ok(value)
}

/// Clamp to [0, 1]. NaN maps to 0.
pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn null_as_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

fn default_true() -> bool {
    true
}

/// Groundedness judge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundednessJudgment {
    #[serde(default, deserialize_with = "null_as_default")]
    pub score: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub unsupported_claims: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub missing_citations: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rationale: String,
}

impl GroundednessJudgment {
    pub fn groundedness(&self) -> f64 {
        clamp01(self.score)
    }
}

/// Policy judge payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyJudgment {
    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub pass: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub violations: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub rationale: String,
}

/// A decoded judgment with the raw JSON kept for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedJudgment<T> {
    pub judgment: T,
    pub raw: serde_json::Value,
}

impl<T: DeserializeOwned> ParsedJudgment<T> {
    pub fn parse(text: &str) -> Result<Self, JudgeError> {
        let raw = extract_json(text)?;
        let judgment = serde_json::from_value(raw.clone())
            .map_err(|e| JudgeError::malformed(format!("unexpected judge payload: {}", e)))?;
        Ok(Self { judgment, raw })
    }
}
