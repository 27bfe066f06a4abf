//! PII/PCI detection patterns for the policy pre-filter.
//!
//! The patterns are deliberately naive: the credit-card rule is a plain digit
//! run with optional separators and no Luhn check, so long numeric ids will
//! match. Scores downstream are defined against this behavior.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    /// Email address (simplified)
    pub static ref EMAIL_PATTERN: Regex = Regex::new(
        r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}"
    ).unwrap();

    /// 10-digit phone number with optional `-` or `.` separators
    pub static ref PHONE_PATTERN: Regex = Regex::new(
        r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b"
    ).unwrap();

    /// Social Security Number, dashed form only
    pub static ref SSN_PATTERN: Regex = Regex::new(
        r"\b\d{3}-\d{2}-\d{4}\b"
    ).unwrap();

    /// 13 to 16 digits with optional space/dash separators
    pub static ref CREDIT_CARD_PATTERN: Regex = Regex::new(
        r"\b(?:\d[ -]*?){13,16}\b"
    ).unwrap();
}

/// A PII/PCI pattern category, in scan order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiiCategory {
    Email,
    Phone,
    Ssn,
    CreditCard,
}

impl PiiCategory {
    pub const ALL: [PiiCategory; 4] = [
        PiiCategory::Email,
        PiiCategory::Phone,
        PiiCategory::Ssn,
        PiiCategory::CreditCard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Phone => "PHONE",
            Self::Ssn => "SSN",
            Self::CreditCard => "CREDIT_CARD",
        }
    }

    pub fn pattern(self) -> &'static Regex {
        match self {
            Self::Email => &EMAIL_PATTERN,
            Self::Phone => &PHONE_PATTERN,
            Self::Ssn => &SSN_PATTERN,
            Self::CreditCard => &CREDIT_CARD_PATTERN,
        }
    }
}

impl fmt::Display for PiiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First match of a category within the scanned text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatternHit {
    pub category: PiiCategory,
    pub start: usize,
    pub end: usize,
}

/// Scan text against every category, returning the first hit of each that matched.
pub fn scan(text: &str) -> Vec<PatternHit> {
    PiiCategory::ALL
        .into_iter()
        .filter_map(|category| {
            category.pattern().find(text).map(|m| PatternHit {
                category,
                start: m.start(),
                end: m.end(),
            })
        })
        .collect()
}

pub fn contains_pii(text: &str) -> bool {
    PiiCategory::ALL
        .into_iter()
        .any(|c| c.pattern().is_match(text))
}
