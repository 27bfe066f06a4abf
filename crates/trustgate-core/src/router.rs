//! Score to routing class.

use serde::{Deserialize, Serialize};
use std::fmt;

pub const STP_MIN: u8 = 80;
pub const ASSIST_MIN: u8 = 60;
pub const ESCALATE_MIN: u8 = 10;

/// How an answer should be handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Routing {
    /// Straight-through processing, no human involved
    Stp,
    Assist,
    Escalate,
    Block,
}

impl Routing {
    /// Map a 0-100 score onto its band. Scores above 100 route as stp.
    pub fn route(score: u8) -> Self {
        match score {
            s if s >= STP_MIN => Self::Stp,
            s if s >= ASSIST_MIN => Self::Assist,
            s if s >= ESCALATE_MIN => Self::Escalate,
            _ => Self::Block,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stp => "stp",
            Self::Assist => "assist",
            Self::Escalate => "escalate",
            Self::Block => "block",
        }
    }

    /// Only stp proceeds without a human.
    pub fn is_automatic(self) -> bool {
        matches!(self, Self::Stp)
    }
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_band_boundaries() {
        let table = [
            (100, Routing::Stp),
            (80, Routing::Stp),
            (79, Routing::Assist),
            (60, Routing::Assist),
            (59, Routing::Escalate),
            (10, Routing::Escalate),
            (9, Routing::Block),
            (0, Routing::Block),
        ];
        for (score, expected) in table {
            assert_eq!(Routing::route(score), expected, "score {}", score);
        }
    }

    #[test]
    fn test_serialized_names() {
        assert_eq!(serde_json::to_string(&Routing::Stp).unwrap(), "\"stp\"");
        assert!(Routing::Stp.is_automatic());
        assert!(!Routing::Assist.is_automatic());
    }

    proptest! {
        #[test]
        fn routing_is_monotone(a in 0u8..=100, b in 0u8..=100) {
            let rank = |r: Routing| match r {
                Routing::Block => 0,
                Routing::Escalate => 1,
                Routing::Assist => 2,
                Routing::Stp => 3,
            };
            if a <= b {
                prop_assert!(rank(Routing::route(a)) <= rank(Routing::route(b)));
            }
        }
    }
}
