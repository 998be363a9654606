//! What a gate does when a guardrail cannot be evaluated.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Deployment-wide answer to "the classifier is down, now what?".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Treat the failed check as tripped: input is refused, output is flagged
    #[default]
    FailClosed,

    /// Treat the failed check as passed and let the payload through
    FailOpen,
}

impl FailurePolicy {
    /// Whether a failed evaluation counts as a trip.
    pub fn trips_on_failure(&self) -> bool {
        matches!(self, FailurePolicy::FailClosed)
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailurePolicy::FailClosed => write!(f, "closed"),
            FailurePolicy::FailOpen => write!(f, "open"),
        }
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "closed" | "fail_closed" => Ok(FailurePolicy::FailClosed),
            "open" | "fail_open" => Ok(FailurePolicy::FailOpen),
            other => Err(format!("expected 'closed' or 'open', got '{}'", other)),
        }
    }
}
