//! Gate policy: reduces per-check verdicts into a [`GateResult`].
//!
//! The rules are fixed:
//! 1. Input gate: the FIRST tripped verdict (in check order) blocks the turn.
//! 2. Output gate: ANY tripped verdict flags the response; every tripped
//!    check is reported.
//! 3. Otherwise the payload is allowed.

use crate::types::{GateResult, GuardrailVerdict};

/// Policy for the input side.
pub struct InputPolicy;

impl InputPolicy {
    /// True once `verdict` means no further input checks need to run.
    pub fn short_circuits(verdict: &GuardrailVerdict) -> bool {
        verdict.tripped
    }

    /// Reduce verdicts (in check order) to a gate result.
    pub fn reduce(verdicts: Vec<GuardrailVerdict>) -> GateResult {
        match verdicts.iter().find(|v| v.tripped) {
            Some(tripped) => GateResult::Blocked {
                violation: tripped.violation(),
                verdicts,
            },
            None => GateResult::Allowed { verdicts },
        }
    }
}

/// Policy for the output side.
pub struct OutputPolicy;

impl OutputPolicy {
    pub fn reduce(verdicts: Vec<GuardrailVerdict>) -> GateResult {
        let violations: Vec<_> = verdicts
            .iter()
            .filter(|v| v.tripped)
            .map(GuardrailVerdict::violation)
            .collect();

        if violations.is_empty() {
            GateResult::Allowed { verdicts }
        } else {
            GateResult::Flagged {
                violations,
                verdicts,
            }
        }
    }
}
