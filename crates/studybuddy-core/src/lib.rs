//! # studybuddy-core
//!
//! Deterministic building blocks of the StudyBuddy pipeline.
//!
//! Everything in this crate is pure: no network, no async, no clock.
//! The runtime crate drives these pieces against a language-model backend.
//!
//! ## Key Guarantees
//!
//! 1. **Trip rule**: a guardrail only trips when `flag && !exempt`
//! 2. **Short-circuit input**: the first tripped input check blocks the turn
//! 3. **OR output**: any tripped output check flags the response
//! 4. **Whitelisted routing**: a route decision names a known tool or specialist, or it is rejected
//! 5. **Append-only history**: turns are never edited or removed
//!
//! ## Example
//!
//! ```rust,ignore
//! use studybuddy_core::{checks, extract_text, Roster};
//!
//! let notes = extract_text(&bytes, "pdf")?;
//! let verdict = checks::malicious_intent().parse_verdict(&classifier_output)?;
//! let route = Roster::default().parse_route(&router_output)?;
//! ```

pub mod checks;
pub mod extract;
pub mod gate;
pub mod guardrail;
pub mod roster;
pub mod session;
pub mod tools;
pub mod types;

pub use extract::{extract_attachment, extract_text, DocumentKind, ExtractError};
pub use gate::{InputPolicy, OutputPolicy};
pub use guardrail::{trips, CheckSpec, Stage, VerdictError};
pub use roster::{AgentSpec, RawRoute, RouteDecision, Roster, RosterError, RosterFile};
pub use session::{Session, SessionError};
pub use tools::{DeveloperInfoTool, Tool, ToolBox, ToolError};
pub use types::{
    Attachment, DeveloperInfo, GateResult, GuardrailVerdict, GuardrailViolation, InboundMessage,
    Role, SessionContext, SessionKey, Turn, TurnFlag, TurnPhase,
};

/// Fold extracted attachment text into the user message.
pub fn fold_attachment(text: &str, extracted: Option<&str>) -> String {
    match extracted {
        Some(content) => format!("{}\n\n[File Content]:\n{}", text, content),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_attachment() {
        assert_eq!(fold_attachment("Summarize", None), "Summarize");
        assert_eq!(
            fold_attachment("Summarize", Some("Cells divide.")),
            "Summarize\n\n[File Content]:\nCells divide."
        );
    }
}
