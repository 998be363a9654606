//! Shared data model for a StudyBuddy conversation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A check that tripped, with the classifier's explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailViolation {
    /// Name of the guardrail check (e.g. "pii")
    pub check: String,

    /// Free-text rationale from the classifier
    pub rationale: String,

    /// The check could not be evaluated and tripped under the failure
    /// policy; nothing was actually detected
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unavailable: bool,
}

impl GuardrailViolation {
    pub fn new(check: impl Into<String>, rationale: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            rationale: rationale.into(),
            unavailable: false,
        }
    }
}

/// Metadata that marks a turn as something other than a compliant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnFlag {
    /// The input gate blocked the user turn; this turn is the refusal.
    Refusal { violation: GuardrailViolation },

    /// The output gate judged the assistant response non-compliant.
    NonCompliant { violations: Vec<GuardrailViolation> },
}

/// One role-tagged message in conversation history.
///
/// Turns are immutable once appended to a [`Session`](crate::Session).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag: Option<TurnFlag>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            flag: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            flag: None,
        }
    }

    /// A system refusal recorded in place of an assistant answer.
    pub fn refusal(content: impl Into<String>, violation: GuardrailViolation) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            flag: Some(TurnFlag::Refusal { violation }),
        }
    }

    /// An assistant answer that failed one or more output checks.
    pub fn flagged(content: impl Into<String>, violations: Vec<GuardrailViolation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            flag: Some(TurnFlag::NonCompliant { violations }),
        }
    }

    /// True when no guardrail outcome is attached to this turn.
    pub fn is_compliant(&self) -> bool {
        self.flag.is_none()
    }

    pub fn is_refusal(&self) -> bool {
        matches!(self.flag, Some(TurnFlag::Refusal { .. }))
    }
}

/// Opaque identifier of a chat session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An uploaded file. Lives only for the turn that carries it.
#[derive(Clone, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lowercased extension without the leading dot; empty when absent.
    pub fn extension(&self) -> String {
        Path::new(&self.name)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default()
    }
}

impl fmt::Debug for Attachment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachment")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Inbound chat event handed over by the front end.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub session_key: SessionKey,
    pub text: String,
    pub attachment: Option<Attachment>,
}

impl InboundMessage {
    pub fn text(session_key: impl Into<SessionKey>, text: impl Into<String>) -> Self {
        Self {
            session_key: session_key.into(),
            text: text.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Static record about whoever operates this assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeveloperInfo {
    pub name: String,
    pub mail: String,
    pub github: String,
}

/// Explicit per-turn context threaded through every pipeline stage.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_key: SessionKey,

    /// Developer record bound to the `developer_info` tool
    pub developer: Option<DeveloperInfo>,

    /// Zero-based index of the turn being processed
    pub turn_index: u64,
}

impl SessionContext {
    pub fn new(session_key: SessionKey, developer: Option<DeveloperInfo>) -> Self {
        Self {
            session_key,
            developer,
            turn_index: 0,
        }
    }

    pub fn for_turn(&self, turn_index: u64) -> Self {
        Self {
            turn_index,
            ..self.clone()
        }
    }
}

/// Outcome of one guardrail check on one payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailVerdict {
    /// Check that produced this verdict
    pub check: String,

    /// Primary detection flag as reported by the classifier
    pub flagged: bool,

    /// Whether the payload falls into an exempt (developer/educational) context
    pub exempt: bool,

    /// `flagged && !exempt`
    pub tripped: bool,

    /// Classifier reasoning
    pub rationale: String,

    /// Every structured field the classifier returned
    pub fields: serde_json::Map<String, serde_json::Value>,

    /// Raw classifier output, before parsing
    pub raw: String,

    /// Set when the classifier could not be evaluated and the failure
    /// policy decided the outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
}

impl GuardrailVerdict {
    /// A verdict standing in for a check that could not be evaluated.
    pub fn unavailable(check: impl Into<String>, reason: impl Into<String>, tripped: bool) -> Self {
        let reason = reason.into();
        Self {
            check: check.into(),
            flagged: tripped,
            exempt: false,
            tripped,
            rationale: format!("Guardrail unavailable: {}", reason),
            fields: serde_json::Map::new(),
            raw: String::new(),
            failure: Some(reason),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub fn violation(&self) -> GuardrailViolation {
        GuardrailViolation {
            check: self.check.clone(),
            rationale: self.rationale.clone(),
            unavailable: self.is_failure(),
        }
    }
}

/// Result of running a safety gate.
#[derive(Debug, Clone, PartialEq)]
pub enum GateResult {
    /// No check tripped.
    Allowed { verdicts: Vec<GuardrailVerdict> },

    /// Input gate: a check tripped and the turn must not reach an agent.
    Blocked {
        violation: GuardrailViolation,
        verdicts: Vec<GuardrailVerdict>,
    },

    /// Output gate: one or more checks tripped on the final response.
    Flagged {
        violations: Vec<GuardrailViolation>,
        verdicts: Vec<GuardrailVerdict>,
    },
}

impl GateResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GateResult::Allowed { .. })
    }

    pub fn verdicts(&self) -> &[GuardrailVerdict] {
        match self {
            GateResult::Allowed { verdicts }
            | GateResult::Blocked { verdicts, .. }
            | GateResult::Flagged { verdicts, .. } => verdicts,
        }
    }
}

/// Where a turn is in the routing state machine.
///
/// `Idle -> Routing -> {DirectAnswer | ToolInvocation | Delegated} -> Streaming -> Completed`,
/// with `Aborted` reachable from any non-terminal phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Routing,
    DirectAnswer,
    ToolInvocation { tool: String },
    Delegated { agent: String },
    Streaming,
    Completed,
    Aborted,
}

impl TurnPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TurnPhase::Completed | TurnPhase::Aborted)
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: &TurnPhase) -> bool {
        use TurnPhase::*;

        if matches!(next, Aborted) {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Idle, Routing)
                | (Routing, DirectAnswer)
                | (Routing, ToolInvocation { .. })
                | (Routing, Delegated { .. })
                | (DirectAnswer, Streaming)
                | (ToolInvocation { .. }, Streaming)
                | (Delegated { .. }, Streaming)
                | (Streaming, Completed)
        )
    }
}

impl fmt::Display for TurnPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnPhase::Idle => write!(f, "idle"),
            TurnPhase::Routing => write!(f, "routing"),
            TurnPhase::DirectAnswer => write!(f, "direct_answer"),
            TurnPhase::ToolInvocation { tool } => write!(f, "tool_invocation({})", tool),
            TurnPhase::Delegated { agent } => write!(f, "delegated({})", agent),
            TurnPhase::Streaming => write!(f, "streaming"),
            TurnPhase::Completed => write!(f, "completed"),
            TurnPhase::Aborted => write!(f, "aborted"),
        }
    }
}
