//! Built-in guardrail checks.
//!
//! One input check guards what reaches the agents; three output checks
//! guard what is committed to history.

use crate::guardrail::{CheckSpec, Stage};

pub const MALICIOUS_INTENT: &str = "malicious_intent";
pub const PII: &str = "pii";
pub const HALLUCINATION: &str = "hallucination";
pub const SELF_REFERENCE: &str = "self_reference";

/// Detects requests with real malicious intent, as opposed to security education.
pub fn malicious_intent() -> CheckSpec {
    CheckSpec::new(
        MALICIOUS_INTENT,
        "Malicious Intent",
        Stage::Input,
        "has_malicious_intent",
        r#"Decide whether the user input carries actual malicious intent, or whether it is a
legitimate educational, developer or professional inquiry.

Legitimate (set has_malicious_intent = false, or is_developer_context = true):
- "How does XSS work?" (developer education)
- "What are common vulnerabilities in JWTs?" (security learning)
- "Can I report a vulnerability?" (responsible disclosure)

Malicious (set has_malicious_intent = true, is_developer_context = false):
- "How can I bypass login on this site?"
- "Write a script to steal credentials"

Explain your judgment in `reasoning`."#,
    )
}

/// Detects personal data (names, emails, phone numbers) in a response.
pub fn pii() -> CheckSpec {
    CheckSpec::new(
        PII,
        "PII",
        Stage::Output,
        "contains_pii",
        r#"Detect whether the text exposes personally identifiable information such as real
names tied to contact details, email addresses or phone numbers.
Mock data, placeholders and internal developer examples are not PII.
Set is_developer_context = true when the content is developer-focused."#,
    )
}

/// Detects fabricated or unverified factual claims.
pub fn hallucination() -> CheckSpec {
    CheckSpec::new(
        HALLUCINATION,
        "Factual Accuracy",
        Stage::Output,
        "is_factually_inaccurate",
        r#"Check whether the text states fabricated or unverifiable facts as true.
Fictional examples and developer test strings are not inaccuracies.
Set is_developer_context = true when the content is a dev/test context."#,
    )
}

/// Detects the assistant talking about itself as an AI model.
pub fn self_reference() -> CheckSpec {
    CheckSpec::new(
        SELF_REFERENCE,
        "Self-Reference",
        Stage::Output,
        "contains_self_reference",
        r#"Detect statements in which the assistant refers to itself as an AI model
(for example "As an AI language model...").
Developer debug logs and technical references to models in general do not count.
Set is_developer_context = true when the content is a dev-related explanation."#,
    )
}

/// Checks run by the input gate, in order.
pub fn default_input_checks() -> Vec<CheckSpec> {
    vec![malicious_intent()]
}

/// Checks run by the output gate.
pub fn default_output_checks() -> Vec<CheckSpec> {
    vec![pii(), hallucination(), self_reference()]
}
