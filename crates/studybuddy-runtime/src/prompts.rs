//! Prompt assembly for guardrail classifiers, the router and the agents.
//!
//! Every builder returns a complete `Vec<ChatMessage>`. The conversation
//! history is always replayed in full; no component keeps state between
//! turns.

use studybuddy_core::{AgentSpec, CheckSpec, Roster, Turn};

use crate::providers::ChatMessage;

/// Base system prompt shared by every guardrail classifier.
pub const GUARDRAIL_BASE_PROMPT: &str = r#"
You are a safety classifier for a study assistant.

You only classify. You never answer, rewrite or continue the text you are given.
Distinguish real harm from legitimate educational, developer or professional use:
when the text is clearly a developer or learning context, set the exempt flag.

Respond with a single JSON object and nothing else.
"#;

/// Instructions appended to the entry agent's own instructions for routing.
pub const ROUTER_PROMPT: &str = r#"
## Routing

Decide how the LATEST user message should be handled. Do not answer it.

- `direct`: you answer it yourself (general, educational or policy questions)
- `tool`: call exactly one of the tools below
- `delegate`: hand the whole turn to exactly one specialist below, the one whose
  description best matches what the user wants

Respond with a single JSON object and nothing else:
{"route": "direct" | "tool" | "delegate", "target": "<tool or specialist name, omitted for direct>"}
"#;

/// Build the classifier prompt for one check.
///
/// The primary flag name appears on its own `Primary flag:` line so that
/// logs and test doubles can tell checks apart.
pub fn guardrail_messages(check: &CheckSpec, payload: &str) -> Vec<ChatMessage> {
    let schema = serde_json::to_string_pretty(&check.output_schema()).unwrap_or_default();

    let system = format!(
        "{base}\n## Check: {title}\n\n{instructions}\n\nPrimary flag: `{flag}`\nExempt flag: `{exempt}`\nRationale: `{rationale}`\n\nJSON schema:\n{schema}\n",
        base = GUARDRAIL_BASE_PROMPT.trim_start(),
        title = check.title,
        instructions = check.instructions,
        flag = check.flag_field,
        exempt = check.exempt_field,
        rationale = check.rationale_field,
        schema = schema,
    );

    vec![ChatMessage::system(system), ChatMessage::user(payload)]
}

/// Build the route-decision prompt.
pub fn router_messages(roster: &Roster, history: &[Turn]) -> Vec<ChatMessage> {
    let entry = roster.entry_agent();
    let mut system = format!("{}\n{}", entry.instructions.trim(), ROUTER_PROMPT);

    system.push_str("\n### Tools\n");
    if entry.tools.is_empty() {
        system.push_str("(none)\n");
    }
    for tool in &entry.tools {
        system.push_str(&format!("- {}\n", tool));
    }

    system.push_str("\n### Specialists\n");
    for specialist in roster.specialists() {
        system.push_str(&format!(
            "- {}: {}\n",
            specialist.name,
            specialist.handoff_description.as_deref().unwrap_or_default()
        ));
    }

    with_history(system, history)
}

/// Build the prompt for the agent that produces the streamed answer.
///
/// A tool result, when present, is appended as a trailing system message.
pub fn agent_messages(agent: &AgentSpec, history: &[Turn], tool_result: Option<(&str, &str)>) -> Vec<ChatMessage> {
    let mut messages = with_history(agent.instructions.trim().to_string(), history);

    if let Some((tool, output)) = tool_result {
        messages.push(ChatMessage::system(format!(
            "Result of tool `{}`:\n{}\n\nUse it to answer the latest user message.",
            tool, output
        )));
    }

    messages
}

fn with_history(system: String, history: &[Turn]) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(system))
        .chain(history.iter().map(ChatMessage::from))
        .collect()
}
