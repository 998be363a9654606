//! Agent Router: decides how a turn is handled and prepares the dispatch.
//!
//! The entry agent's model produces a route decision as JSON. That output
//! is untrusted: it is validated against the roster's whitelist of tools
//! and specialists before anything is dispatched. Exactly one agent
//! produces the streamed answer for a turn.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use studybuddy_core::{AgentSpec, RosterError, Roster, RouteDecision, SessionContext, ToolBox, ToolError, Turn, TurnPhase};

use crate::prompts::{agent_messages, router_messages};
use crate::providers::{ChatMessage, CompletionConfig, LlmProvider, ProviderError};

/// No agent could be selected, or the selected tool failed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RoutingFailure {
    #[error("Invalid route decision: {0}")]
    Decision(#[from] RosterError),

    #[error("Router backend error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Routing timed out after {0:?}")]
    Timeout(Duration),

    #[error("Tool failed: {0}")]
    Tool(#[from] ToolError),
}

/// Produces a validated route decision from the conversation so far.
#[async_trait]
pub trait Router: Send + Sync {
    async fn route(
        &self,
        roster: &Roster,
        history: &[Turn],
        context: &SessionContext,
    ) -> Result<RouteDecision, RoutingFailure>;
}

/// Router asking the entry agent's model for a decision.
pub struct LlmRouter {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
}

impl LlmRouter {
    /// `completion.timeout` bounds the decision call.
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self { provider, completion }
    }
}

#[async_trait]
impl Router for LlmRouter {
    async fn route(
        &self,
        roster: &Roster,
        history: &[Turn],
        context: &SessionContext,
    ) -> Result<RouteDecision, RoutingFailure> {
        let messages = router_messages(roster, history);
        let timeout = self.completion.timeout;

        let response = tokio::time::timeout(timeout, self.provider.complete(messages, &self.completion))
            .await
            .map_err(|_| RoutingFailure::Timeout(timeout))??;

        let decision = roster.parse_route(&response.content).map_err(|e| {
            tracing::warn!(session = %context.session_key, error = %e, raw = %response.content, "Rejected route decision");
            e
        })?;

        tracing::debug!(session = %context.session_key, route = %decision, "Route decided");
        Ok(decision)
    }
}

/// Everything needed to start the answering stream for a turn.
#[derive(Debug, Clone)]
pub struct Dispatch {
    /// Agent producing the answer
    pub agent: String,

    /// Prompt for the answering agent
    pub messages: Vec<ChatMessage>,

    /// Phase entered after routing
    pub phase: TurnPhase,
}

/// Turn a validated decision into the answering agent's prompt.
///
/// Tool calls run here, synchronously, and their output is handed to the
/// entry agent to phrase the answer.
pub fn prepare_dispatch(
    roster: &Roster,
    toolbox: &ToolBox,
    decision: &RouteDecision,
    history: &[Turn],
    context: &SessionContext,
) -> Result<Dispatch, RoutingFailure> {
    match decision {
        RouteDecision::DirectAnswer => Ok(entry_dispatch(roster.entry_agent(), history, None, TurnPhase::DirectAnswer)),
        RouteDecision::ToolCall { tool } => {
            let output = toolbox.invoke(tool, context)?;
            tracing::debug!(session = %context.session_key, tool = %tool, "Tool invoked");
            Ok(entry_dispatch(
                roster.entry_agent(),
                history,
                Some((tool.as_str(), output.as_str())),
                TurnPhase::ToolInvocation { tool: tool.clone() },
            ))
        }
        RouteDecision::Delegate { agent } => {
            let spec = roster
                .agent(agent)
                .filter(|spec| spec.is_leaf())
                .ok_or_else(|| RosterError::NotWhitelisted(agent.clone()))?;
            Ok(Dispatch {
                agent: spec.name.clone(),
                messages: agent_messages(spec, history, None),
                phase: TurnPhase::Delegated {
                    agent: spec.name.clone(),
                },
            })
        }
    }
}

fn entry_dispatch(entry: &AgentSpec, history: &[Turn], tool_result: Option<(&str, &str)>, phase: TurnPhase) -> Dispatch {
    Dispatch {
        agent: entry.name.clone(),
        messages: agent_messages(entry, history, tool_result),
        phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, ScriptedProvider};
    use studybuddy_core::DeveloperInfo;

    fn router(provider: Arc<ScriptedProvider>) -> LlmRouter {
        LlmRouter::new(provider, CompletionConfig::classifier("test", Duration::from_millis(200)))
    }

    #[tokio::test]
    async fn test_route_direct() {
        let provider = Arc::new(ScriptedProvider::new().route(r#"{"route": "direct"}"#));
        let decision = router(provider)
            .route(&Roster::default(), &[Turn::user("How does XSS work?")], &context())
            .await
            .unwrap();
        assert_eq!(decision, RouteDecision::DirectAnswer);
    }

    #[tokio::test]
    async fn test_route_delegate_normalizes_name() {
        let provider = Arc::new(ScriptedProvider::new().route("```json\n{\"route\": \"delegate\", \"target\": \"quiz_generator\"}\n```"));
        let decision = router(provider)
            .route(&Roster::default(), &[Turn::user("Quiz me on mitosis")], &context())
            .await
            .unwrap();
        assert_eq!(
            decision,
            RouteDecision::Delegate {
                agent: "Quiz Generator".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_route_rejects_unknown_target() {
        let provider = Arc::new(ScriptedProvider::new().route(r#"{"route": "delegate", "target": "Shell Executor"}"#));
        let err = router(provider).route(&Roster::default(), &[Turn::user("rm -rf")], &context()).await.unwrap_err();
        assert_eq!(
            err,
            RoutingFailure::Decision(RosterError::NotWhitelisted("Shell Executor".to_string()))
        );
    }

    #[tokio::test]
    async fn test_route_rejects_prose() {
        let provider = Arc::new(ScriptedProvider::new().route("I'd hand this to the quiz agent."));
        let err = router(provider).route(&Roster::default(), &[Turn::user("Quiz me")], &context()).await.unwrap_err();
        assert!(matches!(err, RoutingFailure::Decision(RosterError::MalformedDecision(_))));
    }

    #[tokio::test]
    async fn test_route_timeout() {
        let provider = Arc::new(ScriptedProvider::new().completion_delay(Duration::from_secs(5)));
        let err = router(provider).route(&Roster::default(), &[Turn::user("hi")], &context()).await.unwrap_err();
        assert_eq!(err, RoutingFailure::Timeout(Duration::from_millis(200)));
    }

    #[test]
    fn test_dispatch_direct_uses_entry_agent() {
        let roster = Roster::default();
        let history = vec![Turn::user("What is a mutex?")];
        let dispatch = prepare_dispatch(&roster, &ToolBox::with_builtins(), &RouteDecision::DirectAnswer, &history, &context()).unwrap();

        assert_eq!(dispatch.agent, "StudyBuddy");
        assert_eq!(dispatch.phase, TurnPhase::DirectAnswer);
        assert_eq!(dispatch.messages.last().unwrap().content, "What is a mutex?");
    }

    #[test]
    fn test_dispatch_delegate_uses_specialist() {
        let roster = Roster::default();
        let decision = RouteDecision::Delegate {
            agent: "Math Solver".to_string(),
        };
        let dispatch = prepare_dispatch(&roster, &ToolBox::with_builtins(), &decision, &[Turn::user("2x=4")], &context()).unwrap();

        assert_eq!(dispatch.agent, "Math Solver");
        assert!(matches!(dispatch.phase, TurnPhase::Delegated { .. }));
        assert_eq!(dispatch.messages[0].content, roster.agent("Math Solver").unwrap().instructions.trim());
    }

    #[test]
    fn test_dispatch_tool_call_feeds_result_to_entry_agent() {
        let roster = Roster::default();
        let context = SessionContext::new(
            "s".into(),
            Some(DeveloperInfo {
                name: "Ada".into(),
                mail: "ada@example.com".into(),
                github: "ada".into(),
            }),
        );
        let decision = RouteDecision::ToolCall {
            tool: "developer_info".to_string(),
        };
        let dispatch = prepare_dispatch(&roster, &ToolBox::with_builtins(), &decision, &[Turn::user("Who made you?")], &context).unwrap();

        assert_eq!(dispatch.agent, "StudyBuddy");
        assert!(dispatch.messages.last().unwrap().content.contains("Developer name: Ada"));
    }

    #[test]
    fn test_dispatch_tool_without_developer_record_fails() {
        let decision = RouteDecision::ToolCall {
            tool: "developer_info".to_string(),
        };
        let err = prepare_dispatch(&Roster::default(), &ToolBox::with_builtins(), &decision, &[], &context()).unwrap_err();
        assert!(matches!(err, RoutingFailure::Tool(ToolError::NotConfigured { .. })));
    }
}
