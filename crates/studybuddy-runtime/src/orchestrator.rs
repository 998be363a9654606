//! Turn orchestrator: drives one inbound message through the pipeline.
//!
//! ## Turn flow
//!
//! | Step | Component | On failure |
//! |------|-----------|------------|
//! | 1 | Session lock (`try_lock`) | `Busy` notice |
//! | 2 | Content Extractor (first attachment only) | file notice, nothing recorded |
//! | 3 | Thinking indicator | |
//! | 4 | Input Safety Gate | refusal recorded; an unavailable check gives an error notice, nothing recorded |
//! | 5 | Router, then dispatch | error notice, nothing recorded |
//! | 6 | Agent stream through the Streaming Response Relay | terminal marker, nothing recorded |
//! | 7 | Output Safety Gate (inside the relay) | flagged turn + redaction (or unverified) notice |
//! | 8 | Commit user and assistant turns | |
//!
//! The user turn and its answer are committed together, so a failed or
//! cancelled turn leaves history exactly as it was.

use std::path::PathBuf;
use std::sync::Arc;

use rand::seq::SliceRandom;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use studybuddy_core::{
    extract_attachment, fold_attachment, DeveloperInfo, ExtractError, GateResult, GuardrailViolation, InboundMessage,
    Roster, SessionContext, SessionError, SessionKey, ToolBox, Turn, TurnPhase,
};

use crate::config::RuntimeConfig;
use crate::evaluator::{Evaluator, LlmEvaluator};
use crate::gates::{InputSafetyGate, OutputSafetyGate};
use crate::providers::{CompletionConfig, LlmProvider, ProviderError};
use crate::relay::{NoticeKind, RelayError, ResponseSink, StreamRelay};
use crate::resilience::{CircuitBreaker, FailurePolicy};
use crate::router::{prepare_dispatch, LlmRouter, Router, RoutingFailure};
use crate::session_store::{SessionState, SessionStore};

/// Thinking indicators, one picked at random per turn.
pub const THINKING_PHRASES: &[&str] = &[
    "🧠 Thinking... Just a moment while I gather your answer!",
    "📚 Processing your request... Let me put my study cap on!",
    "🤓 Crunching data and decoding knowledge... hang tight!",
    "⏳ Working on it...",
    "🔍 Gathering insights... this won't take long!",
    "💡 One sec, the neurons are firing!",
    "Thinking this through like a top student... ✍️",
    "Almost there... just connecting the academic dots! 📖",
    "Sharpening my pencils... and my thoughts! ✏️💭",
    "Flipping through mental textbooks... 📘",
];

pub const REFUSAL_NOTICE: &str =
    "I can't help with that request. I'm happy to help with studying, programming or research questions instead.";

pub const REDACTION_NOTICE: &str =
    "⚠️ Part of the answer above did not pass a safety check and has been marked in the conversation record. Please treat it with caution.";

pub const UNVERIFIED_NOTICE: &str =
    "⚠️ The safety check for the answer above could not run. It has been marked as unverified in the conversation record.";

pub const GUARDRAIL_UNAVAILABLE_NOTICE: &str = "❌ The safety check is unavailable right now. Please try again in a moment.";

pub const BUSY_NOTICE: &str = "⏳ Still working on your previous message. Please wait for it to finish.";

const FAILURE_NOTICE: &str = "❌ Something went wrong while answering. Please try again.";

/// Why a turn ended without an answer.
#[derive(Error, Debug)]
pub enum TurnError {
    #[error("A turn is already in progress for session {0}")]
    Busy(SessionKey),

    #[error(transparent)]
    Extraction(#[from] ExtractError),

    #[error("Safety check {} unavailable: {}", .0.check, .0.rationale)]
    GuardrailUnavailable(GuardrailViolation),

    #[error("Routing failed: {0}")]
    Routing(#[from] RoutingFailure),

    #[error("Response failed: {0}")]
    Relay(#[from] RelayError),

    #[error("Turn cancelled")]
    Cancelled,
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The answer passed the output gate and was committed.
    Completed { text: String },

    /// The answer was shown and committed with a non-compliant flag.
    Flagged {
        text: String,
        violations: Vec<GuardrailViolation>,
    },

    /// The input gate blocked the turn; a refusal was recorded instead.
    Refused { violation: GuardrailViolation },
}

/// Runs turns for every session of the process.
pub struct TurnOrchestrator {
    store: SessionStore,
    input_gate: InputSafetyGate,
    router: Arc<dyn Router>,
    toolbox: ToolBox,
    relay: StreamRelay,
    provider: Arc<dyn LlmProvider>,
    agent_completion: CompletionConfig,
    history_dir: PathBuf,
}

impl TurnOrchestrator {
    pub fn builder() -> TurnOrchestratorBuilder {
        TurnOrchestratorBuilder::new()
    }

    /// Wire the whole pipeline from runtime configuration.
    pub fn from_config(provider: Arc<dyn LlmProvider>, config: &RuntimeConfig, roster: Roster) -> Self {
        let settings = &config.pipeline;
        let evaluator = LlmEvaluator::new(provider.clone(), settings.guardrail_completion())
            .with_retry(settings.retry.clone())
            .with_circuit_breaker(Arc::new(CircuitBreaker::new(settings.circuit_breaker.clone())));

        let provider_for_agents = provider.clone();
        TurnOrchestratorBuilder::new()
            .evaluator(Arc::new(evaluator))
            .router(Arc::new(LlmRouter::new(provider, settings.router_completion())))
            .roster(roster)
            .developer(config.developer.clone())
            .failure_policy(settings.failure_policy)
            .agent_completion(settings.agent_completion())
            .history_dir(config.history_dir.clone())
            .assemble(provider_for_agents)
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.store
    }

    /// Handle one inbound message end to end.
    ///
    /// Every failure is reported to `sink` before it is returned; the session
    /// stays usable for the next message.
    pub async fn handle_message(
        &self,
        message: InboundMessage,
        sink: &dyn ResponseSink,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let key = message.session_key.clone();
        let handle = self.store.get_or_create(&key);

        let Ok(mut state) = handle.try_lock_owned() else {
            tracing::warn!(session = %key, "Rejected message, turn already in flight");
            sink.send_message(NoticeKind::Busy, BUSY_NOTICE).await;
            return Err(TurnError::Busy(key));
        };

        let context = state.context.for_turn(state.session.len() as u64);
        let mut phase = TurnPhase::Idle;

        let result = self.run_turn(&mut state, message, sink, &context, &cancel, &mut phase).await;

        match &result {
            Ok(outcome) => {
                tracing::info!(session = %key, turn = context.turn_index, outcome = outcome_label(outcome), "Turn finished");
            }
            Err(error) => {
                advance(&mut phase, TurnPhase::Aborted, &context);
                tracing::warn!(session = %key, turn = context.turn_index, error = %error, "Turn failed");
                surface(error, sink).await;
            }
        }

        result
    }

    async fn run_turn(
        &self,
        state: &mut SessionState,
        message: InboundMessage,
        sink: &dyn ResponseSink,
        context: &SessionContext,
        cancel: &CancellationToken,
        phase: &mut TurnPhase,
    ) -> Result<TurnOutcome, TurnError> {
        let extracted = message.attachment.as_ref().map(extract_attachment).transpose()?;
        let content = fold_attachment(&message.text, extracted.as_deref());

        sink.send_message(NoticeKind::Thinking, thinking_phrase()).await;

        if let GateResult::Blocked { violation, .. } = self.input_gate.check(&content, context).await {
            if violation.unavailable {
                return Err(TurnError::GuardrailUnavailable(violation));
            }
            sink.clear_thinking().await;
            sink.send_message(NoticeKind::Refusal, REFUSAL_NOTICE).await;
            state.session.append_user(content);
            state.session.append_refusal(REFUSAL_NOTICE, violation.clone());
            return Ok(TurnOutcome::Refused { violation });
        }

        let mut history = state.session.snapshot();
        history.push(Turn::user(content.as_str()));

        advance(phase, TurnPhase::Routing, context);
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            decision = self.router.route(&state.roster, &history, context) => decision?,
        };

        let dispatch = prepare_dispatch(&state.roster, &self.toolbox, &decision, &history, context)?;
        advance(phase, dispatch.phase.clone(), context);
        tracing::debug!(session = %context.session_key, agent = %dispatch.agent, "Dispatching");

        advance(phase, TurnPhase::Streaming, context);
        let timeout = self.agent_completion.timeout;
        let started = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            started = tokio::time::timeout(timeout, self.provider.stream(dispatch.messages, &self.agent_completion)) => started,
        };
        let stream = match started {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(abort_stream(sink, RelayError::StreamFailure(e)).await.into()),
            Err(_) => return Err(abort_stream(sink, RelayError::Timeout(timeout)).await.into()),
        };

        let outcome = self.relay.relay(stream, sink, context, cancel).await?;
        advance(phase, TurnPhase::Completed, context);

        state.session.append_user(content);
        let violations = match outcome.gate {
            GateResult::Allowed { .. } => {
                state.session.append_assistant(outcome.text.as_str());
                return Ok(TurnOutcome::Completed { text: outcome.text });
            }
            GateResult::Flagged { violations, .. } => violations,
            GateResult::Blocked { violation, .. } => vec![violation],
        };

        let notice = if violations.iter().all(|v| v.unavailable) {
            UNVERIFIED_NOTICE
        } else {
            REDACTION_NOTICE
        };
        state.session.append_flagged(outcome.text.as_str(), violations.clone());
        sink.send_message(NoticeKind::Redaction, notice).await;
        Ok(TurnOutcome::Flagged {
            text: outcome.text,
            violations,
        })
    }

    /// Persist a session's history and drop it from the store.
    ///
    /// Returns the written path, or `None` when the session is unknown.
    /// Waits for a turn in flight to finish first. When the write fails the
    /// session stays in the store.
    pub async fn end_session(&self, key: &SessionKey) -> Result<Option<PathBuf>, SessionError> {
        let Some(handle) = self.store.get(key) else {
            return Ok(None);
        };

        let state = handle.lock().await;
        let path = state.session.save_to(&self.history_dir)?;
        self.store.remove(key);
        tracing::info!(session = %key, turns = state.session.len(), "Session ended");
        Ok(Some(path))
    }
}

fn thinking_phrase() -> &'static str {
    THINKING_PHRASES
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or("⏳ Working on it...")
}

fn advance(phase: &mut TurnPhase, next: TurnPhase, context: &SessionContext) {
    if !phase.can_advance_to(&next) {
        tracing::warn!(session = %context.session_key, from = %phase, to = %next, "Unexpected turn phase transition");
    }
    tracing::debug!(session = %context.session_key, from = %phase, to = %next, "Turn phase");
    *phase = next;
}

async fn abort_stream(sink: &dyn ResponseSink, error: RelayError) -> RelayError {
    sink.clear_thinking().await;
    sink.abort(&error.to_string()).await;
    error
}

/// Report a failed turn to the user.
async fn surface(error: &TurnError, sink: &dyn ResponseSink) {
    match error {
        // Already reported
        TurnError::Busy(_) | TurnError::Relay(RelayError::Cancelled) => {}
        TurnError::Cancelled => {
            sink.clear_thinking().await;
            sink.abort("Response cancelled").await;
        }
        TurnError::Extraction(e) => {
            sink.send_message(NoticeKind::Error, &format!("❌ {}", e)).await;
        }
        TurnError::GuardrailUnavailable(_) => {
            sink.clear_thinking().await;
            sink.send_message(NoticeKind::Error, GUARDRAIL_UNAVAILABLE_NOTICE).await;
        }
        TurnError::Routing(_) => {
            sink.clear_thinking().await;
            sink.send_message(NoticeKind::Error, FAILURE_NOTICE).await;
        }
        TurnError::Relay(_) => {
            sink.send_message(NoticeKind::Error, FAILURE_NOTICE).await;
        }
    }
}

fn outcome_label(outcome: &TurnOutcome) -> &'static str {
    match outcome {
        TurnOutcome::Completed { .. } => "completed",
        TurnOutcome::Flagged { .. } => "flagged",
        TurnOutcome::Refused { .. } => "refused",
    }
}

/// Builder for [`TurnOrchestrator`].
pub struct TurnOrchestratorBuilder {
    provider: Option<Arc<dyn LlmProvider>>,
    evaluator: Option<Arc<dyn Evaluator>>,
    router: Option<Arc<dyn Router>>,
    roster: Roster,
    toolbox: ToolBox,
    developer: Option<DeveloperInfo>,
    failure_policy: FailurePolicy,
    agent_completion: CompletionConfig,
    history_dir: PathBuf,
}

impl TurnOrchestratorBuilder {
    pub fn new() -> Self {
        Self {
            provider: None,
            evaluator: None,
            router: None,
            roster: Roster::default(),
            toolbox: ToolBox::with_builtins(),
            developer: None,
            failure_policy: Default::default(),
            agent_completion: CompletionConfig::default(),
            history_dir: PathBuf::from("history"),
        }
    }

    /// Backend for agent streams. Also used for guardrails and routing
    /// unless those are set explicitly.
    pub fn provider(mut self, provider: Arc<dyn LlmProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn Evaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn router(mut self, router: Arc<dyn Router>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn roster(mut self, roster: Roster) -> Self {
        self.roster = roster;
        self
    }

    pub fn toolbox(mut self, toolbox: ToolBox) -> Self {
        self.toolbox = toolbox;
        self
    }

    pub fn developer(mut self, developer: Option<DeveloperInfo>) -> Self {
        self.developer = developer;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Completion settings for agent streams; `timeout` bounds each read.
    pub fn agent_completion(mut self, completion: CompletionConfig) -> Self {
        self.agent_completion = completion;
        self
    }

    pub fn history_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.history_dir = dir.into();
        self
    }

    /// Build the orchestrator. Fails when no provider was set.
    pub fn build(mut self) -> Result<TurnOrchestrator, ProviderError> {
        let provider = self
            .provider
            .take()
            .ok_or_else(|| ProviderError::NotConfigured("No provider set".to_string()))?;
        Ok(self.assemble(provider))
    }

    fn assemble(self, provider: Arc<dyn LlmProvider>) -> TurnOrchestrator {
        let evaluator = self.evaluator.unwrap_or_else(|| {
            Arc::new(LlmEvaluator::new(
                provider.clone(),
                CompletionConfig::classifier(&self.agent_completion.model, self.agent_completion.timeout),
            ))
        });
        let router = self.router.unwrap_or_else(|| {
            Arc::new(LlmRouter::new(
                provider.clone(),
                CompletionConfig::classifier(&self.agent_completion.model, self.agent_completion.timeout),
            ))
        });

        let output_gate = Arc::new(OutputSafetyGate::new(evaluator.clone(), self.failure_policy));

        TurnOrchestrator {
            store: SessionStore::new(Arc::new(self.roster), self.developer),
            input_gate: InputSafetyGate::new(evaluator, self.failure_policy),
            router,
            toolbox: self.toolbox,
            relay: StreamRelay::new(output_gate, self.agent_completion.timeout),
            provider,
            agent_completion: self.agent_completion,
            history_dir: self.history_dir,
        }
    }
}

impl Default for TurnOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
