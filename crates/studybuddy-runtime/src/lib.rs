//! # studybuddy-runtime
//!
//! Async turn pipeline for StudyBuddy.
//!
//! `studybuddy-core` decides; this crate talks to the language-model
//! backend. Every network call (guardrail classification, routing, agent
//! streaming) is bounded by a timeout and never blocks other sessions.
//!
//! ## Key Guarantees
//!
//! 1. **Input first**: no agent sees a turn before the Input Safety Gate allows it
//! 2. **Gate before commit**: only text that went through the Output Safety Gate reaches history
//! 3. **One turn per session**: a second message for a busy session is rejected, not queued
//! 4. **Explicit failure policy**: an unavailable guardrail is handled as configured (closed by default)
//! 5. **No partial history**: failed or cancelled turns commit nothing
//!
//! ## Example
//!
//! ```rust,ignore
//! use studybuddy_runtime::{OpenAiCompatProvider, RuntimeConfig, TurnOrchestrator};
//!
//! let config = RuntimeConfig::from_env()?;
//! let provider = Arc::new(OpenAiCompatProvider::new(config.api_key.clone(), &config.base_url)?);
//! let orchestrator = TurnOrchestrator::from_config(provider, &config, Roster::default());
//!
//! let outcome = orchestrator
//!     .handle_message(InboundMessage::text("session-1", "Explain recursion"), &sink, cancel)
//!     .await?;
//! ```

pub mod config;
pub mod evaluator;
pub mod gates;
pub mod orchestrator;
pub mod prompts;
pub mod providers;
pub mod relay;
pub mod resilience;
pub mod router;
pub mod session_store;

#[cfg(test)]
mod test_support;

pub use config::{ConfigError, PipelineSettings, RuntimeConfig};
pub use evaluator::{EvaluationFailure, Evaluator, LlmEvaluator};
pub use gates::{InputSafetyGate, OutputSafetyGate};
pub use orchestrator::{TurnError, TurnOrchestrator, TurnOrchestratorBuilder, TurnOutcome};
pub use providers::{
    ApiCredential, ChatMessage, CompletionConfig, CompletionResponse, CredentialSource, LlmProvider,
    ProviderError, StreamEvent, TokenStream, TokenUsage,
};
#[cfg(feature = "openai")]
pub use providers::OpenAiCompatProvider;
pub use relay::{NoticeKind, PendingResponse, RelayError, RelayOutcome, ResponseSink, StreamRelay};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState, FailurePolicy, RetryConfig};
pub use router::{prepare_dispatch, Dispatch, LlmRouter, Router, RoutingFailure};
pub use session_store::{SessionHandle, SessionState, SessionStore};
