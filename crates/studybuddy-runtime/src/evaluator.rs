//! Guardrail Evaluator: runs one check against one payload.
//!
//! Every guardrail is the same call: build the classifier prompt from the
//! [`CheckSpec`], call the backend, parse and schema-validate the JSON
//! answer, apply the trip rule. Failures never escape as panics or
//! provider errors; they become an [`EvaluationFailure`] naming the check.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use backon::Retryable;
use thiserror::Error;

use studybuddy_core::{CheckSpec, GuardrailVerdict, SessionContext, VerdictError};

use crate::prompts::guardrail_messages;
use crate::providers::{CompletionConfig, LlmProvider, ProviderError};
use crate::resilience::{CircuitBreaker, RetryConfig};

/// Why a check could not produce a verdict.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationFailure {
    #[error("Guardrail '{check}' timed out after {after:?}")]
    Timeout { check: String, after: Duration },

    #[error("Guardrail '{check}' backend error: {source}")]
    Provider {
        check: String,
        #[source]
        source: ProviderError,
    },

    #[error("Guardrail '{check}' returned malformed output: {source}")]
    Malformed {
        check: String,
        #[source]
        source: VerdictError,
    },

    #[error("Guardrail '{check}' is unavailable (circuit open)")]
    CircuitOpen { check: String },
}

impl EvaluationFailure {
    pub fn check(&self) -> &str {
        match self {
            EvaluationFailure::Timeout { check, .. }
            | EvaluationFailure::Provider { check, .. }
            | EvaluationFailure::Malformed { check, .. }
            | EvaluationFailure::CircuitOpen { check } => check,
        }
    }
}

/// Uniform interface for running a guardrail check.
#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(
        &self,
        check: &CheckSpec,
        payload: &str,
        context: &SessionContext,
    ) -> Result<GuardrailVerdict, EvaluationFailure>;
}

/// Evaluator backed by an LLM classification call.
pub struct LlmEvaluator {
    provider: Arc<dyn LlmProvider>,
    completion: CompletionConfig,
    retry: RetryConfig,
    breaker: Arc<CircuitBreaker>,
}

impl LlmEvaluator {
    /// `completion.timeout` bounds each attempt.
    pub fn new(provider: Arc<dyn LlmProvider>, completion: CompletionConfig) -> Self {
        Self {
            provider,
            completion,
            retry: RetryConfig::default(),
            breaker: Arc::new(CircuitBreaker::default()),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    async fn classify(&self, check: &CheckSpec, payload: &str) -> Result<String, ProviderError> {
        let timeout = self.completion.timeout;
        let messages = guardrail_messages(check, payload);

        let attempt = || async {
            tokio::time::timeout(timeout, self.provider.complete(messages.clone(), &self.completion))
                .await
                .map_err(|_| ProviderError::Timeout(timeout))?
        };

        let response = attempt
            .retry(self.retry.backoff())
            .when(ProviderError::is_transient)
            .notify(|err: &ProviderError, delay: Duration| {
                tracing::debug!(check = %check.name, error = %err, delay = ?delay, "Retrying guardrail call");
            })
            .await?;

        Ok(response.content)
    }
}

#[async_trait]
impl Evaluator for LlmEvaluator {
    async fn evaluate(
        &self,
        check: &CheckSpec,
        payload: &str,
        context: &SessionContext,
    ) -> Result<GuardrailVerdict, EvaluationFailure> {
        if self.breaker.is_open(&check.name) {
            tracing::warn!(check = %check.name, session = %context.session_key, "Circuit open, skipping guardrail");
            return Err(EvaluationFailure::CircuitOpen {
                check: check.name.clone(),
            });
        }

        let outcome = match self.classify(check, payload).await {
            Ok(raw) => check.parse_verdict(&raw).map_err(|source| EvaluationFailure::Malformed {
                check: check.name.clone(),
                source,
            }),
            Err(ProviderError::Timeout(after)) => Err(EvaluationFailure::Timeout {
                check: check.name.clone(),
                after,
            }),
            Err(source) => Err(EvaluationFailure::Provider {
                check: check.name.clone(),
                source,
            }),
        };

        match &outcome {
            Ok(verdict) => {
                self.breaker.record_success(&check.name);
                tracing::debug!(
                    check = %check.name,
                    session = %context.session_key,
                    turn = context.turn_index,
                    flagged = verdict.flagged,
                    exempt = verdict.exempt,
                    tripped = verdict.tripped,
                    "Guardrail evaluated"
                );
            }
            Err(failure) => {
                self.breaker.record_failure(&check.name);
                tracing::warn!(check = %check.name, session = %context.session_key, error = %failure, "Guardrail evaluation failed");
            }
        }

        outcome
    }
}
