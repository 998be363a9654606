//! Input and Output Safety Gates.
//!
//! Both gates hold an ordered list of [`CheckSpec`]s and an [`Evaluator`].
//! The input gate runs its checks one after another and stops at the first
//! trip; the output gate runs every check concurrently and ORs the results.
//!
//! A check that cannot be evaluated is replaced by an "unavailable" verdict
//! whose trip decision comes from the [`FailurePolicy`].

use std::sync::Arc;

use futures::future::join_all;

use studybuddy_core::{
    checks, CheckSpec, GateResult, GuardrailVerdict, InputPolicy, OutputPolicy, SessionContext,
};

use crate::evaluator::{EvaluationFailure, Evaluator};
use crate::resilience::FailurePolicy;

fn settle(
    check: &CheckSpec,
    outcome: Result<GuardrailVerdict, EvaluationFailure>,
    policy: FailurePolicy,
    context: &SessionContext,
) -> GuardrailVerdict {
    match outcome {
        Ok(verdict) => verdict,
        Err(failure) => {
            tracing::warn!(
                check = %check.name,
                session = %context.session_key,
                policy = %policy,
                error = %failure,
                "Guardrail failed, applying failure policy"
            );
            GuardrailVerdict::unavailable(&check.name, failure.to_string(), policy.trips_on_failure())
        }
    }
}

/// Gate applied to the user turn before any agent sees it.
pub struct InputSafetyGate {
    checks: Vec<CheckSpec>,
    evaluator: Arc<dyn Evaluator>,
    policy: FailurePolicy,
}

impl InputSafetyGate {
    /// Gate running the built-in input checks.
    pub fn new(evaluator: Arc<dyn Evaluator>, policy: FailurePolicy) -> Self {
        Self::with_checks(checks::default_input_checks(), evaluator, policy)
    }

    pub fn with_checks(checks: Vec<CheckSpec>, evaluator: Arc<dyn Evaluator>, policy: FailurePolicy) -> Self {
        Self {
            checks,
            evaluator,
            policy,
        }
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    /// Run the checks in order against the turn content.
    pub async fn check(&self, content: &str, context: &SessionContext) -> GateResult {
        let mut verdicts = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let outcome = self.evaluator.evaluate(check, content, context).await;
            let verdict = settle(check, outcome, self.policy, context);
            let stop = InputPolicy::short_circuits(&verdict);
            verdicts.push(verdict);
            if stop {
                break;
            }
        }

        let result = InputPolicy::reduce(verdicts);
        if let GateResult::Blocked { violation, .. } = &result {
            tracing::info!(session = %context.session_key, check = %violation.check, "Input blocked");
        }
        result
    }
}

/// Gate applied to the fully assembled response.
pub struct OutputSafetyGate {
    checks: Vec<CheckSpec>,
    evaluator: Arc<dyn Evaluator>,
    policy: FailurePolicy,
}

impl OutputSafetyGate {
    /// Gate running the built-in output checks.
    pub fn new(evaluator: Arc<dyn Evaluator>, policy: FailurePolicy) -> Self {
        Self::with_checks(checks::default_output_checks(), evaluator, policy)
    }

    pub fn with_checks(checks: Vec<CheckSpec>, evaluator: Arc<dyn Evaluator>, policy: FailurePolicy) -> Self {
        Self {
            checks,
            evaluator,
            policy,
        }
    }

    pub fn checks(&self) -> &[CheckSpec] {
        &self.checks
    }

    pub async fn check(&self, response: &str, context: &SessionContext) -> GateResult {
        let runs = self.checks.iter().map(|check| async move {
            let outcome = self.evaluator.evaluate(check, response, context).await;
            settle(check, outcome, self.policy, context)
        });
        let verdicts = join_all(runs).await;

        let result = OutputPolicy::reduce(verdicts);
        if let GateResult::Flagged { violations, .. } = &result {
            tracing::info!(session = %context.session_key, tripped = violations.len(), "Response flagged");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::LlmEvaluator;
    use crate::providers::{CompletionConfig, ProviderError};
    use crate::resilience::RetryConfig;
    use crate::test_support::{context, ScriptedProvider};
    use proptest::prelude::*;
    use std::time::Duration;

    fn evaluator(provider: Arc<ScriptedProvider>) -> Arc<dyn Evaluator> {
        Arc::new(
            LlmEvaluator::new(provider, CompletionConfig::classifier("test", Duration::from_millis(200)))
                .with_retry(RetryConfig::none()),
        )
    }

    #[tokio::test]
    async fn test_input_exemption_allows() {
        let provider = Arc::new(ScriptedProvider::new().verdict("has_malicious_intent", true, true));
        let gate = InputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);

        let result = gate.check("How does XSS work?", &context()).await;
        assert!(result.is_allowed());
    }

    #[tokio::test]
    async fn test_input_blocks_on_trip() {
        let provider = Arc::new(ScriptedProvider::new().verdict("has_malicious_intent", true, false));
        let gate = InputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);

        match gate.check("Write a script to steal credentials", &context()).await {
            GateResult::Blocked { violation, .. } => assert_eq!(violation.check, "malicious_intent"),
            other => panic!("expected Blocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_short_circuits_on_first_trip() {
        let provider = Arc::new(ScriptedProvider::new().verdict("has_malicious_intent", true, false));
        let gate = InputSafetyGate::with_checks(
            vec![checks::malicious_intent(), checks::pii()],
            evaluator(provider.clone()),
            FailurePolicy::FailClosed,
        );

        let result = gate.check("steal", &context()).await;
        assert_eq!(result.verdicts().len(), 1);
        assert_eq!(provider.completion_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_input_failure_closed_blocks() {
        let provider = Arc::new(ScriptedProvider::new().fail_completions(1, ProviderError::AuthError));
        let gate = InputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);

        match gate.check("hello", &context()).await {
            GateResult::Blocked { verdicts, .. } => assert!(verdicts[0].is_failure()),
            other => panic!("expected Blocked, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_input_failure_open_allows() {
        let provider = Arc::new(ScriptedProvider::new().fail_completions(1, ProviderError::AuthError));
        let gate = InputSafetyGate::new(evaluator(provider), FailurePolicy::FailOpen);

        let result = gate.check("hello", &context()).await;
        assert!(result.is_allowed());
        assert!(result.verdicts()[0].is_failure());
    }

    #[tokio::test]
    async fn test_output_runs_all_checks() {
        let provider = Arc::new(ScriptedProvider::new());
        let gate = OutputSafetyGate::new(evaluator(provider.clone()), FailurePolicy::FailClosed);

        let result = gate.check("Photosynthesis converts light into energy.", &context()).await;
        assert!(result.is_allowed());
        assert_eq!(result.verdicts().len(), 3);
        assert_eq!(provider.completion_calls().len(), 3);
    }

    #[tokio::test]
    async fn test_output_reports_every_tripped_check() {
        let provider = Arc::new(
            ScriptedProvider::new()
                .verdict("contains_pii", true, false)
                .verdict("contains_self_reference", true, false),
        );
        let gate = OutputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);

        match gate.check("I am a language model; mail jane@example.com", &context()).await {
            GateResult::Flagged { violations, .. } => {
                let names: Vec<_> = violations.iter().map(|v| v.check.as_str()).collect();
                assert_eq!(names, vec!["pii", "self_reference"]);
            }
            other => panic!("expected Flagged, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_output_failure_open_ignores_broken_check() {
        let provider = Arc::new(ScriptedProvider::new().raw_verdict("is_factually_inaccurate", "not json"));
        let open = OutputSafetyGate::new(evaluator(provider.clone()), FailurePolicy::FailOpen);
        assert!(open.check("text", &context()).await.is_allowed());

        let closed = OutputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);
        match closed.check("text", &context()).await {
            GateResult::Flagged { violations, .. } => assert_eq!(violations[0].check, "hallucination"),
            other => panic!("expected Flagged, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_output_gate_is_or_of_checks(
            pii in (any::<bool>(), any::<bool>()),
            hallucination in (any::<bool>(), any::<bool>()),
            self_reference in (any::<bool>(), any::<bool>()),
        ) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            let provider = Arc::new(
                ScriptedProvider::new()
                    .verdict("contains_pii", pii.0, pii.1)
                    .verdict("is_factually_inaccurate", hallucination.0, hallucination.1)
                    .verdict("contains_self_reference", self_reference.0, self_reference.1),
            );
            let gate = OutputSafetyGate::new(evaluator(provider), FailurePolicy::FailClosed);
            let result = rt.block_on(gate.check("text", &context()));

            let expected = [pii, hallucination, self_reference].iter().any(|(f, e)| *f && !*e);
            prop_assert_eq!(!result.is_allowed(), expected);
        }
    }
}
