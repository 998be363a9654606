//! Resilience patterns for studybuddy-runtime.
//!
//! This module provides:
//! - Circuit breaker per guardrail check
//! - Retry with backoff for transient provider errors
//! - The failure policy applied when a check cannot be evaluated

mod circuit_breaker;
mod policy;
mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use policy::FailurePolicy;
pub use retry::RetryConfig;
