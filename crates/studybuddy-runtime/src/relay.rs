//! Streaming Response Relay.
//!
//! Forwards every text fragment of an agent stream to the sink the moment
//! it arrives, accumulates the fragments, and gates the assembled text once
//! the stream completes. Gating never delays forwarding; tokens shown to the
//! user are never retracted.
//!
//! The relay owns the turn's [`PendingResponse`]. A stream that ends
//! without [`StreamEvent::Completed`] counts as a stream failure. On stream
//! failure, read timeout or cancellation the accumulator is dropped and the sink receives
//! a terminal `abort`; no partial text leaves the relay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use studybuddy_core::{GateResult, SessionContext};

use crate::gates::OutputSafetyGate;
use crate::providers::{ProviderError, StreamEvent, TokenStream};

/// Kind of a whole (non-streamed) message sent to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoticeKind {
    /// Transient "thinking" indicator, cleared by the first token
    Thinking,

    /// The input gate blocked the turn
    Refusal,

    /// The turn failed
    Error,

    /// Another turn is already running for this session
    Busy,

    /// Follow-up after a flagged response
    Redaction,
}

/// Outbound side of the chat transport, injected per turn.
#[async_trait]
pub trait ResponseSink: Send + Sync {
    /// Send a complete message that is not part of the token stream.
    async fn send_message(&self, kind: NoticeKind, text: &str);

    /// Remove the thinking indicator, if one is showing.
    async fn clear_thinking(&self);

    /// Emit one streamed fragment.
    async fn stream_token(&self, token: &str);

    /// The streamed message is complete.
    async fn finish(&self);

    /// The streamed message ended abnormally.
    async fn abort(&self, reason: &str);
}

/// Accumulator for the fragments of the turn in flight.
#[derive(Debug, Default)]
pub struct PendingResponse {
    fragments: Vec<String>,
}

impl PendingResponse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: impl Into<String>) {
        self.fragments.push(fragment.into());
    }

    /// Number of fragments received.
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Concatenate the fragments in arrival order.
    pub fn finalize(self) -> String {
        self.fragments.concat()
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelayError {
    #[error("Stream failed: {0}")]
    StreamFailure(#[from] ProviderError),

    #[error("Response cancelled")]
    Cancelled,

    #[error("No data from the model for {0:?}")]
    Timeout(Duration),
}

/// Completed stream: the assembled text and its output-gate result.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayOutcome {
    pub text: String,
    pub gate: GateResult,
}

pub struct StreamRelay {
    output_gate: Arc<OutputSafetyGate>,
    read_timeout: Duration,
}

impl StreamRelay {
    /// `read_timeout` bounds the wait for each stream event.
    pub fn new(output_gate: Arc<OutputSafetyGate>, read_timeout: Duration) -> Self {
        Self {
            output_gate,
            read_timeout,
        }
    }

    /// Forward `stream` to `sink`, then gate the full text.
    pub async fn relay(
        &self,
        mut stream: TokenStream,
        sink: &dyn ResponseSink,
        context: &SessionContext,
        cancel: &CancellationToken,
    ) -> Result<RelayOutcome, RelayError> {
        let mut pending = PendingResponse::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(abort(sink, &pending, RelayError::Cancelled).await);
                }
                next = tokio::time::timeout(self.read_timeout, stream.next()) => next,
            };

            match next {
                Err(_) => return Err(abort(sink, &pending, RelayError::Timeout(self.read_timeout)).await),
                Ok(Some(Err(e))) => return Err(abort(sink, &pending, RelayError::StreamFailure(e)).await),
                Ok(Some(Ok(StreamEvent::TextDelta(fragment)))) => {
                    if pending.is_empty() {
                        sink.clear_thinking().await;
                    }
                    sink.stream_token(&fragment).await;
                    pending.push(fragment);
                }
                Ok(Some(Ok(StreamEvent::Completed))) => break,
                Ok(None) => {
                    let truncated = ProviderError::StreamError("stream ended before completion".to_string());
                    return Err(abort(sink, &pending, RelayError::StreamFailure(truncated)).await);
                }
            }
        }

        if pending.is_empty() {
            sink.clear_thinking().await;
        }
        sink.finish().await;

        let fragments = pending.len();
        let text = pending.finalize();
        tracing::debug!(session = %context.session_key, fragments, chars = text.len(), "Stream complete, gating response");

        let gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RelayError::Cancelled),
            gate = self.output_gate.check(&text, context) => gate,
        };

        Ok(RelayOutcome { text, gate })
    }
}

async fn abort(sink: &dyn ResponseSink, pending: &PendingResponse, error: RelayError) -> RelayError {
    tracing::warn!(fragments = pending.len(), error = %error, "Stream aborted, discarding partial response");
    if pending.is_empty() {
        sink.clear_thinking().await;
    }
    sink.abort(&error.to_string()).await;
    error
}
