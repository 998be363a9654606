//! In-memory provider and sink doubles shared by the runtime tests.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;

use studybuddy_core::SessionContext;

use crate::providers::{
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, StreamEvent, TokenStream,
    TokenUsage,
};
use crate::relay::{NoticeKind, ResponseSink};

pub(crate) fn context() -> SessionContext {
    SessionContext::new("test-session".into(), None)
}

/// How the scripted stream ends after its tokens.
#[derive(Debug, Clone, Default)]
pub(crate) enum StreamEnd {
    #[default]
    Complete,
    Fail(ProviderError),
    /// Closes without the completion marker
    Truncated,
    Hang,
}

#[derive(Default)]
struct Script {
    /// Raw classifier output keyed by primary flag field
    verdicts: HashMap<String, String>,
    routes: VecDeque<String>,
    completion_failures: usize,
    completion_error: Option<ProviderError>,
    completion_delay: Option<Duration>,
    tokens: Vec<String>,
    stream_end: StreamEnd,
    stream_start_error: Option<ProviderError>,
}

/// Provider answering guardrail, routing and agent calls from a script.
///
/// Guardrail prompts are recognised by their `Primary flag:` line, routing
/// prompts by the route JSON contract. Unscripted checks come back clean and
/// unscripted routes come back `direct`.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    script: Mutex<Script>,
    completion_calls: Mutex<Vec<Vec<ChatMessage>>>,
    stream_calls: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn verdict(self, flag_field: &str, flagged: bool, exempt: bool) -> Self {
        let raw = serde_json::json!({
            flag_field: flagged,
            "is_developer_context": exempt,
            "reasoning": format!("scripted {}={} exempt={}", flag_field, flagged, exempt),
        })
        .to_string();
        self.raw_verdict(flag_field, &raw)
    }

    pub(crate) fn raw_verdict(self, flag_field: &str, raw: &str) -> Self {
        self.script.lock().verdicts.insert(flag_field.to_string(), raw.to_string());
        self
    }

    pub(crate) fn route(self, raw: &str) -> Self {
        self.script.lock().routes.push_back(raw.to_string());
        self
    }

    /// Fail the next `times` completion calls with `error`.
    pub(crate) fn fail_completions(self, times: usize, error: ProviderError) -> Self {
        {
            let mut script = self.script.lock();
            script.completion_failures = times;
            script.completion_error = Some(error);
        }
        self
    }

    pub(crate) fn completion_delay(self, delay: Duration) -> Self {
        self.script.lock().completion_delay = Some(delay);
        self
    }

    pub(crate) fn tokens(self, tokens: &[&str]) -> Self {
        self.script.lock().tokens = tokens.iter().map(|t| t.to_string()).collect();
        self
    }

    pub(crate) fn stream_end(self, end: StreamEnd) -> Self {
        self.script.lock().stream_end = end;
        self
    }

    pub(crate) fn stream_start_error(self, error: ProviderError) -> Self {
        self.script.lock().stream_start_error = Some(error);
        self
    }

    pub(crate) fn completion_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.completion_calls.lock().clone()
    }

    pub(crate) fn stream_calls(&self) -> Vec<Vec<ChatMessage>> {
        self.stream_calls.lock().clone()
    }

    /// Number of classifier calls made for one check.
    pub(crate) fn guardrail_calls(&self, flag_field: &str) -> usize {
        let marker = format!("Primary flag: `{}`", flag_field);
        self.completion_calls
            .lock()
            .iter()
            .filter(|messages| messages.first().is_some_and(|m| m.content.contains(&marker)))
            .count()
    }

    fn answer(&self, system: &str) -> String {
        let mut script = self.script.lock();

        if let Some(flag) = primary_flag(system) {
            return script.verdicts.get(flag).cloned().unwrap_or_else(|| {
                serde_json::json!({
                    flag: false,
                    "is_developer_context": false,
                    "reasoning": "nothing found",
                })
                .to_string()
            });
        }

        if system.contains("\"route\"") {
            return script
                .routes
                .pop_front()
                .unwrap_or_else(|| r#"{"route": "direct"}"#.to_string());
        }

        String::new()
    }
}

fn primary_flag(system: &str) -> Option<&str> {
    let rest = system.split("Primary flag: `").nth(1)?;
    rest.split('`').next()
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        self.completion_calls.lock().push(messages.clone());

        let delay = self.script.lock().completion_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut script = self.script.lock();
            if script.completion_failures > 0 {
                script.completion_failures -= 1;
                script.completion_error.clone()
            } else {
                None
            }
        };
        if let Some(error) = failure {
            return Err(error);
        }

        let system = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
        Ok(CompletionResponse {
            content: self.answer(system),
            usage: TokenUsage::default(),
            model: "scripted".to_string(),
            stop_reason: Some("stop".to_string()),
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _config: &CompletionConfig,
    ) -> Result<TokenStream, ProviderError> {
        self.stream_calls.lock().push(messages);

        let script = self.script.lock();
        if let Some(error) = script.stream_start_error.clone() {
            return Err(error);
        }

        let tokens: Vec<Result<StreamEvent, ProviderError>> = script
            .tokens
            .iter()
            .map(|t| Ok(StreamEvent::TextDelta(t.clone())))
            .collect();
        let head = futures::stream::iter(tokens);

        let stream: TokenStream = match script.stream_end.clone() {
            StreamEnd::Complete => Box::pin(head.chain(futures::stream::iter(vec![Ok(StreamEvent::Completed)]))),
            StreamEnd::Fail(error) => Box::pin(head.chain(futures::stream::iter(vec![Err(error)]))),
            StreamEnd::Truncated => Box::pin(head),
            StreamEnd::Hang => Box::pin(head.chain(futures::stream::pending())),
        };
        Ok(stream)
    }

    async fn health_check(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// One call received by a [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SinkEvent {
    Message(NoticeKind, String),
    ClearThinking,
    Token(String),
    Finish,
    Abort(String),
}

#[derive(Default)]
pub(crate) struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub(crate) fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().clone()
    }

    pub(crate) fn tokens(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn messages(&self, kind: NoticeKind) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SinkEvent::Message(k, text) if k == kind => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, event: SinkEvent) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl ResponseSink for RecordingSink {
    async fn send_message(&self, kind: NoticeKind, text: &str) {
        self.record(SinkEvent::Message(kind, text.to_string()));
    }

    async fn clear_thinking(&self) {
        self.record(SinkEvent::ClearThinking);
    }

    async fn stream_token(&self, token: &str) {
        self.record(SinkEvent::Token(token.to_string()));
    }

    async fn finish(&self) {
        self.record(SinkEvent::Finish);
    }

    async fn abort(&self, reason: &str) {
        self.record(SinkEvent::Abort(reason.to_string()));
    }
}
