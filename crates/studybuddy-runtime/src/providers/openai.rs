//! OpenAI-compatible chat-completions provider.
//!
//! Works against any backend exposing `POST {base_url}/chat/completions`
//! (OpenAI, Gemini's OpenAI endpoint, local gateways). Streaming uses
//! server-sent events terminated by `data: [DONE]`.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::{
    secrets::{ApiCredential, CredentialSource},
    ChatMessage, CompletionConfig, CompletionResponse, LlmProvider, ProviderError, StreamEvent,
    TokenStream, TokenUsage,
};

/// Provider for OpenAI-compatible endpoints.
pub struct OpenAiCompatProvider {
    credential: ApiCredential,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiCompatProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiCompatProvider")
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl OpenAiCompatProvider {
    /// Create a provider from an already-secured credential.
    pub fn new(credential: ApiCredential, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ProviderError::NotConfigured(
                "base_url must start with http:// or https://".to_string(),
            ));
        }

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Convenience constructor taking a plain key.
    pub fn with_api_key(api_key: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        Self::new(
            ApiCredential::new(api_key, CredentialSource::Programmatic, "StudyBuddy API key"),
            base_url,
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        config: &CompletionConfig,
        stream: bool,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ProviderError> {
        let request = ChatRequest {
            model: &config.model,
            messages,
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            stream,
        };

        let mut builder = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.credential.expose())
            .json(&request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(config.timeout)
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        check_status(response).await
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: String,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        429 => {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            Err(ProviderError::RateLimited { retry_after })
        }
        401 | 403 => Err(ProviderError::AuthError),
        code => {
            let body = response.text().await.unwrap_or_default();
            Err(ProviderError::ApiError {
                status: code,
                message: error_message(&body),
            })
        }
    }
}

/// Pull `error.message` out of an error body, or return the body as-is.
fn error_message(body: &str) -> String {
    serde_json::from_str::<JsonValue>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.to_string())
}

/// Interpret one SSE `data:` payload.
fn parse_chunk(data: &str) -> Result<Option<StreamEvent>, ProviderError> {
    if data.trim() == "[DONE]" {
        return Ok(Some(StreamEvent::Completed));
    }

    let chunk: JsonValue = serde_json::from_str(data).map_err(|e| ProviderError::ParseError(e.to_string()))?;

    if let Some(message) = chunk["error"]["message"].as_str() {
        return Err(ProviderError::StreamError(message.to_string()));
    }

    Ok(chunk["choices"][0]["delta"]["content"]
        .as_str()
        .filter(|content| !content.is_empty())
        .map(|content| StreamEvent::TextDelta(content.to_string())))
}

#[async_trait]
impl LlmProvider for OpenAiCompatProvider {
    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<CompletionResponse, ProviderError> {
        let response = self.send(&messages, config, false, Some(config.timeout)).await?;

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".to_string()))?;

        let usage = body.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        });

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model,
            stop_reason: choice.finish_reason,
        })
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        config: &CompletionConfig,
    ) -> Result<TokenStream, ProviderError> {
        // No whole-request timeout here: the relay bounds each read instead.
        let response = self.send(&messages, config, true, None).await?;

        let events = response.bytes_stream().eventsource().filter_map(|event| async move {
            match event {
                Ok(event) => parse_chunk(&event.data).transpose(),
                Err(e) => Some(Err(ProviderError::StreamError(e.to_string()))),
            }
        });

        Ok(Box::pin(events))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }

    fn name(&self) -> &str {
        "openai-compatible"
    }
}
