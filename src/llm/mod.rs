//! Chat-completions backend, retry policy and the cached client the stages use.

pub mod cache;
pub mod client;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{CacheEntry, RequestKind, ResponseCache};
pub use client::LlmClient;
pub use retry::RetryPolicy;

use crate::config::LlmConfig;
use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One request to the model: a system and a user message
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    /// Ask the API for a JSON object answer
    pub json_mode: bool,
}

impl ChatRequest {
    pub fn json(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.1,
            json_mode: true,
        }
    }

    pub fn text(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            temperature: 0.2,
            json_mode: false,
        }
    }

    /// Exact text identifying this request in the response cache
    pub fn cache_prompt(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

/// Token accounting as reported by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub content: String,
    pub usage: Option<Usage>,
}

/// A single chat-completion round trip, without retries
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError>;
}

#[derive(Serialize)]
struct ApiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ApiResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: Vec<ApiMessage<'a>>,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ApiResponseFormat>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiChoiceMessage,
}

#[derive(Deserialize)]
struct ApiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// OpenAI-compatible chat-completions endpoint
pub struct OpenAiChat {
    http: reqwest::Client,
    api_url: String,
    model: String,
    api_key: String,
    timeout_secs: u64,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or(LlmError::MissingApiKey)?;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            model: config.model.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChat {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let body = ApiRequest {
            model: &self.model,
            messages: vec![
                ApiMessage {
                    role: "system",
                    content: &request.system,
                },
                ApiMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            response_format: request.json_mode.then_some(ApiResponseFormat {
                kind: "json_object",
            }),
        };

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout_secs)
                } else {
                    LlmError::from(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let text = response.text().await.unwrap_or_default();
            if status.as_u16() == 429 {
                return Err(LlmError::RateLimited {
                    retry_after: rate_limit_wait(&headers, &text),
                });
            }
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let parsed: ApiResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .filter(|content| !content.is_empty())
            .ok_or(LlmError::EmptyResponse)?;

        Ok(ChatResponse {
            content,
            usage: parsed.usage,
        })
    }
}

/// Wait requested by a 429 answer: reset headers first, then the
/// "Please try again in 1.5s" hint in the body
pub fn rate_limit_wait(headers: &HeaderMap, body: &str) -> Option<Duration> {
    for key in [
        "retry-after",
        "x-ratelimit-reset-requests",
        "x-ratelimit-reset-tokens",
    ] {
        if let Some(value) = headers.get(key).and_then(|v| v.to_str().ok()) {
            if let Some(wait) = parse_seconds(value) {
                return Some(wait);
            }
        }
    }

    const HINT: &str = "Please try again in";
    let pos = body.find(HINT)?;
    let number: String = body[pos + HINT.len()..]
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    parse_seconds(&number)
}

/// "2", "1.686s" or "750ms"
fn parse_seconds(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Some(ms) = value.strip_suffix("ms") {
        return ms.trim().parse::<u64>().ok().map(Duration::from_millis);
    }
    let secs = value.trim_end_matches('s').trim();
    if secs.is_empty() {
        return None;
    }
    secs.parse::<f64>()
        .ok()
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(Duration::from_secs_f64)
}
