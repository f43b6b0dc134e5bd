pub mod decision;
pub mod ladder;

pub use decision::{parse_action, AgentAction, DecisionError};
pub use ladder::{LadderVerdict, ModelLadder};

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ApiSection;

pub type LlmResult<T> = Result<T, LlmError>;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("api key env var {0} is not set")]
    MissingKey(String),
    #[error("model api returned {status}: {body}")]
    Api { status: u16, body: String },
    #[error("model api rate limited the request")]
    RateLimited,
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

impl LlmError {
    /// Rate limits are the one transport failure the batch runner treats
    /// differently from every other error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited)
    }
}

/// One completion request. `image_png` rides along as a data URL when the
/// prompt needs the current screenshot.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub system: Option<String>,
    pub text: String,
    pub image_png: Option<Vec<u8>>,
    pub max_tokens: Option<u32>,
}

/// Seam between the agent loops and the completion API, so tests can drive
/// the loops with scripted models.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> LlmResult<String>;
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: serde_json::Value,
}

#[derive(Deserialize)]
struct ChatCompletion {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<i64>,
}

/// OpenRouter-compatible chat completions client. All tiers and the scorer
/// go through the same endpoint; only the model string differs.
pub struct OpenRouterClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenRouterClient {
    pub fn from_config(api: &ApiSection) -> LlmResult<Self> {
        let api_key = std::env::var(&api.key_env)
            .map_err(|_| LlmError::MissingKey(api.key_env.clone()))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(api.timeout_seconds))
            .build()?;
        Ok(Self {
            client,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn build_messages(request: &ChatRequest) -> Vec<ApiMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ApiMessage {
                role: "system",
                content: serde_json::Value::String(system.clone()),
            });
        }
        let user_content = match &request.image_png {
            Some(png) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(png);
                serde_json::json!([
                    {"type": "text", "text": request.text},
                    {
                        "type": "image_url",
                        "image_url": {"url": format!("data:image/png;base64,{encoded}")}
                    }
                ])
            }
            None => serde_json::Value::String(request.text.clone()),
        };
        messages.push(ApiMessage {
            role: "user",
            content: user_content,
        });
        messages
    }
}

#[async_trait]
impl ModelClient for OpenRouterClient {
    async fn complete(&self, request: ChatRequest) -> LlmResult<String> {
        let payload = serde_json::json!({
            "model": request.model,
            "messages": Self::build_messages(&request),
            "max_tokens": request.max_tokens,
        });
        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if status.as_u16() == 429 {
            return Err(LlmError::RateLimited);
        }
        let body = response.text().await?;
        if !status.is_success() {
            if body.to_ascii_lowercase().contains("rate limit") {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: clip(&body, 300),
            });
        }
        let completion: ChatCompletion = serde_json::from_str(&body)?;
        if let Some(error) = completion.error {
            if error.code == Some(429) || error.message.to_ascii_lowercase().contains("rate limit")
            {
                return Err(LlmError::RateLimited);
            }
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: clip(&error.message, 300),
            });
        }
        completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(LlmError::EmptyCompletion)
    }
}

/// Fixed wait schedule for rate-limited calls. Once the schedule runs out the
/// caller aborts the batch instead of hammering the endpoint.
#[derive(Debug, Clone)]
pub struct RateLimitBackoff {
    waits: Vec<Duration>,
    used: usize,
}

impl RateLimitBackoff {
    pub fn new(waits_seconds: &[u64]) -> Self {
        let waits = if waits_seconds.is_empty() {
            vec![
                Duration::from_secs(30),
                Duration::from_secs(60),
                Duration::from_secs(90),
            ]
        } else {
            waits_seconds.iter().map(|s| Duration::from_secs(*s)).collect()
        };
        Self { waits, used: 0 }
    }

    /// Next wait in the schedule, or `None` once it is exhausted.
    pub fn next_wait(&mut self) -> Option<Duration> {
        let wait = self.waits.get(self.used).copied();
        if wait.is_some() {
            self.used += 1;
        }
        wait
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_yields_schedule_then_exhausts() {
        let mut backoff = RateLimitBackoff::new(&[30, 60, 90]);
        assert_eq!(backoff.next_wait(), Some(Duration::from_secs(30)));
        assert_eq!(backoff.next_wait(), Some(Duration::from_secs(60)));
        assert_eq!(backoff.next_wait(), Some(Duration::from_secs(90)));
        assert_eq!(backoff.next_wait(), None);
        backoff.reset();
        assert_eq!(backoff.next_wait(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn image_requests_carry_data_url() {
        let request = ChatRequest {
            model: "test/model".into(),
            system: Some("sys".into()),
            text: "what do you see".into(),
            image_png: Some(vec![1, 2, 3]),
            max_tokens: Some(64),
        };
        let messages = OpenRouterClient::build_messages(&request);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        let rendered = serde_json::to_string(&messages[1].content).unwrap();
        assert!(rendered.contains("data:image/png;base64,"));
        assert!(rendered.contains("what do you see"));
    }
}
