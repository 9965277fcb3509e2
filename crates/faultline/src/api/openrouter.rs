//! OpenRouter-backed [`Reasoner`].
//!
//! A thin async client for the OpenRouter chat completions API plus the
//! adapter that exposes it as the engine's reasoning capability. Structured
//! generation asks the model for a JSON object, embeds the target schema in
//! the system prompt and leaves validation to
//! [`generate_typed`](super::reasoning::generate_typed).

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use super::ids::UsageTracker;
use super::reasoning::{Reasoner, ReasoningError, ReasoningFuture, extract_json_object};
use super::retry::RetryConfig;

// ── Constants ──────────────────────────────────────────────────────

pub const OPENROUTER_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Default model for reasoning calls.
pub const DEFAULT_MODEL: &str = "z-ai/glm-5";

const STRUCTURED_SYSTEM_PROMPT: &str = "You are assisting a technical incident investigation. \
Respond with a single JSON object and nothing else. The object must conform to this JSON Schema:";

const TEXT_SYSTEM_PROMPT: &str = "You are assisting a technical incident investigation. \
Be terse and factual. Never invent evidence that was not given to you.";

// ── Wire types ─────────────────────────────────────────────────────

/// Role of a message in the conversation.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }
}

/// JSON output format type.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum ResponseFormatType {
    #[serde(rename = "json_object")]
    JsonObject,
}

#[derive(Serialize, Debug)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub fmt_type: ResponseFormatType,
}

/// Chat completion request body. Only the fields the engine uses.
#[derive(Serialize, Debug, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "is_zero_u32")]
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_format: Option<ResponseFormat>,
}

fn is_zero_u32(v: &u32) -> bool {
    *v == 0
}

#[derive(Deserialize, Debug)]
struct RawChatResponse {
    choices: Option<Vec<RawChoice>>,
    error: Option<ApiErrorResponse>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize, Debug)]
struct RawChoice {
    message: RawResponseMessage,
}

#[derive(Deserialize, Debug)]
struct RawResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize, Debug)]
struct ApiErrorResponse {
    message: String,
}

/// Token usage statistics.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct UsageInfo {
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

/// Clean return type from [`OpenRouterClient::chat`].
#[derive(Debug)]
pub struct ChatCompletion {
    pub content: Option<String>,
    pub usage: Option<UsageInfo>,
}

// ── Client ─────────────────────────────────────────────────────────

/// Async HTTP client for the OpenRouter chat completions API.
pub struct OpenRouterClient {
    client: reqwest::Client,
    api_key: String,
    referer: String,
    title: String,
}

impl OpenRouterClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, String> {
        Self::with_headers(api_key, "https://github.com/faultline", "faultline")
    }

    /// Create a client with custom Referer and X-Title headers.
    pub fn with_headers(
        api_key: impl Into<String>,
        referer: impl Into<String>,
        title: impl Into<String>,
    ) -> Result<Self, String> {
        let client = reqwest::Client::builder()
            .user_agent("faultline/0.1")
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| format!("failed to build HTTP client: {e}"))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            referer: referer.into(),
            title: title.into(),
        })
    }

    /// Send a chat completion request.
    pub async fn chat(&self, body: &ChatRequest) -> Result<ChatCompletion, String> {
        debug!(
            "LLM request: model={}, messages={}, max_tokens={}, temp={}",
            body.model,
            body.messages.len(),
            body.max_tokens,
            body.temperature,
        );
        trace!(
            "Request payload size: {} bytes",
            serde_json::to_string(body).map_or(0, |s| s.len())
        );

        let start = Instant::now();
        let resp = self
            .client
            .post(OPENROUTER_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .json(body)
            .send()
            .await
            .map_err(|e| format!("request failed: {e}"))?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;
        debug!(
            "LLM response: HTTP {} in {:.1}s ({} bytes)",
            status,
            start.elapsed().as_secs_f64(),
            text.len()
        );

        if !status.is_success() {
            return Err(format!("OpenRouter API HTTP {status}: {text}"));
        }

        let parsed: RawChatResponse =
            serde_json::from_str(&text).map_err(|e| format!("failed to parse response: {e}"))?;
        if let Some(err) = parsed.error {
            return Err(format!("OpenRouter API error: {}", err.message));
        }

        let content = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .and_then(|c| c.message.content);
        Ok(ChatCompletion {
            content,
            usage: parsed.usage,
        })
    }
}

// ── Reasoner adapter ───────────────────────────────────────────────

/// [`Reasoner`] backed by an [`OpenRouterClient`].
pub struct OpenRouterReasoner {
    client: OpenRouterClient,
    model: String,
    max_tokens: u32,
    temperature: f32,
    retry: RetryConfig,
    usage: Arc<UsageTracker>,
}

impl OpenRouterReasoner {
    pub fn new(client: OpenRouterClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
            max_tokens: 1024,
            temperature: 0.2,
            retry: RetryConfig::default(),
            usage: Arc::new(UsageTracker::new()),
        }
    }

    /// Build from the `OPENROUTER_KEY` environment variable.
    pub fn from_env(model: impl Into<String>) -> Result<Self, String> {
        let api_key =
            std::env::var("OPENROUTER_KEY").map_err(|_| "OPENROUTER_KEY not set".to_string())?;
        Ok(Self::new(OpenRouterClient::new(api_key)?, model))
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_usage(mut self, usage: Arc<UsageTracker>) -> Self {
        self.usage = usage;
        self
    }

    pub fn usage(&self) -> &UsageTracker {
        &self.usage
    }

    async fn complete(&self, body: ChatRequest) -> Result<String, ReasoningError> {
        let mut attempt = 0;
        loop {
            match self.client.chat(&body).await {
                Ok(completion) => {
                    let usage = completion.usage.unwrap_or_default();
                    self.usage.record(
                        usage.prompt_tokens.unwrap_or(0),
                        usage.completion_tokens.unwrap_or(0),
                    );
                    return completion
                        .content
                        .filter(|c| !c.trim().is_empty())
                        .ok_or_else(|| ReasoningError::InvalidOutput("empty completion".into()));
                }
                Err(e) if self.retry.should_retry(attempt, &e) => {
                    let delay = self.retry.delay_for_attempt(attempt);
                    warn!("[reasoning] transient failure ({e}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    self.usage.record_failure();
                    return Err(ReasoningError::Unavailable(e));
                }
            }
        }
    }
}

impl Reasoner for OpenRouterReasoner {
    fn name(&self) -> &str {
        &self.model
    }

    fn generate_text<'a>(
        &'a self,
        prompt: &'a str,
        timeout: Duration,
    ) -> ReasoningFuture<'a, String> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(TEXT_SYSTEM_PROMPT), Message::user(prompt)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: None,
        };
        Box::pin(super::reasoning::within(timeout, self.complete(body)))
    }

    fn generate_structured<'a>(
        &'a self,
        prompt: &'a str,
        schema: &'a serde_json::Value,
        timeout: Duration,
    ) -> ReasoningFuture<'a, serde_json::Value> {
        let system = format!("{STRUCTURED_SYSTEM_PROMPT}\n{schema}");
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![Message::system(system), Message::user(prompt)],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            response_format: Some(ResponseFormat {
                fmt_type: ResponseFormatType::JsonObject,
            }),
        };
        Box::pin(async move {
            let text = super::reasoning::within(timeout, self.complete(body)).await?;
            extract_json_object(&text)
                .ok_or_else(|| ReasoningError::InvalidOutput("no JSON object in reply".into()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_unset_fields() {
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![Message::user("hi")],
            temperature: 0.2,
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("max_tokens").is_none());
        assert!(json.get("response_format").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn structured_request_asks_for_json_object() {
        let req = ChatRequest {
            model: "m".into(),
            response_format: Some(ResponseFormat {
                fmt_type: ResponseFormatType::JsonObject,
            }),
            ..Default::default()
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["response_format"]["type"], "json_object");
    }

    #[test]
    fn reasoner_builder() {
        let client = OpenRouterClient::new("key").unwrap();
        let reasoner = OpenRouterReasoner::new(client, "test/model")
            .with_max_tokens(256)
            .with_retry(RetryConfig::none());
        assert_eq!(reasoner.name(), "test/model");
        assert_eq!(reasoner.usage().calls(), 0);
    }
}
