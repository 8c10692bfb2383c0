//! Anthropic Messages API Provider
//!
//! Implementation of `LlmProvider` over the Anthropic HTTP API using reqwest.

use std::time::Duration;

use async_trait::async_trait;
use quill_core::{
    error::{QuillError, Result},
    provider::{
        Completion, CompletionRequest, FinishReason, LlmProvider, ModelInfo, ProviderInfo,
        TokenUsage,
    },
};
use serde::{Deserialize, Serialize};

const API_VERSION: &str = "2023-06-01";

/// Models offered to clients, newest first
pub const KNOWN_MODELS: &[&str] = &[
    "claude-sonnet-4-20250514",
    "claude-opus-4-20250514",
    "claude-3-7-sonnet-20250219",
    "claude-3-5-haiku-20241022",
    "claude-3-haiku-20240307",
];

/// Anthropic provider configuration
#[derive(Clone)]
pub struct AnthropicConfig {
    /// API key (sent as `x-api-key`)
    pub api_key: String,

    /// Base URL, overridable for proxies and tests
    pub base_url: String,

    /// Request timeout
    pub timeout_secs: u64,
}

impl std::fmt::Debug for AnthropicConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicConfig")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl AnthropicConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://api.anthropic.com".into(),
            timeout_secs: 60,
        }
    }

    /// Read `ANTHROPIC_API_KEY` (required), `ANTHROPIC_BASE_URL` and
    /// `QUILL_PROVIDER_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| QuillError::Config("ANTHROPIC_API_KEY not set".into()))?;

        let mut config = Self::new(api_key);
        if let Ok(base_url) = std::env::var("ANTHROPIC_BASE_URL") {
            config.base_url = base_url;
        }
        if let Some(secs) = std::env::var("QUILL_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.timeout_secs = secs;
        }
        Ok(config)
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    model: String,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Anthropic LLM provider
pub struct AnthropicProvider {
    client: reqwest::Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn from_config(config: AnthropicConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| QuillError::Config(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_config(AnthropicConfig::from_env()?)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }

    fn convert_completion(response: MessagesResponse) -> Completion {
        let content = response
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        Completion {
            content,
            model: response.model,
            usage: response
                .usage
                .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens)),
            finish_reason: response.stop_reason.as_deref().map(|reason| match reason {
                "max_tokens" => FinishReason::Length,
                "refusal" => FinishReason::ContentFilter,
                _ => FinishReason::Stop,
            }),
        }
    }

    /// Pull the human-readable message out of an error body
    fn error_message(body: &str) -> String {
        serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| e.error.message)
            .unwrap_or_else(|_| body.chars().take(500).collect())
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Anthropic".into(),
            models: self.list_models().await?,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        // Any HTTP answer (even 401/404) proves the API is reachable
        let url = format!("{}/v1/models", self.config.base_url.trim_end_matches('/'));
        match self
            .client
            .get(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
        {
            Ok(response) => Ok(!response.status().is_server_error()),
            Err(e) => {
                tracing::warn!("Anthropic health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let body = MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: request.system.as_deref(),
            temperature: request.temperature,
            messages: vec![WireMessage {
                role: "user",
                content: &request.prompt,
            }],
        };

        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    QuillError::Timeout(self.config.timeout_secs)
                } else {
                    QuillError::ProviderUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(QuillError::provider(
                Some(status.as_u16()),
                Self::error_message(&text),
            ));
        }

        let parsed: MessagesResponse = response
            .json()
            .await
            .map_err(|e| QuillError::provider(Some(status.as_u16()), e.to_string()))?;

        Ok(Self::convert_completion(parsed))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(KNOWN_MODELS.iter().map(|m| ModelInfo::named(*m)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_debug_redacts_key() {
        let config = AnthropicConfig::new("sk-ant-secret");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("sk-ant-secret"));
        assert!(rendered.contains("api.anthropic.com"));
    }

    #[test]
    fn test_request_serialization() {
        let body = MessagesRequest {
            model: "claude-3-5-haiku-20241022",
            max_tokens: 10,
            system: None,
            temperature: 0.5,
            messages: vec![WireMessage { role: "user", content: "Say hello" }],
        };
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["max_tokens"], 10);
        assert!(json.get("system").is_none());
        assert_eq!(json["messages"][0]["role"], "user");
    }

    #[test]
    fn test_convert_completion_joins_text_blocks() {
        let response: MessagesResponse = serde_json::from_str(
            r#"{
                "model": "claude-3-5-haiku-20241022",
                "content": [
                    {"type": "text", "text": "Hello"},
                    {"type": "text", "text": ", world"}
                ],
                "stop_reason": "max_tokens",
                "usage": {"input_tokens": 5, "output_tokens": 3}
            }"#,
        )
        .unwrap();

        let completion = AnthropicProvider::convert_completion(response);
        assert_eq!(completion.content, "Hello, world");
        assert_eq!(completion.finish_reason, Some(FinishReason::Length));
        assert_eq!(completion.usage.unwrap().total_tokens, 8);
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"type":"error","error":{"type":"not_found_error","message":"model: claude-9"}}"#;
        assert_eq!(AnthropicProvider::error_message(body), "model: claude-9");
        assert_eq!(AnthropicProvider::error_message("plain failure"), "plain failure");
    }
}
