//! Ollama LLM Provider
//!
//! Local inference for self-hosted installs. Enabled with the `ollama` feature.

use async_trait::async_trait;
use ollama_rs::{
    Ollama,
    generation::{
        chat::{ChatMessage, ChatMessageResponse, MessageRole, request::ChatMessageRequest},
        options::GenerationOptions as OllamaOptions,
    },
};
use quill_core::{
    error::{QuillError, Result},
    provider::{
        Completion, CompletionRequest, FinishReason, LlmProvider, ModelInfo, ProviderInfo,
        TokenUsage,
    },
};

/// Ollama provider configuration
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    /// Ollama host URL
    pub host: String,

    /// Ollama port
    pub port: u16,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost".into(),
            port: 11434,
        }
    }
}

impl OllamaConfig {
    pub fn from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| "http://localhost".into());
        let port = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(11434);

        Self { host, port }
    }
}

/// Ollama LLM provider
pub struct OllamaProvider {
    client: Ollama,
}

impl OllamaProvider {
    pub fn from_config(config: &OllamaConfig) -> Self {
        Self {
            client: Ollama::new(&config.host, config.port),
        }
    }

    /// Create from environment variables
    pub fn from_env() -> Self {
        Self::from_config(&OllamaConfig::from_env())
    }

    fn convert_messages(request: &CompletionRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(ChatMessage::new(MessageRole::System, system.clone()));
        }
        messages.push(ChatMessage::new(MessageRole::User, request.prompt.clone()));
        messages
    }

    fn convert_completion(response: ChatMessageResponse, model: &str) -> Completion {
        Completion {
            content: response.message.content,
            model: model.to_string(),
            usage: response.final_data.as_ref().map(|d| {
                TokenUsage::new(
                    u32::try_from(d.prompt_eval_count.unwrap_or(0)).unwrap_or(u32::MAX),
                    u32::try_from(d.eval_count.unwrap_or(0)).unwrap_or(u32::MAX),
                )
            }),
            finish_reason: Some(FinishReason::Stop),
        }
    }

    fn build_options(request: &CompletionRequest) -> OllamaOptions {
        OllamaOptions::default()
            .temperature(request.temperature)
            .num_predict(i32::try_from(request.max_tokens).unwrap_or(i32::MAX))
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        let models = self.list_models().await.unwrap_or_default();
        Ok(ProviderInfo {
            name: "Ollama".into(),
            models,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        match self.client.list_local_models().await {
            Ok(_) => Ok(true),
            Err(e) => {
                tracing::warn!("Ollama health check failed: {}", e);
                Ok(false)
            }
        }
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let chat = ChatMessageRequest::new(request.model.clone(), Self::convert_messages(request))
            .options(Self::build_options(request));

        let response = self
            .client
            .send_chat_messages(chat)
            .await
            .map_err(|e| QuillError::provider(None, e.to_string()))?;

        Ok(Self::convert_completion(response, &request.model))
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let models = self
            .client
            .list_local_models()
            .await
            .map_err(|e| QuillError::ProviderUnavailable(e.to_string()))?;

        Ok(models.into_iter().map(|m| ModelInfo::named(m.name)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = OllamaConfig::default();
        assert_eq!(config.host, "http://localhost");
        assert_eq!(config.port, 11434);
    }

    #[test]
    fn test_system_prompt_becomes_first_message() {
        let request = CompletionRequest::new("llama3.2", 64, "Hello").with_system("Be brief.");
        assert_eq!(OllamaProvider::convert_messages(&request).len(), 2);

        let request = CompletionRequest::new("llama3.2", 64, "Hello");
        assert_eq!(OllamaProvider::convert_messages(&request).len(), 1);
    }
}
