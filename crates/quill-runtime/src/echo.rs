//! Echo Provider
//!
//! Offline stand-in used when no provider key is configured. It answers every
//! prompt without leaving the process, which keeps the admission and metering
//! path exercisable on a laptop.

use async_trait::async_trait;
use quill_core::{
    error::Result,
    provider::{
        Completion, CompletionRequest, FinishReason, LlmProvider, ModelInfo, ProviderInfo,
        TokenUsage,
    },
};

/// Provider that echoes the prompt back
#[derive(Clone, Debug, Default)]
pub struct EchoProvider;

impl EchoProvider {
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl LlmProvider for EchoProvider {
    async fn info(&self) -> Result<ProviderInfo> {
        Ok(ProviderInfo {
            name: "Echo".into(),
            models: self.list_models().await?,
        })
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        let content = format!("You asked me to complete: {}", request.prompt);
        let prompt_tokens = self.estimate_tokens(&request.prompt);
        let completion_tokens = self.estimate_tokens(&content);

        Ok(Completion {
            content,
            model: request.model.clone(),
            usage: Some(TokenUsage::new(prompt_tokens, completion_tokens)),
            finish_reason: Some(FinishReason::Stop),
        })
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo::named("echo")])
    }
}
