//! Writing Assistant
//!
//! Turns a [`ToolRequest`] into a provider call: validate, render the tool's
//! template, then run a single completion bounded by a timeout.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{QuillError, Result};
use crate::provider::{Completion, CompletionRequest, LlmProvider};
use crate::tool::{ToolRegistry, ToolRequest};

/// Assistant configuration
#[derive(Clone, Debug)]
pub struct AssistantConfig {
    /// Model used when the request names none
    pub default_model: String,

    /// Upper bound on a single provider call
    pub timeout: Duration,

    /// Models clients may select; empty allows any
    pub allowed_models: Vec<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.into(),
            timeout: Duration::from_secs(60),
            allowed_models: Vec::new(),
        }
    }
}

/// Default completion model
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-20241022";

/// The writing assistant
#[derive(Clone)]
pub struct WritingAssistant {
    provider: Arc<dyn LlmProvider>,
    tools: Arc<ToolRegistry>,
    config: AssistantConfig,
}

impl WritingAssistant {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        tools: Arc<ToolRegistry>,
        config: AssistantConfig,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
        }
    }

    /// Create with default configuration and the built-in tools
    pub fn with_defaults(provider: Arc<dyn LlmProvider>) -> Self {
        Self::new(
            provider,
            Arc::new(ToolRegistry::with_builtins()),
            AssistantConfig::default(),
        )
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn config(&self) -> &AssistantConfig {
        &self.config
    }

    /// Validate a tool request and build the provider request.
    ///
    /// Never touches the provider, so it is safe to run before credits are
    /// checked.
    pub fn prepare(&self, request: &ToolRequest) -> Result<CompletionRequest> {
        let rendered = self.tools.prepare(request)?;

        let model = request
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.config.default_model.clone());

        if !self.config.allowed_models.is_empty() && !self.config.allowed_models.contains(&model) {
            return Err(QuillError::ToolValidation(format!("model '{model}' is not available")));
        }

        Ok(CompletionRequest::new(model, rendered.max_tokens, rendered.prompt)
            .with_system(rendered.system))
    }

    /// Run one provider call under the configured timeout
    pub async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        tracing::debug!(model = %request.model, max_tokens = request.max_tokens, "Calling provider");

        match tokio::time::timeout(self.config.timeout, self.provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(QuillError::Timeout(self.config.timeout.as_secs())),
        }
    }

    /// Prepare and complete in one step
    pub async fn run(&self, request: &ToolRequest) -> Result<Completion> {
        let prepared = self.prepare(request)?;
        self.complete(&prepared).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ModelInfo, ProviderInfo};
    use async_trait::async_trait;

    struct UppercaseProvider;

    #[async_trait]
    impl LlmProvider for UppercaseProvider {
        async fn info(&self) -> Result<ProviderInfo> {
            Ok(ProviderInfo { name: "upper".into(), models: vec![] })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(true)
        }

        async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
            Ok(Completion {
                content: request.prompt.to_uppercase(),
                model: request.model.clone(),
                usage: None,
                finish_reason: None,
            })
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    struct StalledProvider;

    #[async_trait]
    impl LlmProvider for StalledProvider {
        async fn info(&self) -> Result<ProviderInfo> {
            Ok(ProviderInfo { name: "stalled".into(), models: vec![] })
        }

        async fn health_check(&self) -> Result<bool> {
            Ok(false)
        }

        async fn complete(&self, _request: &CompletionRequest) -> Result<Completion> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(QuillError::Other("unreachable".into()))
        }

        async fn list_models(&self) -> Result<Vec<ModelInfo>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_run_uses_default_model() {
        let assistant = WritingAssistant::with_defaults(Arc::new(UppercaseProvider));
        let completion = assistant
            .run(&ToolRequest::new("grammar", "teh cat"))
            .await
            .unwrap();

        assert_eq!(completion.model, DEFAULT_MODEL);
        assert!(completion.content.ends_with("TEH CAT"));
    }

    #[tokio::test]
    async fn test_disallowed_model_rejected() {
        let config = AssistantConfig {
            allowed_models: vec![DEFAULT_MODEL.into()],
            ..Default::default()
        };
        let assistant = WritingAssistant::new(
            Arc::new(UppercaseProvider),
            Arc::new(ToolRegistry::with_builtins()),
            config,
        );

        let mut request = ToolRequest::new("rewrite", "hello");
        request.model = Some("gpt-5".into());
        assert!(matches!(
            assistant.prepare(&request),
            Err(QuillError::ToolValidation(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_bounds_provider_call() {
        let config = AssistantConfig {
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let assistant = WritingAssistant::new(
            Arc::new(StalledProvider),
            Arc::new(ToolRegistry::with_builtins()),
            config,
        );

        let err = assistant
            .run(&ToolRequest::new("summarize", "text"))
            .await
            .unwrap_err();
        assert!(matches!(err, QuillError::Timeout(_)));
    }
}
