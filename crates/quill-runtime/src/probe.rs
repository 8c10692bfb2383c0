//! Model Access Probe
//!
//! Sends a tiny request to each candidate model and reports which ones the
//! configured account can actually use.

use std::time::Duration;

use futures::future::join_all;
use quill_core::provider::{CompletionRequest, LlmProvider};
use serde::Serialize;

const PROBE_PROMPT: &str = "Say hello";
const PROBE_MAX_TOKENS: u32 = 10;

/// Outcome for one model
#[derive(Clone, Debug, Serialize)]
pub struct ProbeResult {
    pub model: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Summary over all probed models
#[derive(Clone, Debug, Serialize)]
pub struct ProbeReport {
    pub results: Vec<ProbeResult>,
}

impl ProbeReport {
    pub fn available(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| r.available)
            .map(|r| r.model.as_str())
            .collect()
    }
}

/// Probe `models` concurrently, each bounded by `timeout`
pub async fn probe_models(
    provider: &dyn LlmProvider,
    models: &[String],
    timeout: Duration,
) -> ProbeReport {
    let probes = models.iter().map(|model| async move {
        let request = CompletionRequest::new(model.clone(), PROBE_MAX_TOKENS, PROBE_PROMPT);

        let outcome = match tokio::time::timeout(timeout, provider.complete(&request)).await {
            Ok(Ok(completion)) if !completion.content.is_empty() => Ok(()),
            Ok(Ok(_)) => Err("empty response".to_string()),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!("timed out after {}s", timeout.as_secs())),
        };

        match outcome {
            Ok(()) => {
                tracing::info!(model = %model, "Model probe succeeded");
                ProbeResult { model: model.clone(), available: true, error: None }
            }
            Err(error) => {
                tracing::info!(model = %model, error = %error, "Model probe failed");
                ProbeResult { model: model.clone(), available: false, error: Some(error) }
            }
        }
    });

    ProbeReport {
        results: join_all(probes).await,
    }
}
