//! Quill API Server
//!
//! Axum server for the Quill writing assistant: authentication, credit
//! metering, LLM completions and Stripe payments.

mod admission;
mod config;
mod error;
mod handlers;
mod routes;
mod state;

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quill_billing::{Billing, BillingConfig, CredentialCodec, SeedData, StripeClient};
use quill_core::{AssistantConfig, LlmProvider, ToolRegistry, WritingAssistant};
use quill_runtime::{AnthropicConfig, AnthropicProvider, EchoProvider};

use crate::config::{ProviderKind, ServerConfig};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment
    dotenvy::dotenv().ok();
    let config = ServerConfig::from_env()?;
    tracing::debug!(?config, "Loaded configuration");

    // Initialize LLM provider
    let provider = build_provider(&config)?;
    match provider.health_check().await {
        Ok(true) => tracing::info!(provider = config.provider.as_str(), "✓ Provider reachable"),
        Ok(false) | Err(_) => {
            tracing::warn!(provider = config.provider.as_str(), "⚠ Provider not reachable - completions will fail");
        }
    }

    let tools = ToolRegistry::with_builtins();
    tracing::info!("Registered {} tools: {}", tools.len(), tools.names().join(", "));

    let assistant = WritingAssistant::new(
        provider,
        Arc::new(tools),
        AssistantConfig {
            default_model: config.default_model.clone(),
            allowed_models: config.allowed_models.clone(),
            timeout: config.provider_timeout,
            ..Default::default()
        },
    );

    // Initialize billing
    let ttl = chrono::Duration::days(config.token_ttl_days);
    let codec = match &config.token_secret {
        Some(secret) => CredentialCodec::new(secret.as_bytes().to_vec(), ttl)?,
        None => CredentialCodec::random(ttl)?,
    };
    tracing::info!(ttl_days = codec.ttl().num_days(), "Credential codec ready");
    let billing = Billing::in_memory(
        codec,
        BillingConfig {
            signup_credits: config.signup_credits,
            desktop_trial_credits: config.desktop_trial_credits,
        },
    );
    if config.seed_demo {
        billing.seed(&SeedData::demo()).context("seeding demo data")?;
    }

    // Initialize payments
    let stripe = StripeClient::from_env().ok();
    if stripe.is_some() {
        tracing::info!("✓ Stripe configured");
    } else {
        tracing::warn!("⚠ Stripe not configured - payments disabled");
        tracing::warn!("  Set STRIPE_SECRET_KEY and STRIPE_WEBHOOK_SECRET in .env");
    }

    let addr = config.bind_addr.clone();
    let app = routes::router(AppState::new(assistant, billing, stripe, config));

    // Start server
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("🚀 Quill API running on http://{}", addr);
    tracing::info!("══════════════════════════════════════════════════");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health                - Health check");
    tracing::info!("  GET  /api/tools             - List writing tools");
    tracing::info!("  POST /api/auth/register     - Password registration");
    tracing::info!("  POST /api/auth/login        - Password login");
    tracing::info!("  POST /api/auth/desktop      - Desktop auto-auth");
    tracing::info!("  POST /api/license/activate  - Activate license key");
    tracing::info!("  POST /api/ai/complete       - Run a writing tool");
    tracing::info!("  GET  /api/account           - Balance and tier");
    tracing::info!("  POST /api/checkout          - Create Stripe checkout");
    tracing::info!("  POST /webhook/stripe        - Stripe events");

    axum::serve(listener, app).await?;

    Ok(())
}

fn build_provider(config: &ServerConfig) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let provider: Arc<dyn LlmProvider> = match config.provider {
        ProviderKind::Anthropic => {
            let mut anthropic = AnthropicConfig::from_env()?;
            anthropic.timeout_secs = config.provider_timeout.as_secs();
            Arc::new(AnthropicProvider::from_config(anthropic)?)
        }
        ProviderKind::Echo => {
            tracing::warn!("Using the echo provider; responses are not generated by a model");
            Arc::new(EchoProvider::new())
        }
        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => Arc::new(quill_runtime::OllamaProvider::from_env()),
        #[cfg(not(feature = "ollama"))]
        ProviderKind::Ollama => anyhow::bail!("QUILL_PROVIDER=ollama requires the `ollama` feature"),
    };
    Ok(provider)
}
