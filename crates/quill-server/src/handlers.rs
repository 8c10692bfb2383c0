//! HTTP Handlers

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use quill_billing::{
    Account, AuthGrant, Balance, CheckoutRequest, CheckoutSession, License, LicenseGrant,
    ReconcileOutcome, Tier,
};
use quill_core::{ToolRequest, ToolSchema, provider::TokenUsage};
use quill_runtime::{ProbeReport, probe_models};

use crate::error::ApiError;
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub provider: &'static str,
    pub provider_connected: bool,
    pub stripe_configured: bool,
}

#[derive(Serialize)]
pub struct ToolsResponse {
    pub tools: Vec<ToolSchema>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub request_id: String,
    pub tool: String,
    pub content: String,
    pub model: String,
    pub credits_remaining: Balance,
    pub tier: Tier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
pub struct PasswordAuthRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct DesktopAuthRequest {
    pub machine_id: String,
}

#[derive(Debug, Deserialize)]
pub struct ActivateLicenseRequest {
    pub license_key: String,
    pub machine_id: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateLicenseRequest {
    pub tier: Tier,
    /// Defaults to the tier's monthly allotment
    #[serde(default)]
    pub credits: Option<Balance>,
}

/// `Authorization: Bearer <token>`
fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn admin_token_matches(expected: &str, given: &str) -> bool {
    bool::from(expected.as_bytes().ct_eq(given.as_bytes()))
}

fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    match (state.config.admin_token.as_deref(), bearer(headers)) {
        (Some(expected), Some(given)) if admin_token_matches(expected, given) => Ok(()),
        _ => Err(ApiError::unauthorized("Admin token required")),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider_connected = state.assistant.provider().health_check().await.unwrap_or(false);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        provider: state.config.provider.as_str(),
        provider_connected,
        stripe_configured: state.stripe.is_some(),
    })
}

/// Writing tools and their token budgets
pub async fn list_tools(State(state): State<AppState>) -> Json<ToolsResponse> {
    Json(ToolsResponse {
        tools: state.assistant.tools().schemas(),
    })
}

/// Run a writing tool: authenticate, meter, call the provider, settle
pub async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<ToolRequest>,
) -> Result<Json<CompleteResponse>, ApiError> {
    let tool = payload.tool.clone();

    let settled = state
        .admission
        .run(bearer(&headers), payload)
        .await
        .map_err(|e| ApiError::from_admission(e, state.config.is_production()))?;

    Ok(Json(CompleteResponse {
        request_id: settled.request_id.to_string(),
        tool,
        content: settled.completion.content,
        model: settled.completion.model,
        credits_remaining: settled.account.credits,
        tier: settled.account.tier,
        usage: settled.completion.usage,
    }))
}

/// Caller's balance and tier
pub async fn account(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Account>, ApiError> {
    let account = state
        .admission
        .authenticate(bearer(&headers))
        .map_err(|e| ApiError::from_admission(e, state.config.is_production()))?;
    Ok(Json(account))
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<PasswordAuthRequest>,
) -> Result<(StatusCode, Json<AuthGrant>), ApiError> {
    let grant = state.billing.register(&payload.email, &payload.password)?;
    Ok((StatusCode::CREATED, Json(grant)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<PasswordAuthRequest>,
) -> Result<Json<AuthGrant>, ApiError> {
    Ok(Json(state.billing.login(&payload.email, &payload.password)?))
}

/// Silent sign-in for the desktop app
pub async fn desktop_auth(
    State(state): State<AppState>,
    Json(payload): Json<DesktopAuthRequest>,
) -> Result<Json<AuthGrant>, ApiError> {
    Ok(Json(state.billing.desktop_login(&payload.machine_id)?))
}

/// Bind a license key to this machine
pub async fn activate_license(
    State(state): State<AppState>,
    Json(payload): Json<ActivateLicenseRequest>,
) -> Result<Json<LicenseGrant>, ApiError> {
    let grant = state
        .billing
        .activate_license(&payload.license_key, &payload.machine_id)?;
    Ok(Json(grant))
}

/// Admin: mint a new unactivated license
pub async fn generate_license(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateLicenseRequest>,
) -> Result<(StatusCode, Json<License>), ApiError> {
    require_admin(&state, &headers)?;

    let credits = payload
        .credits
        .or_else(|| payload.tier.monthly_allotment())
        .ok_or_else(|| ApiError::bad_request("credits are required for the credits tier"))?;

    let license = state.billing.generate_license(payload.tier, credits)?;
    Ok((StatusCode::CREATED, Json(license)))
}

/// Admin: which models the configured provider account can reach
pub async fn probe_model_access(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ProbeReport>, ApiError> {
    require_admin(&state, &headers)?;

    let production = state.config.is_production();
    let provider = state.assistant.provider();
    let models: Vec<String> = provider
        .list_models()
        .await
        .map_err(|e| ApiError::from_quill(&e, production))?
        .into_iter()
        .map(|m| m.id)
        .collect();

    let report = probe_models(&**provider, &models, state.config.provider_timeout).await;
    tracing::info!(available = ?report.available(), "Model probe finished");
    Ok(Json(report))
}

/// Create Stripe checkout session
pub async fn create_checkout(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CheckoutRequest>,
) -> Result<Json<CheckoutSession>, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(ApiError::payments_disabled)?;

    let account = state
        .admission
        .authenticate(bearer(&headers))
        .map_err(|e| ApiError::from_admission(e, state.config.is_production()))?;

    let session = stripe
        .create_checkout_session(&account.identity, payload)
        .await?;
    Ok(Json(session))
}

/// Stripe webhook handler.
///
/// Acknowledges only after the event is applied (or deliberately dropped), so
/// Stripe redelivers anything that failed.
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let stripe = state.stripe.as_ref().ok_or_else(ApiError::payments_disabled)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "MISSING_SIGNATURE", "Missing Stripe signature"))?;

    let handler = state.billing.webhook_handler();

    let event = handler
        .parse_event(&body, signature, stripe.webhook_secret())
        .inspect_err(|e| tracing::warn!(error = %e, "Webhook signature failed"))?;

    match handler.handle(&event)? {
        ReconcileOutcome::Applied(_) | ReconcileOutcome::Duplicate => {}
        ReconcileOutcome::Dropped { reason } => {
            tracing::info!(event_id = %event.id, reason = %reason, "Webhook acknowledged without changes");
        }
    }

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_parsing() {
        let mut headers = HeaderMap::new();
        assert!(bearer(&headers).is_none());

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  abc "));
        assert_eq!(bearer(&headers), Some("abc"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer(&headers).is_none());
    }

    #[test]
    fn test_admin_token_comparison() {
        assert!(admin_token_matches("adm1n-token", "adm1n-token"));
        assert!(!admin_token_matches("adm1n-token", "adm1n-tokeN"));
        assert!(!admin_token_matches("adm1n-token", "adm1n"));
        assert!(!admin_token_matches("adm1n-token", ""));
    }
}
