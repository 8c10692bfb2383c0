//! Router

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::handlers::{
    account, activate_license, complete, create_checkout, desktop_auth, generate_license,
    health_check, list_tools, login, probe_model_access, register, stripe_webhook,
};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & info
        .route("/health", get(health_check))
        .route("/api/tools", get(list_tools))
        // Auth
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/desktop", post(desktop_auth))
        .route("/api/license/activate", post(activate_license))
        // Assistant
        .route("/api/ai/complete", post(complete))
        .route("/api/account", get(account))
        // Payments
        .route("/api/checkout", post(create_checkout))
        .route("/webhook/stripe", post(stripe_webhook))
        // Admin
        .route("/api/models", get(probe_model_access))
        .route("/api/admin/licenses", post(generate_license))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use chrono::Duration;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    use quill_billing::{Billing, BillingConfig, CredentialCodec, SeedData};
    use quill_core::{AssistantConfig, ToolRegistry, WritingAssistant};
    use quill_runtime::EchoProvider;

    use crate::config::ServerConfig;

    const ADMIN: &str = "admin-test-token";

    fn app() -> Router {
        let config = ServerConfig::from_lookup(|key| match key {
            "QUILL_ADMIN_TOKEN" => Some(ADMIN.to_string()),
            _ => None,
        })
        .unwrap();

        let codec = CredentialCodec::new(b"router-test".to_vec(), Duration::days(30)).unwrap();
        let billing = Billing::in_memory(
            codec,
            BillingConfig {
                signup_credits: config.signup_credits,
                desktop_trial_credits: 2,
            },
        );
        billing.seed(&SeedData::demo()).unwrap();

        let assistant = WritingAssistant::new(
            Arc::new(EchoProvider::new()),
            Arc::new(ToolRegistry::with_builtins()),
            AssistantConfig {
                default_model: config.default_model.clone(),
                allowed_models: config.allowed_models.clone(),
                ..Default::default()
            },
        );
        router(AppState::new(assistant, billing, None, config))
    }

    async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        let mut request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = if body.is_null() { Body::empty() } else { Body::from(body.to_string()) };

        let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1 << 20).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app();
        let (status, body) = call(&app, "GET", "/health", None, Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "echo");
        assert_eq!(body["stripe_configured"], false);
    }

    #[tokio::test]
    async fn test_tools_listed() {
        let app = app();
        let (_, body) = call(&app, "GET", "/api/tools", None, Value::Null).await;
        assert_eq!(body["tools"].as_array().unwrap().len(), 8);
    }

    #[tokio::test]
    async fn test_desktop_trial_until_exhausted() {
        let app = app();
        let (status, grant) = call(&app, "POST", "/api/auth/desktop", None, json!({"machine_id": "mac-7"})).await;
        assert_eq!(status, StatusCode::OK);
        let token = grant["token"].as_str().unwrap().to_string();

        let request = json!({"tool": "summarize", "text": "A long story."});
        for expected in [1, 0] {
            let (status, body) = call(&app, "POST", "/api/ai/complete", Some(&token), request.clone()).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["credits_remaining"], expected);
            assert!(body["content"].as_str().unwrap().starts_with("You asked me to complete:"));
        }

        let (status, body) = call(&app, "POST", "/api/ai/complete", Some(&token), request).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert_eq!(body["code"], "PAYMENT_REQUIRED");
    }

    #[tokio::test]
    async fn test_unlisted_model_rejected_without_charge() {
        let app = app();
        let (_, grant) = call(&app, "POST", "/api/auth/desktop", None, json!({"machine_id": "mac-8"})).await;
        let token = grant["token"].as_str().unwrap().to_string();

        let request = json!({
            "tool": "freeform",
            "text": "Write me a novel.",
            "instruction": "Make it long.",
            "model": "claude-opus-4-20250514",
            "max_tokens": 4096
        });
        let (status, body) = call(&app, "POST", "/api/ai/complete", Some(&token), request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_REQUEST");

        let (_, account) = call(&app, "GET", "/api/account", Some(&token), Value::Null).await;
        assert_eq!(account["credits"], 2);
    }

    #[tokio::test]
    async fn test_complete_requires_token() {
        let app = app();
        let (status, body) = call(
            &app,
            "POST",
            "/api/ai/complete",
            None,
            json!({"tool": "rewrite", "text": "hi"}),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_license_activation_flow() {
        let app = app();
        let activate = |machine: &str| json!({"license_key": "QUILL-DEMO0-AAAAA-00001", "machine_id": machine});

        let (status, body) = call(&app, "POST", "/api/license/activate", None, activate("mac-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["first_activation"], true);
        assert_eq!(body["account"]["credits"], 500);

        let (status, body) = call(&app, "POST", "/api/license/activate", None, activate("mac-1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["first_activation"], false);

        let (status, body) = call(&app, "POST", "/api/license/activate", None, activate("mac-2")).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_BOUND_ELSEWHERE");

        let unknown = json!({"license_key": "QUILL-ZZZZZ-ZZZZZ-ZZZZZ", "machine_id": "mac-1"});
        let (status, _) = call(&app, "POST", "/api/license/activate", None, unknown).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_register_login_account() {
        let app = app();
        let creds = json!({"email": "new@example.com", "password": "long enough"});

        let (status, _) = call(&app, "POST", "/api/auth/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::CREATED);
        let (status, _) = call(&app, "POST", "/api/auth/register", None, creds.clone()).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, grant) = call(&app, "POST", "/api/auth/login", None, creds).await;
        assert_eq!(status, StatusCode::OK);
        let token = grant["token"].as_str().unwrap().to_string();

        let (status, account) = call(&app, "GET", "/api/account", Some(&token), Value::Null).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(account["identity"], "new@example.com");
        assert_eq!(account["credits"], 50);
        assert_eq!(account["tier"], "credits");
    }

    #[tokio::test]
    async fn test_admin_license_generation() {
        let app = app();
        let body = json!({"tier": "pro"});

        let (status, _) = call(&app, "POST", "/api/admin/licenses", None, body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, _) = call(&app, "POST", "/api/admin/licenses", Some("admin-test-tokeX"), body.clone()).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, license) = call(&app, "POST", "/api/admin/licenses", Some(ADMIN), body).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(license["credits"], 5000);
        assert_eq!(license["activated"], false);
        assert!(license["key"].as_str().unwrap().starts_with("QUILL-"));
    }

    #[tokio::test]
    async fn test_payments_disabled_without_stripe() {
        let app = app();
        let (status, body) = call(&app, "POST", "/webhook/stripe", None, json!({})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "PAYMENTS_DISABLED");
    }
}
