//! API error responses

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use quill_billing::BillingError;
use quill_core::QuillError;

use crate::admission::AdmissionError;

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

/// An error rendered as `{error, code}` with a status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "INVALID_REQUEST", message)
    }

    pub fn payments_disabled() -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "PAYMENTS_DISABLED",
            "Payments not configured",
        )
    }

    /// Provider and tool errors. Production responses never carry the
    /// provider's own message.
    pub fn from_quill(err: &QuillError, production: bool) -> Self {
        let detail = |generic: String| if production { generic } else { err.to_string() };

        match err {
            QuillError::Timeout(_) => Self::new(
                StatusCode::GATEWAY_TIMEOUT,
                "PROVIDER_TIMEOUT",
                detail(err.user_message()),
            ),
            QuillError::Provider { .. } | QuillError::ProviderUnavailable(_) => Self::new(
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                detail(err.user_message()),
            ),
            QuillError::ToolNotFound(_) => {
                Self::new(StatusCode::BAD_REQUEST, "UNKNOWN_TOOL", err.user_message())
            }
            QuillError::ToolValidation(_) => Self::bad_request(err.user_message()),
            _ => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                detail(err.user_message()),
            ),
        }
    }

    pub fn from_admission(err: AdmissionError, production: bool) -> Self {
        match err {
            AdmissionError::Unauthorized(e) => Self::unauthorized(e.user_message()),
            AdmissionError::PaymentRequired(e) => {
                Self::new(StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED", e.user_message())
            }
            AdmissionError::Invalid(e) | AdmissionError::Provider(e) => Self::from_quill(&e, production),
            AdmissionError::Billing(e) => e.into(),
            AdmissionError::Aborted(msg) => {
                tracing::error!(error = %msg, "Request task aborted");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An unexpected error occurred.",
                )
            }
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        let (status, code) = match &err {
            BillingError::Unauthorized(_)
            | BillingError::CredentialExpired
            | BillingError::UnknownIdentity(_) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
            BillingError::InvalidCredentials => (StatusCode::UNAUTHORIZED, "INVALID_CREDENTIALS"),
            BillingError::AccountExists(_) => (StatusCode::CONFLICT, "ACCOUNT_EXISTS"),
            BillingError::InsufficientCredits { .. } => {
                (StatusCode::PAYMENT_REQUIRED, "PAYMENT_REQUIRED")
            }
            BillingError::UnknownLicense(_) => (StatusCode::NOT_FOUND, "UNKNOWN_LICENSE"),
            BillingError::AlreadyBoundElsewhere { .. } => {
                (StatusCode::CONFLICT, "ALREADY_BOUND_ELSEWHERE")
            }
            BillingError::Stripe(_) => (StatusCode::BAD_GATEWAY, "CHECKOUT_ERROR"),
            BillingError::WebhookSignature(_) => (StatusCode::BAD_REQUEST, "INVALID_SIGNATURE"),
            BillingError::WebhookParse(_) => (StatusCode::BAD_REQUEST, "INVALID_WEBHOOK"),
            BillingError::EventInProgress(_) => (StatusCode::CONFLICT, "EVENT_IN_PROGRESS"),
            BillingError::Invalid(_) => (StatusCode::BAD_REQUEST, "INVALID_REQUEST"),
            BillingError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR"),
            BillingError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!(error = %err, "Billing failure");
        }

        let message = match &err {
            BillingError::Invalid(_) => err.to_string(),
            _ => err.user_message().to_string(),
        };
        Self::new(status, code, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
                code: self.code.to_string(),
            }),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_status_mapping() {
        let cases = [
            (BillingError::Unauthorized("x".into()), StatusCode::UNAUTHORIZED),
            (BillingError::CredentialExpired, StatusCode::UNAUTHORIZED),
            (
                BillingError::InsufficientCredits { identity: "a".into() },
                StatusCode::PAYMENT_REQUIRED,
            ),
            (BillingError::UnknownLicense("k".into()), StatusCode::NOT_FOUND),
            (
                BillingError::AlreadyBoundElsewhere { key: "k".into() },
                StatusCode::CONFLICT,
            ),
            (BillingError::Storage("poisoned".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status, status);
        }
    }

    #[test]
    fn test_provider_detail_hidden_in_production() {
        let err = QuillError::provider(Some(529), "overloaded_error: upstream busy");

        let dev = ApiError::from_quill(&err, false);
        assert_eq!(dev.status, StatusCode::BAD_GATEWAY);
        assert!(dev.message.contains("upstream busy"));

        let prod = ApiError::from_quill(&err, true);
        assert_eq!(prod.code, "PROVIDER_ERROR");
        assert!(!prod.message.contains("upstream busy"));
    }

    #[test]
    fn test_timeout_maps_to_gateway_timeout() {
        let err = ApiError::from_quill(&QuillError::Timeout(60), true);
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(err.code, "PROVIDER_TIMEOUT");
    }
}
