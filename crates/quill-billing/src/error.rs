//! Billing Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, BillingError>;

/// Account, license, credential and payment errors
#[derive(Error, Debug)]
pub enum BillingError {
    /// Missing, malformed or forged credential
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Credential past its expiry
    #[error("Credential expired")]
    CredentialExpired,

    /// Email/password pair did not match
    #[error("Invalid email or password")]
    InvalidCredentials,

    /// Registration for an identity that already exists
    #[error("Account already exists: {0}")]
    AccountExists(String),

    /// Credit balance exhausted
    #[error("Insufficient credits for {identity}")]
    InsufficientCredits { identity: String },

    /// License key not in the registry
    #[error("Unknown license: {0}")]
    UnknownLicense(String),

    /// License already bound to a different machine
    #[error("License {key} is already bound to another machine")]
    AlreadyBoundElsewhere { key: String },

    /// Identity never seen by the account store
    #[error("Unknown identity: {0}")]
    UnknownIdentity(String),

    /// Stripe API error
    #[error("Stripe error: {0}")]
    Stripe(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),

    /// Another delivery of the same payment event is still being applied
    #[error("Event {0} is already being processed")]
    EventInProgress(String),

    /// Rejected input
    #[error("Invalid input: {0}")]
    Invalid(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage error (lock poisoning, backing store failure)
    #[error("Storage error: {0}")]
    Storage(String),
}

impl BillingError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stripe(_) | Self::Storage(_) | Self::EventInProgress(_))
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &str {
        match self {
            Self::Unauthorized(_) => "Please sign in again.",
            Self::CredentialExpired => "Your session has expired. Please sign in again.",
            Self::InvalidCredentials => "Invalid email or password.",
            Self::AccountExists(_) => "An account with this email already exists.",
            Self::InsufficientCredits { .. } => "You have run out of credits. Please top up to continue.",
            Self::UnknownLicense(_) => "License key not found.",
            Self::AlreadyBoundElsewhere { .. } => "This license is already activated on another machine.",
            Self::Stripe(_) => "Payment processing failed. Please try again.",
            Self::Invalid(_) => "The request was invalid.",
            Self::Config(_) => "Service configuration error.",
            _ => "An error occurred processing your request.",
        }
    }
}

/// Lock poisoning only happens after a panic while holding the lock
pub(crate) fn poisoned<T>(_: std::sync::PoisonError<T>) -> BillingError {
    BillingError::Storage("lock poisoned".into())
}
