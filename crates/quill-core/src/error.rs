//! Error Types

use thiserror::Error;

/// Result type alias for assistant operations
pub type Result<T> = std::result::Result<T, QuillError>;

/// Errors raised while talking to a completion provider or preparing a request
#[derive(Error, Debug)]
pub enum QuillError {
    /// Provider answered with a failure (transport, quota, bad request)
    #[error("Provider error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    Provider {
        status: Option<u16>,
        message: String,
    },

    /// Provider unavailable or not responding
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Provider did not answer within the configured bound
    #[error("Provider timed out after {0}s")]
    Timeout(u64),

    /// Unknown writing tool requested
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool input rejected before reaching the provider
    #[error("Tool validation error: {0}")]
    ToolValidation(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other/unknown error
    #[error("{0}")]
    Other(String),
}

impl QuillError {
    /// Shorthand for a provider failure with an HTTP status
    pub fn provider(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Provider {
            status,
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ProviderUnavailable(_) | Self::Timeout(_) => true,
            Self::Provider { status, .. } => matches!(status, Some(429 | 500..=599)),
            _ => false,
        }
    }

    /// Convert to a user-friendly message
    pub fn user_message(&self) -> String {
        match self {
            Self::Provider { .. } => "The AI service encountered an error. Please try again.".into(),
            Self::ProviderUnavailable(_) => "The AI service is currently unavailable. Please try again.".into(),
            Self::Timeout(_) => "The AI service took too long to respond.".into(),
            Self::ToolNotFound(name) => format!("The tool '{name}' is not available."),
            Self::ToolValidation(msg) => format!("Invalid request: {msg}"),
            _ => "An unexpected error occurred.".into(),
        }
    }
}

impl From<anyhow::Error> for QuillError {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
