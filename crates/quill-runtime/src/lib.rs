//! # quill-runtime
//!
//! Completion providers for the Quill API.
//!
//! ## Providers
//!
//! - **Anthropic** (default): Messages API over HTTPS
//! - **Echo**: offline provider for local development
//! - **Ollama** (`ollama` feature): local inference
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quill_runtime::AnthropicProvider;
//!
//! let provider = AnthropicProvider::from_env()?;
//! let assistant = WritingAssistant::with_defaults(Arc::new(provider));
//! ```

pub mod anthropic;
pub mod echo;
pub mod probe;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use anthropic::{AnthropicConfig, AnthropicProvider};
pub use echo::EchoProvider;
pub use probe::{ProbeReport, ProbeResult, probe_models};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;

// Re-export core types for convenience
pub use quill_core::{LlmProvider, QuillError, Result};
