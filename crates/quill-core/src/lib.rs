//! # quill-core
//!
//! Provider-agnostic completion layer for the Quill writing assistant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   WritingAssistant                        │
//! │  ┌─────────────┐   ┌──────────────┐   ┌───────────────┐  │
//! │  │ ToolRequest │──▶│ ToolRegistry │──▶│  LlmProvider  │  │
//! │  │             │   │  (templates) │   │  (Strategy)   │  │
//! │  └─────────────┘   └──────────────┘   └───────────────┘  │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The `LlmProvider` trait lets the service swap between Anthropic, Ollama or
//! the local echo provider without touching metering or admission logic.

pub mod assistant;
pub mod error;
pub mod provider;
pub mod tool;

pub use assistant::{AssistantConfig, WritingAssistant};
pub use error::{QuillError, Result};
pub use provider::{Completion, CompletionRequest, LlmProvider};
pub use tool::{Tool, ToolRegistry, ToolRequest, ToolSchema};
