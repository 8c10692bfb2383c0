//! Writing Tools
//!
//! Each writing tool the client exposes (continue, rewrite, summarize, ...)
//! maps to a prompt template and a default token budget. Tools are looked up
//! by name from a [`ToolRegistry`] and rendered into a single prompt for the
//! provider.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{QuillError, Result};

/// Longest input text accepted by any tool, in characters
pub const MAX_INPUT_CHARS: usize = 20_000;

/// Tool invocation sent by the client
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Tool identifier
    pub tool: String,

    /// The user's text the tool operates on
    pub text: String,

    /// Free-form instruction (required by some tools)
    #[serde(default)]
    pub instruction: Option<String>,

    /// Target tone for tone-shifting tools
    #[serde(default)]
    pub tone: Option<String>,

    /// Model override
    #[serde(default)]
    pub model: Option<String>,

    /// Token budget override (clamped to the tool's ceiling)
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            text: text.into(),
            instruction: None,
            tone: None,
            model: None,
            max_tokens: None,
        }
    }

    #[must_use]
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    #[must_use]
    pub fn with_tone(mut self, tone: impl Into<String>) -> Self {
        self.tone = Some(tone.into());
        self
    }
}

/// Tool definition as listed to clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolSchema {
    /// Unique tool identifier
    pub name: String,

    /// Human-readable description
    pub description: String,

    /// Default completion budget
    pub default_max_tokens: u32,

    /// Hard ceiling for client overrides
    pub max_tokens_ceiling: u32,

    /// Request fields that must be present besides `text`
    #[serde(default)]
    pub required: Vec<String>,
}

/// A rendered prompt ready for the provider
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedPrompt {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

/// Tool trait - implement to add new writing tools
pub trait Tool: Send + Sync {
    /// Schema listed to clients
    fn schema(&self) -> ToolSchema;

    /// Build the prompt for a validated request
    fn render(&self, request: &ToolRequest) -> RenderedPrompt;

    /// Validate a request before rendering
    fn validate(&self, request: &ToolRequest) -> Result<()> {
        if request.text.trim().is_empty() {
            return Err(QuillError::ToolValidation("text must not be empty".into()));
        }
        if request.text.chars().count() > MAX_INPUT_CHARS {
            return Err(QuillError::ToolValidation(format!(
                "text exceeds {MAX_INPUT_CHARS} characters"
            )));
        }

        let schema = self.schema();
        for field in &schema.required {
            let present = match field.as_str() {
                "instruction" => request.instruction.as_deref().is_some_and(|s| !s.trim().is_empty()),
                "tone" => request.tone.as_deref().is_some_and(|s| !s.trim().is_empty()),
                _ => true,
            };
            if !present {
                return Err(QuillError::ToolValidation(format!(
                    "Missing required parameter: {field}"
                )));
            }
        }

        Ok(())
    }
}

const SYSTEM_PROMPT: &str = "You are Quill, a careful writing assistant. \
Return only the resulting text, without preamble, quotes or commentary. \
Preserve the author's voice and the language of the input.";

/// Template-backed tool. Placeholders: `{text}`, `{instruction}`, `{tone}`.
pub struct TemplateTool {
    name: &'static str,
    description: &'static str,
    template: &'static str,
    default_max_tokens: u32,
    max_tokens_ceiling: u32,
    required: &'static [&'static str],
}

impl TemplateTool {
    pub const fn new(
        name: &'static str,
        description: &'static str,
        template: &'static str,
        default_max_tokens: u32,
    ) -> Self {
        Self {
            name,
            description,
            template,
            default_max_tokens,
            max_tokens_ceiling: 4096,
            required: &[],
        }
    }

    #[must_use]
    pub const fn requires(mut self, fields: &'static [&'static str]) -> Self {
        self.required = fields;
        self
    }
}

impl Tool for TemplateTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.into(),
            description: self.description.into(),
            default_max_tokens: self.default_max_tokens,
            max_tokens_ceiling: self.max_tokens_ceiling,
            required: self.required.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    fn render(&self, request: &ToolRequest) -> RenderedPrompt {
        let prompt = self
            .template
            .replace("{instruction}", request.instruction.as_deref().unwrap_or("").trim())
            .replace("{tone}", request.tone.as_deref().unwrap_or("neutral").trim())
            // text goes last so user content containing placeholders stays literal
            .replace("{text}", request.text.trim());

        let max_tokens = request
            .max_tokens
            .unwrap_or(self.default_max_tokens)
            .clamp(1, self.max_tokens_ceiling);

        RenderedPrompt {
            system: SYSTEM_PROMPT.into(),
            prompt,
            max_tokens,
        }
    }
}

/// The tools shipped with the service
pub fn builtin_tools() -> Vec<TemplateTool> {
    vec![
        TemplateTool::new(
            "continue",
            "Continue writing from where the text stops",
            "Continue the following text naturally for one or two paragraphs. \
             Do not repeat the existing text.\n\n{text}",
            600,
        ),
        TemplateTool::new(
            "rewrite",
            "Rewrite the text for clarity and flow",
            "Rewrite the following text so it reads clearly and flows well, \
             keeping its meaning.\n\n{text}",
            800,
        ),
        TemplateTool::new(
            "summarize",
            "Summarize the text in a few sentences",
            "Summarize the following text in at most three sentences.\n\n{text}",
            300,
        ),
        TemplateTool::new(
            "expand",
            "Expand the text with more detail",
            "Expand the following text with supporting detail and examples, \
             roughly doubling its length.\n\n{text}",
            1200,
        ),
        TemplateTool::new(
            "grammar",
            "Fix spelling, grammar and punctuation",
            "Correct the spelling, grammar and punctuation of the following text. \
             Change nothing else.\n\n{text}",
            800,
        ),
        TemplateTool::new(
            "tone",
            "Rewrite the text in a different tone",
            "Rewrite the following text in a {tone} tone.\n\n{text}",
            800,
        )
        .requires(&["tone"]),
        TemplateTool::new(
            "brainstorm",
            "Suggest ideas related to the text",
            "Suggest five distinct ideas that build on the following text, \
             as a numbered list.\n\n{text}",
            500,
        ),
        TemplateTool::new(
            "freeform",
            "Apply a custom instruction to the text",
            "{instruction}\n\nText:\n{text}",
            1000,
        )
        .requires(&["instruction"]),
    ]
}

/// Registry for available tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry preloaded with [`builtin_tools`]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for tool in builtin_tools() {
            registry.register(tool);
        }
        registry
    }

    /// Register a new tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let schema = tool.schema();
        self.tools.insert(schema.name, Arc::new(tool));
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Validate and render a request
    pub fn prepare(&self, request: &ToolRequest) -> Result<RenderedPrompt> {
        let tool = self
            .get(&request.tool)
            .ok_or_else(|| QuillError::ToolNotFound(request.tool.clone()))?;

        tool.validate(request)?;
        Ok(tool.render(request))
    }

    /// All tool schemas, sorted by name
    pub fn schemas(&self) -> Vec<ToolSchema> {
        let mut schemas: Vec<_> = self.tools.values().map(|t| t.schema()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// List tool names
    pub fn names(&self) -> Vec<String> {
        self.schemas().into_iter().map(|s| s.name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
