//! Tool trait definition

use async_trait::async_trait;
use serde_json::Value;

use super::context::ToolContext;
use super::error::ToolError;

/// A tool the worker can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (matches LLM tool_use name)
    fn name(&self) -> &'static str;

    /// Human-readable description
    fn description(&self) -> &'static str;

    /// JSON Schema for input parameters
    fn input_schema(&self) -> Value;

    /// Execute the tool
    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult;
}

/// Result of a tool execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }

    /// Append an advisory line without changing the error flag
    pub fn with_warning(mut self, warning: Option<String>) -> Self {
        if let Some(warning) = warning {
            self.content.push_str("\n\nWarning: ");
            self.content.push_str(&warning);
        }
        self
    }
}

impl From<ToolError> for ToolResult {
    fn from(err: ToolError) -> Self {
        Self::error(err.to_string())
    }
}
