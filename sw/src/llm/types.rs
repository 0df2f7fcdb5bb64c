//! LLM request/response types
//!
//! These types model a tool-calling messages API without committing to any
//! provider's transport.

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A completion request - everything needed for one LLM call
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// System prompt describing the plan and working directory
    pub system_prompt: String,

    /// Full conversation so far
    pub messages: Vec<Message>,

    /// Tools the worker may call
    pub tools: Vec<ToolDefinition>,

    /// Max tokens for response (from config)
    pub max_tokens: u32,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    /// Create a user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        debug!("Message::user: called");
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create an assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        debug!("Message::assistant: called");
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Create a user message with multiple content blocks
    pub fn user_blocks(blocks: Vec<ContentBlock>) -> Self {
        debug!(block_count = %blocks.len(), "Message::user_blocks: called");
        Self {
            role: Role::User,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Create an assistant message with multiple content blocks
    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        debug!(block_count = %blocks.len(), "Message::assistant_blocks: called");
        Self {
            role: Role::Assistant,
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Append a text block, converting plain text content to blocks
    pub fn push_text(&mut self, text: impl Into<String>) {
        debug!("Message::push_text: called");
        let text = text.into();
        match &mut self.content {
            MessageContent::Text(existing) => {
                let first = std::mem::take(existing);
                self.content = MessageContent::Blocks(vec![ContentBlock::text(first), ContentBlock::text(text)]);
            }
            MessageContent::Blocks(blocks) => blocks.push(ContentBlock::text(text)),
        }
    }

    /// Concatenated text of this message, ignoring tool blocks
    pub fn text(&self) -> String {
        match &self.content {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Message content - either plain text or structured blocks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// Get text content if this is a text message
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MessageContent::Text(text) => Some(text),
            MessageContent::Blocks(_) => None,
        }
    }
}

/// A content block in a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    /// Create a text content block
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// Create a tool result block
    pub fn tool_result(tool_use_id: impl Into<String>, content: impl Into<String>, is_error: bool) -> Self {
        debug!(%is_error, "ContentBlock::tool_result: called");
        ContentBlock::ToolResult {
            tool_use_id: tool_use_id.into(),
            content: content.into(),
            is_error,
        }
    }
}

/// Response from a completion request
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// Text content (if any)
    pub content: Option<String>,

    /// Tool calls requested by the model
    pub tool_calls: Vec<ToolCall>,

    /// Why the model stopped
    pub stop_reason: StopReason,

    /// Token usage for cost tracking
    pub usage: TokenUsage,
}

impl CompletionResponse {
    /// A final answer with no tool calls
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage::default(),
        }
    }

    /// A tool-call batch
    pub fn tool_use(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            content: None,
            tool_calls,
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage::default(),
        }
    }
}

/// A tool call requested by the model
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// Why the provider stopped generating
///
/// Only `ToolUse` and `EndTurn` let a run continue; every other variant is
/// fatal. Unrecognized provider strings are kept in `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    StopSequence,
    /// The provider reported an error in place of a completion
    Error,
    /// No provider is configured for this worker
    NotConfigured,
    Unknown(String),
}

impl StopReason {
    /// Parse a provider stop_reason string
    pub fn parse(s: &str) -> Self {
        debug!(%s, "StopReason::parse: called");
        match s {
            "end_turn" => StopReason::EndTurn,
            "tool_use" => StopReason::ToolUse,
            "max_tokens" => StopReason::MaxTokens,
            "stop_sequence" => StopReason::StopSequence,
            "error" => StopReason::Error,
            "not_configured" => StopReason::NotConfigured,
            other => {
                debug!(%other, "StopReason::parse: unrecognized stop reason");
                StopReason::Unknown(other.to_string())
            }
        }
    }

    /// Whether the run may continue after this stop reason
    pub fn is_continuable(&self) -> bool {
        matches!(self, StopReason::EndTurn | StopReason::ToolUse)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EndTurn => write!(f, "end_turn"),
            Self::ToolUse => write!(f, "tool_use"),
            Self::MaxTokens => write!(f, "max_tokens"),
            Self::StopSequence => write!(f, "stop_sequence"),
            Self::Error => write!(f, "error"),
            Self::NotConfigured => write!(f, "not_configured"),
            Self::Unknown(s) => write!(f, "unknown({})", s),
        }
    }
}

/// Token usage for cost tracking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Accumulate another response's usage
    pub fn add(&mut self, other: &TokenUsage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Tool definition for the LLM
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: serde_json::Value) -> Self {
        let name = name.into();
        let description = description.into();
        debug!(%name, "ToolDefinition::new: called");
        Self {
            name,
            description,
            input_schema,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_user() {
        let msg = Message::user("Hello");
        assert_eq!(msg.role, Role::User);
        assert!(matches!(msg.content, MessageContent::Text(ref s) if s == "Hello"));
    }

    #[test]
    fn test_push_text_converts_to_blocks() {
        let mut msg = Message::user("first");
        msg.push_text("second");
        match &msg.content {
            MessageContent::Blocks(blocks) => {
                assert_eq!(blocks.len(), 2);
                assert_eq!(blocks[1], ContentBlock::text("second"));
            }
            _ => panic!("Expected Blocks content"),
        }
        assert_eq!(msg.text(), "first\nsecond");
    }

    #[test]
    fn test_push_text_appends_to_tool_results() {
        let mut msg = Message::user_blocks(vec![ContentBlock::tool_result("call_1", "ok", false)]);
        msg.push_text("Begin step 2");
        match &msg.content {
            MessageContent::Blocks(blocks) => assert_eq!(blocks.len(), 2),
            _ => panic!("Expected Blocks content"),
        }
        assert_eq!(msg.text(), "Begin step 2");
    }

    #[test]
    fn test_stop_reason_parse_is_closed() {
        assert_eq!(StopReason::parse("end_turn"), StopReason::EndTurn);
        assert_eq!(StopReason::parse("tool_use"), StopReason::ToolUse);
        assert_eq!(StopReason::parse("max_tokens"), StopReason::MaxTokens);
        assert_eq!(StopReason::parse("error"), StopReason::Error);
        assert_eq!(StopReason::parse("not_configured"), StopReason::NotConfigured);
        assert_eq!(StopReason::parse("refusal"), StopReason::Unknown("refusal".to_string()));
    }

    #[test]
    fn test_only_tool_use_and_end_turn_continue() {
        assert!(StopReason::EndTurn.is_continuable());
        assert!(StopReason::ToolUse.is_continuable());
        assert!(!StopReason::MaxTokens.is_continuable());
        assert!(!StopReason::StopSequence.is_continuable());
        assert!(!StopReason::Error.is_continuable());
        assert!(!StopReason::NotConfigured.is_continuable());
        assert!(!StopReason::Unknown("x".to_string()).is_continuable());
    }

    #[test]
    fn test_content_block_serde_tags() {
        let block = ContentBlock::ToolUse {
            id: "call_1".to_string(),
            name: "read".to_string(),
            input: serde_json::json!({"path": "a.rs"}),
        };
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_use");

        let result: ContentBlock =
            serde_json::from_value(serde_json::json!({"type": "tool_result", "tool_use_id": "x", "content": "y"}))
                .unwrap();
        assert_eq!(result, ContentBlock::tool_result("x", "y", false));
    }

    #[test]
    fn test_token_usage_add() {
        let mut total = TokenUsage::default();
        total.add(&TokenUsage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.add(&TokenUsage {
            input_tokens: 1,
            output_tokens: 1,
        });
        assert_eq!(total.total(), 17);
    }
}
