//! LLM client interface
//!
//! The provider transport lives outside this crate; the engine talks to it
//! through [`LlmClient`].

pub mod client;
mod error;
mod types;

pub use client::LlmClient;
pub use error::LlmError;
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, TokenUsage,
    ToolCall, ToolDefinition,
};
