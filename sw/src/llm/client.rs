//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// A tool-calling LLM backend
///
/// The engine sends the whole conversation on every call; the client keeps
/// no state between calls. Transport, authentication and per-request
/// timeouts are the implementation's concern.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request (blocking until complete)
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}
