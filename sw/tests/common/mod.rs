//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};
use tempfile::TempDir;

use stepwise::llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, ToolCall};
use stepwise::state::StateManager;

type Hook = Box<dyn Fn(usize) + Send + Sync>;

/// LLM client replaying canned responses
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<CompletionResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    hook: Option<Hook>,
}

impl ScriptedLlm {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            hook: None,
        }
    }

    /// Run `hook` with the call number (0-based) before answering
    pub fn with_hook(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.hook = Some(Box::new(hook));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len() - 1
        };
        if let Some(hook) = &self.hook {
            hook(call);
        }
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| LlmError::InvalidResponse("script exhausted".to_string()))
    }
}

pub fn tool(id: &str, name: &str, input: Value) -> CompletionResponse {
    CompletionResponse::tool_use(vec![ToolCall::new(id, name, input)])
}

pub fn done(id: &str, summary: &str) -> CompletionResponse {
    tool(id, "mark_step_done", json!({ "summary": summary }))
}

pub fn failure(id: &str, message: &str) -> CompletionResponse {
    tool(id, "report_step_failure", json!({ "message": message }))
}

pub fn write(id: &str, path: &str, content: &str) -> CompletionResponse {
    tool(id, "write", json!({ "path": path, "content": content }))
}

pub fn report(id: &str, progress: u8, confidence: u8) -> CompletionResponse {
    tool(id, "self_report", json!({ "progress": progress, "confidence": confidence }))
}

/// Checkpoint store and worktree in temporary directories
pub struct Workspace {
    pub store_dir: TempDir,
    pub worktree: TempDir,
    pub state: StateManager,
}

impl Workspace {
    pub fn new() -> Self {
        let store_dir = TempDir::new().expect("Failed to create store dir");
        let worktree = TempDir::new().expect("Failed to create worktree");
        let state = StateManager::spawn(store_dir.path()).expect("Failed to spawn state manager");
        Self {
            store_dir,
            worktree,
            state,
        }
    }
}
