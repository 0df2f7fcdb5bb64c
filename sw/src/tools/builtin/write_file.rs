//! write tool - write content to a file

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

/// Write content to a file
pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &'static str {
        "write"
    }

    fn description(&self) -> &'static str {
        "Write content to a file. Creates parent directories if needed."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(path = ?input["path"], "WriteFileTool::execute: called");
        let Some(path) = input["path"].as_str() else {
            return ToolError::MissingArgument("path").into();
        };
        let Some(content) = input["content"].as_str() else {
            return ToolError::MissingArgument("content").into();
        };

        let full_path = match ctx.validate_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return e.into(),
        };

        if let Some(parent) = full_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolResult::error(format!("Failed to create directories: {}", e));
            }
        }

        let warning = ctx.claim_file(&full_path).await.map(|c| c.to_string());

        let existed = tokio::fs::try_exists(&full_path).await.unwrap_or(false);
        if let Err(e) = tokio::fs::write(&full_path, content).await {
            return ToolResult::error(format!("Failed to write file: {}", e)).with_warning(warning);
        }

        ctx.record_write(&full_path, !existed).await;

        debug!(bytes = content.len(), created = !existed, "WriteFileTool::execute: file written");
        ToolResult::success(format!("Wrote {} bytes to {}", content.len(), path)).with_warning(warning)
    }
}
