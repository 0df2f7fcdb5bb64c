//! edit tool - replace strings in a file

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolError, ToolResult};

/// Replace a specific string in a file
pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &'static str {
        "edit"
    }

    fn description(&self) -> &'static str {
        "Replace a specific string in a file. Requires prior read call."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the working directory"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact string to find and replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement string"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences (default: false)"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(path = ?input["path"], "EditFileTool::execute: called");
        let Some(path) = input["path"].as_str() else {
            return ToolError::MissingArgument("path").into();
        };
        let Some(old_string) = input["old_string"].as_str() else {
            return ToolError::MissingArgument("old_string").into();
        };
        let Some(new_string) = input["new_string"].as_str() else {
            return ToolError::MissingArgument("new_string").into();
        };
        if old_string.is_empty() {
            return ToolError::InvalidArgument("old_string must not be empty".to_string()).into();
        }
        let replace_all = input["replace_all"].as_bool().unwrap_or(false);

        let full_path = match ctx.validate_path(Path::new(path)) {
            Ok(p) => p,
            Err(e) => return e.into(),
        };

        if !ctx.was_read(&full_path).await {
            return ToolError::EditWithoutRead { path: path.to_string() }.into();
        }

        let content = match tokio::fs::read_to_string(&full_path).await {
            Ok(c) => c,
            Err(e) => return ToolResult::error(format!("Failed to read file: {}", e)),
        };

        let count = content.matches(old_string).count();
        if count == 0 {
            return ToolError::PatternNotFound { path: path.to_string() }.into();
        }
        if count > 1 && !replace_all {
            return ToolError::PatternNotUnique { count }.into();
        }

        let new_content = if replace_all {
            content.replace(old_string, new_string)
        } else {
            content.replacen(old_string, new_string, 1)
        };

        let warning = ctx.claim_file(&full_path).await.map(|c| c.to_string());
        if let Err(e) = tokio::fs::write(&full_path, &new_content).await {
            return ToolResult::error(format!("Failed to write file: {}", e)).with_warning(warning);
        }

        ctx.record_write(&full_path, false).await;

        let replacements = if replace_all { count } else { 1 };
        debug!(replacements, "EditFileTool::execute: file edited");
        ToolResult::success(format!("Replaced {} occurrence(s) in {}", replacements, path))
            .with_warning(warning)
    }
}
