//! ToolExecutor - manages tool execution for a worker

use std::collections::HashMap;
use tracing::debug;

use crate::llm::{ToolCall, ToolDefinition};

use super::builtin::{
    EditFileTool, ListDirectoryTool, MarkStepDoneTool, ReadFileTool, ReportStepFailureTool, SelfReportTool,
    WriteFileTool,
};
use super::{Tool, ToolContext, ToolResult};

/// Manages tool execution for a worker
pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolExecutor {
    /// Create executor with the file collaborators and step-control tools
    pub fn standard() -> Self {
        debug!("ToolExecutor::standard: called");
        let mut executor = Self::empty();

        // File system tools
        executor.add_tool(Box::new(ReadFileTool));
        executor.add_tool(Box::new(WriteFileTool));
        executor.add_tool(Box::new(EditFileTool));
        executor.add_tool(Box::new(ListDirectoryTool));

        // Step control
        executor.add_tool(Box::new(MarkStepDoneTool));
        executor.add_tool(Box::new(ReportStepFailureTool));
        executor.add_tool(Box::new(SelfReportTool));

        executor
    }

    /// Create an empty executor (for testing)
    pub fn empty() -> Self {
        Self { tools: HashMap::new() }
    }

    /// Add a tool to the executor, replacing any tool with the same name
    pub fn add_tool(&mut self, tool: Box<dyn Tool>) {
        debug!(tool_name = %tool.name(), "ToolExecutor::add_tool: called");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Get tool definitions for the LLM, ordered by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| definition(t.as_ref())).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Get definitions for a subset of tools by name
    pub fn definitions_for(&self, tool_names: &[String]) -> Vec<ToolDefinition> {
        debug!(?tool_names, "ToolExecutor::definitions_for: called");
        tool_names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| definition(t.as_ref()))
            .collect()
    }

    /// Execute a tool call
    pub async fn execute(&self, tool_call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        debug!(tool_name = %tool_call.name, tool_id = %tool_call.id, "ToolExecutor::execute: called");
        match self.tools.get(&tool_call.name) {
            Some(tool) => tool.execute(tool_call.input.clone(), ctx).await,
            None => ToolResult::error(format!("Unknown tool: {}", tool_call.name)),
        }
    }

    /// Execute multiple tool calls in order
    pub async fn execute_all(&self, tool_calls: &[ToolCall], ctx: &ToolContext) -> Vec<(String, ToolResult)> {
        debug!(count = tool_calls.len(), "ToolExecutor::execute_all: called");
        let mut results = Vec::with_capacity(tool_calls.len());
        for call in tool_calls {
            let result = self.execute(call, ctx).await;
            results.push((call.id.clone(), result));
        }
        results
    }

    /// Check if a tool exists
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Get tool names, sorted
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::standard()
    }
}

fn definition(tool: &dyn Tool) -> ToolDefinition {
    ToolDefinition::new(tool.name(), tool.description(), tool.input_schema())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::StepSignal;
    use crate::tools::builtin::{MARK_STEP_DONE, REPORT_STEP_FAILURE, SELF_REPORT};
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_standard_executor_has_tools() {
        let executor = ToolExecutor::standard();
        assert_eq!(
            executor.tool_names(),
            vec!["edit", "list", MARK_STEP_DONE, "read", REPORT_STEP_FAILURE, SELF_REPORT, "write"]
        );
    }

    #[test]
    fn test_definitions_sorted() {
        let defs = ToolExecutor::standard().definitions();
        assert_eq!(defs.len(), 7);
        assert_eq!(defs[0].name, "edit");
        assert!(defs.iter().all(|d| d.input_schema["type"] == "object"));
    }

    #[test]
    fn test_definitions_for_subset() {
        let executor = ToolExecutor::standard();
        let defs = executor.definitions_for(&["read".to_string(), "missing".to_string(), "write".to_string()]);

        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0].name, "read");
        assert_eq!(defs[1].name, "write");
    }

    #[tokio::test]
    async fn test_execute_unknown_tool() {
        let executor = ToolExecutor::standard();
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        let call = ToolCall::new("call_1", "unknown_tool", json!({}));
        let result = executor.execute(&call, &ctx).await;
        assert!(result.is_error);
        assert_eq!(result.content, "Unknown tool: unknown_tool");
    }

    #[tokio::test]
    async fn test_execute_all_in_order() {
        let executor = ToolExecutor::standard();
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.set_step(1);

        let calls = vec![
            ToolCall::new("c1", "write", json!({"path": "a.txt", "content": "a"})),
            ToolCall::new("c2", "read", json!({"path": "a.txt"})),
            ToolCall::new("c3", MARK_STEP_DONE, json!({"summary": "wrote a"})),
        ];
        let results = executor.execute_all(&calls, &ctx).await;

        let ids: Vec<&str> = results.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
        assert!(results.iter().all(|(_, r)| !r.is_error));
        assert!(results[1].1.content.contains("│a"));
        assert!(matches!(ctx.drain_signals().await.as_slice(), [StepSignal::Done { step_index: 1, .. }]));
    }
}
