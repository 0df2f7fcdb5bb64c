//! mark_step_done tool - explicit step completion

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::info;

use crate::tools::{StepSignal, Tool, ToolContext, ToolError, ToolResult};

/// Signal that the current step is complete
pub struct MarkStepDoneTool;

#[async_trait]
impl Tool for MarkStepDoneTool {
    fn name(&self) -> &'static str {
        super::MARK_STEP_DONE
    }

    fn description(&self) -> &'static str {
        "Mark the current plan step as done. Call once the step's files are written and checked."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {
                    "type": "string",
                    "description": "Brief summary of what the step accomplished"
                },
                "artifacts": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Files created or modified"
                }
            },
            "required": ["summary"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(summary) = input.get("summary").and_then(Value::as_str) else {
            return ToolError::MissingArgument("summary").into();
        };
        let Some(step_index) = ctx.step_index() else {
            return ToolError::NoActiveStep.into();
        };

        let artifacts: Vec<String> = input
            .get("artifacts")
            .and_then(Value::as_array)
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(String::from)).collect())
            .unwrap_or_default();

        info!(worker_id = %ctx.worker_id, step_index, %summary, ?artifacts, "Step completion signaled");

        let mut message = format!("Step {} marked done: {}", step_index, summary);
        if !artifacts.is_empty() {
            message.push_str("\n\nArtifacts:\n");
            for artifact in &artifacts {
                message.push_str(&format!("  - {}\n", artifact));
            }
        }

        ctx.push_signal(StepSignal::Done {
            step_index,
            summary: summary.to_string(),
            artifacts,
        })
        .await;

        ToolResult::success(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_mark_step_done_records_signal() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.set_step(2);

        let result = MarkStepDoneTool
            .execute(json!({"summary": "Added db layer", "artifacts": ["src/db.rs"]}), &ctx)
            .await;

        assert!(!result.is_error);
        assert!(result.content.contains("Step 2 marked done"));
        assert!(result.content.contains("src/db.rs"));
        assert_eq!(
            ctx.drain_signals().await,
            vec![StepSignal::Done {
                step_index: 2,
                summary: "Added db layer".to_string(),
                artifacts: vec!["src/db.rs".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_mark_step_done_missing_summary() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.set_step(1);

        let result = MarkStepDoneTool.execute(json!({}), &ctx).await;

        assert!(result.is_error);
        assert!(result.content.contains("Missing required parameter"));
        assert!(ctx.drain_signals().await.is_empty());
    }

    #[tokio::test]
    async fn test_mark_step_done_without_active_step() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");

        let result = MarkStepDoneTool.execute(json!({"summary": "done"}), &ctx).await;
        assert!(result.is_error);
    }
}
