//! report_step_failure tool - worker-reported step failure

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::warn;

use crate::tools::{StepSignal, Tool, ToolContext, ToolError, ToolResult};

/// Report that the current step cannot be completed
pub struct ReportStepFailureTool;

#[async_trait]
impl Tool for ReportStepFailureTool {
    fn name(&self) -> &'static str {
        super::REPORT_STEP_FAILURE
    }

    fn description(&self) -> &'static str {
        "Report that the current step failed. Include the exact error message; transient errors are retried."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Error message describing the failure"
                }
            },
            "required": ["message"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(message) = input.get("message").and_then(Value::as_str).map(str::trim) else {
            return ToolError::MissingArgument("message").into();
        };
        if message.is_empty() {
            return ToolError::InvalidArgument("message must not be empty".to_string()).into();
        }
        let Some(step_index) = ctx.step_index() else {
            return ToolError::NoActiveStep.into();
        };

        warn!(worker_id = %ctx.worker_id, step_index, %message, "Step failure reported");
        ctx.push_signal(StepSignal::Failure {
            step_index,
            message: message.to_string(),
        })
        .await;

        ToolResult::success(format!("Failure recorded for step {}", step_index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_report_failure_records_signal() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.set_step(3);

        let result = ReportStepFailureTool
            .execute(json!({"message": "  connection reset  "}), &ctx)
            .await;

        assert!(!result.is_error);
        assert_eq!(
            ctx.drain_signals().await,
            vec![StepSignal::Failure {
                step_index: 3,
                message: "connection reset".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn test_report_failure_requires_message() {
        let temp = tempdir().unwrap();
        let ctx = ToolContext::new(temp.path().to_path_buf(), "w1");
        ctx.set_step(1);

        assert!(ReportStepFailureTool.execute(json!({}), &ctx).await.is_error);
        assert!(ReportStepFailureTool.execute(json!({"message": " "}), &ctx).await.is_error);
        assert!(ctx.drain_signals().await.is_empty());
    }
}
