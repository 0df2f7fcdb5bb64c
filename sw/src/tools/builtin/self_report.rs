//! self_report tool - structured progress report

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;

use crate::domain::SelfReport;
use crate::tools::{StepSignal, Tool, ToolContext, ToolError, ToolResult};

/// Submit a progress/confidence report for the current step
pub struct SelfReportTool;

#[async_trait]
impl Tool for SelfReportTool {
    fn name(&self) -> &'static str {
        super::SELF_REPORT
    }

    fn description(&self) -> &'static str {
        "Report progress on the current step: percent done, confidence, blockers and whether to continue, pivot or escalate."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "progress": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 100,
                    "description": "Percent of the current step completed"
                },
                "confidence": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 100,
                    "description": "Confidence that the step will succeed"
                },
                "blockers": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "files_completed": {
                    "type": "array",
                    "items": { "type": "string" }
                },
                "decision": {
                    "type": "string",
                    "enum": ["continue", "pivot", "escalate"]
                },
                "notes": { "type": "string" }
            },
            "required": ["progress", "confidence"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        debug!(?input, "SelfReportTool::execute: called");
        let report = match SelfReport::from_value(&input) {
            Ok(r) => r,
            Err(e) => return ToolError::InvalidArgument(e).into(),
        };
        let Some(step_index) = ctx.step_index() else {
            return ToolError::NoActiveStep.into();
        };

        let message = format!(
            "Report recorded for step {}: {}% done, confidence {}",
            step_index, report.progress, report.confidence
        );
        ctx.push_signal(StepSignal::SelfReport { step_index, report }).await;
        ToolResult::success(message)
    }
}
