//! Plan error types

use thiserror::Error;

use super::plan::PlanStatus;
use super::step::StepStatus;

/// Programmer errors raised by plan and step mutators
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("Step {index} not found (plan has {count} steps)")]
    StepNotFound { index: usize, count: usize },

    #[error("Plan has no current step")]
    NoCurrentStep,

    #[error("Illegal transition for step {index}: {from} -> {to}")]
    IllegalTransition {
        index: usize,
        from: StepStatus,
        to: StepStatus,
    },

    #[error("Cannot advance past step {index}: step is {status}")]
    StepNotTerminal { index: usize, status: StepStatus },

    #[error("Cannot finish plan: step {index} is still {status}")]
    StepsRemaining { index: usize, status: StepStatus },

    #[error("Plan {task_id} is {status}, cannot {action}")]
    InvalidPlanStatus {
        task_id: String,
        status: PlanStatus,
        action: &'static str,
    },

    #[error("Plan has no steps")]
    EmptyPlan,

    #[error("Invalid plan definition: {0}")]
    InvalidDefinition(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_illegal_transition_message() {
        let err = PlanError::IllegalTransition {
            index: 2,
            from: StepStatus::Completed,
            to: StepStatus::Pending,
        };

        let msg = err.to_string();
        assert!(msg.contains("step 2"));
        assert!(msg.contains("completed -> pending"));
    }

    #[test]
    fn test_invalid_plan_status_message() {
        let err = PlanError::InvalidPlanStatus {
            task_id: "abc123-task-demo".to_string(),
            status: PlanStatus::Completed,
            action: "start",
        };

        assert_eq!(err.to_string(), "Plan abc123-task-demo is completed, cannot start");
    }
}
