//! Plan domain type
//!
//! A Plan is one worker's ordered list of steps for a (project, task) pair.
//! It is created by an external planner, mutated only by the step engine,
//! persisted after every state change and never deleted.

use checkpointstore::{Document, now_ms};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PlanError;
use super::id::generate_id;
use super::reflection::{InterventionSignal, ReflectionSignal};
use super::step::{Step, StepStatus};

/// Plan status in the execution lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    /// Being drafted by the planner
    #[default]
    Planning,
    /// Steps fixed, waiting for a worker
    Ready,
    /// A worker owns the plan
    InProgress,
    /// Every step terminal and none failed
    Completed,
    /// Every step terminal with at least one failure
    Failed,
}

impl PlanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Planning => write!(f, "planning"),
            Self::Ready => write!(f, "ready"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for PlanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "planning" => Ok(Self::Planning),
            "ready" => Ok(Self::Ready),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("Unknown plan status: {}", other)),
        }
    }
}

/// One line of the execution log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: i64,
    pub message: String,
}

/// An implementation plan for one (project, task)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    /// Unique identifier (e.g., "019430-task-add-oauth")
    pub task_id: String,

    pub project_id: String,

    /// Task description the plan implements
    pub description: String,

    pub status: PlanStatus,

    pub steps: Vec<Step>,

    /// 0-based cursor into `steps`; equals `steps.len()` once past the end
    pub current_step_index: usize,

    pub error_message: Option<String>,

    /// Append-only execution log
    #[serde(default)]
    pub log: Vec<LogEntry>,

    /// Append-only self-report history
    #[serde(default)]
    pub reflections: Vec<ReflectionSignal>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Plan {
    /// Create a Plan with a generated task ID
    pub fn new(project_id: impl Into<String>, description: impl Into<String>, steps: Vec<Step>) -> Self {
        let description = description.into();
        let task_id = generate_id("task", &description);
        Self::with_id(task_id, project_id, description, steps)
    }

    /// Create a Plan with a specific task ID
    pub fn with_id(
        task_id: impl Into<String>,
        project_id: impl Into<String>,
        description: impl Into<String>,
        steps: Vec<Step>,
    ) -> Self {
        let now = now_ms();
        Self {
            task_id: task_id.into(),
            project_id: project_id.into(),
            description: description.into(),
            status: PlanStatus::Planning,
            steps,
            current_step_index: 0,
            error_message: None,
            log: Vec::new(),
            reflections: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Planning -> Ready
    pub fn mark_ready(&mut self) -> Result<(), PlanError> {
        debug!(task_id = %self.task_id, status = %self.status, "Plan::mark_ready: called");
        if self.status != PlanStatus::Planning {
            return Err(self.invalid_status("mark ready"));
        }
        if self.steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }
        self.status = PlanStatus::Ready;
        self.add_log_entry(format!("Plan ready with {} steps", self.steps.len()));
        Ok(())
    }

    /// Ready -> InProgress; a plan already InProgress is being resumed
    pub fn start(&mut self) -> Result<(), PlanError> {
        debug!(task_id = %self.task_id, status = %self.status, "Plan::start: called");
        match self.status {
            PlanStatus::Ready => {
                self.status = PlanStatus::InProgress;
                self.add_log_entry("Execution started");
                Ok(())
            }
            PlanStatus::InProgress => {
                self.add_log_entry("Execution resumed");
                Ok(())
            }
            _ => Err(self.invalid_status("start")),
        }
    }

    /// Step under the cursor, if any
    pub fn current_step(&self) -> Option<&Step> {
        self.steps.get(self.current_step_index)
    }

    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        self.steps.get_mut(self.current_step_index)
    }

    /// Look up a step by its 1-based index
    pub fn step(&self, index: usize) -> Result<&Step, PlanError> {
        let count = self.steps.len();
        index
            .checked_sub(1)
            .and_then(|i| self.steps.get(i))
            .ok_or(PlanError::StepNotFound { index, count })
    }

    pub fn step_mut(&mut self, index: usize) -> Result<&mut Step, PlanError> {
        let count = self.steps.len();
        index
            .checked_sub(1)
            .and_then(|i| self.steps.get_mut(i))
            .ok_or(PlanError::StepNotFound { index, count })
    }

    /// Move the cursor past the current step
    ///
    /// The current step must be terminal; a step reset for retry is Pending
    /// and therefore holds the cursor. Steps already made terminal ahead of
    /// the cursor (skipped by a cascade) are passed over as well.
    pub fn advance_to_next_step(&mut self) -> Result<(), PlanError> {
        debug!(task_id = %self.task_id, cursor = self.current_step_index, "Plan::advance_to_next_step: called");
        let step = self.current_step().ok_or(PlanError::NoCurrentStep)?;
        if !step.is_terminal() {
            return Err(PlanError::StepNotTerminal {
                index: step.index,
                status: step.status,
            });
        }
        let from = step.index;

        self.current_step_index += 1;
        while self.current_step().is_some_and(Step::is_terminal) {
            self.current_step_index += 1;
        }

        let message = match self.current_step() {
            Some(next) => format!("Advanced from step {} to step {}", from, next.index),
            None => format!("Advanced past final step {}", from),
        };
        self.add_log_entry(message);
        Ok(())
    }

    /// Whether any step is still Pending or InProgress
    pub fn has_executable_steps(&self) -> bool {
        self.steps.iter().any(Step::is_executable)
    }

    /// Indices of steps that failed
    pub fn failed_steps(&self) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.index)
            .collect()
    }

    /// Highest K such that steps 1..=K are all terminal
    pub fn completed_through(&self) -> usize {
        self.steps.iter().take_while(|s| s.is_terminal()).count()
    }

    /// Mark the plan Completed; every step must be terminal
    pub fn mark_completed(&mut self) -> Result<(), PlanError> {
        debug!(task_id = %self.task_id, "Plan::mark_completed: called");
        if self.status.is_terminal() {
            return Err(self.invalid_status("complete"));
        }
        if let Some(step) = self.steps.iter().find(|s| s.is_executable()) {
            return Err(PlanError::StepsRemaining {
                index: step.index,
                status: step.status,
            });
        }
        self.status = PlanStatus::Completed;
        self.add_log_entry("Plan completed");
        Ok(())
    }

    /// Mark the plan Failed with a reason
    pub fn mark_failed(&mut self, reason: impl Into<String>) -> Result<(), PlanError> {
        let reason = reason.into();
        debug!(task_id = %self.task_id, %reason, "Plan::mark_failed: called");
        if self.status.is_terminal() {
            return Err(self.invalid_status("fail"));
        }
        self.status = PlanStatus::Failed;
        self.add_log_entry(format!("Plan failed: {}", reason));
        self.error_message = Some(reason);
        Ok(())
    }

    /// Settle the final status once no step is executable
    ///
    /// Completed when no step failed, otherwise Failed with the failed step
    /// indices in the error message.
    pub fn finalize(&mut self) -> Result<PlanStatus, PlanError> {
        debug!(task_id = %self.task_id, "Plan::finalize: called");
        if let Some(step) = self.steps.iter().find(|s| s.is_executable()) {
            return Err(PlanError::StepsRemaining {
                index: step.index,
                status: step.status,
            });
        }

        let failed = self.failed_steps();
        if failed.is_empty() {
            self.mark_completed()?;
        } else {
            let list = failed.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", ");
            self.mark_failed(format!("steps failed: {}", list))?;
        }
        Ok(self.status)
    }

    /// Append a timestamped log entry
    pub fn add_log_entry(&mut self, message: impl Into<String>) {
        let now = now_ms();
        self.log.push(LogEntry {
            timestamp: now,
            message: message.into(),
        });
        self.updated_at = now;
    }

    /// Append a reflection record
    pub fn record_reflection(&mut self, signal: ReflectionSignal) {
        debug!(task_id = %self.task_id, triggered = signal.triggered, "Plan::record_reflection: called");
        self.reflections.push(signal);
        self.updated_at = now_ms();
    }

    /// Intervention derived from the most recent triggered reflection
    pub fn latest_intervention(&self) -> Option<InterventionSignal> {
        self.reflections
            .iter()
            .rev()
            .find(|r| r.triggered)
            .and_then(|r| InterventionSignal::from_reflection(&self.project_id, &self.task_id, r))
    }

    /// Acknowledge the most recent triggered reflection
    ///
    /// Returns the acknowledged intervention, or None if nothing has
    /// triggered. Acknowledging twice keeps the first timestamp.
    pub fn acknowledge_intervention(&mut self) -> Option<InterventionSignal> {
        debug!(task_id = %self.task_id, "Plan::acknowledge_intervention: called");
        let now = now_ms();
        let signal = self.reflections.iter_mut().rev().find(|r| r.triggered)?;
        if signal.acknowledged_at.is_none() {
            signal.acknowledged_at = Some(now);
        }
        let signal = signal.clone();
        self.add_log_entry(format!("Intervention acknowledged for step {}", signal.step_index));
        InterventionSignal::from_reflection(&self.project_id, &self.task_id, &signal)
    }

    fn invalid_status(&self, action: &'static str) -> PlanError {
        PlanError::InvalidPlanStatus {
            task_id: self.task_id.clone(),
            status: self.status,
            action,
        }
    }
}

impl Document for Plan {
    fn collection_name() -> &'static str {
        "plans"
    }

    fn scope(&self) -> &str {
        &self.project_id
    }

    fn id(&self) -> &str {
        &self.task_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }
}
