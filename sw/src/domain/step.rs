//! Step domain type
//!
//! A Step is one unit of work inside a Plan. Its status moves forward only:
//!
//! ```text
//! Pending -> InProgress -> Completed | Failed
//!    ^           |
//!    +-(retry)---+
//! Pending -> Skipped
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PlanError;
use super::paths::normalize_path;

/// Retries allowed for a transient step failure unless the plan says otherwise
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Step status in the execution state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started, or reset for retry
    #[default]
    Pending,
    /// Worker is executing this step
    InProgress,
    /// Finished, explicitly or by inference
    Completed,
    /// Not executed because a step it depends on failed
    Skipped,
    /// Failed permanently or exhausted its retries
    Failed,
}

impl StepStatus {
    /// Completed, Skipped and Failed are immutable
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Skipped | Self::Failed)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Classification of a step failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network, timeout or rate-limit shaped; worth retrying
    Transient,
    /// Everything else
    Permanent,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Execution metrics for a step
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepMetrics {
    /// LLM turns spent on this step, across retries and resumes
    pub iterations: u32,

    /// Completed by inference rather than an explicit completion call
    pub auto_completed: bool,

    /// Self-reports received while this step was current
    #[serde(default)]
    pub self_reports: u32,
}

/// One unit of work in a Plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// 1-based position in the plan
    pub index: usize,

    pub title: String,

    pub description: String,

    pub status: StepStatus,

    /// Files this step is expected to create
    #[serde(default)]
    pub files_to_create: Vec<String>,

    /// Files this step is expected to modify
    #[serde(default)]
    pub files_to_modify: Vec<String>,

    /// Files this step reads as input
    #[serde(default)]
    pub files_to_read: Vec<String>,

    /// Explicit 1-based predecessor indices
    #[serde(default)]
    pub depends_on: Vec<usize>,

    /// Summary reported on completion
    pub output: Option<String>,

    /// Why the step was skipped
    pub skip_reason: Option<String>,

    pub started_at: Option<i64>,

    pub completed_at: Option<i64>,

    pub retry_count: u32,

    pub max_retries: u32,

    pub last_error: Option<String>,

    pub error_category: Option<ErrorClass>,

    #[serde(default)]
    pub metrics: StepMetrics,
}

impl Step {
    /// Create a pending step
    pub fn new(index: usize, title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            index,
            title: title.into(),
            description: description.into(),
            status: StepStatus::Pending,
            files_to_create: Vec::new(),
            files_to_modify: Vec::new(),
            files_to_read: Vec::new(),
            depends_on: Vec::new(),
            output: None,
            skip_reason: None,
            started_at: None,
            completed_at: None,
            retry_count: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            last_error: None,
            error_category: None,
            metrics: StepMetrics::default(),
        }
    }

    pub fn with_creates<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_to_create = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_modifies<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_to_modify = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_reads<I, S>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.files_to_read = files.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_depends_on(mut self, steps: Vec<usize>) -> Self {
        self.depends_on = steps;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Files this step is supposed to create, normalized and deduplicated
    ///
    /// Modified files are not outputs: they exist before the step runs.
    pub fn outputs(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for file in &self.files_to_create {
            let norm = normalize_path(file);
            if !norm.is_empty() && !out.contains(&norm) {
                out.push(norm);
            }
        }
        out
    }

    /// Terminal steps never change again
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Pending or InProgress
    pub fn is_executable(&self) -> bool {
        !self.is_terminal()
    }

    /// Short label for logs and prompts
    pub fn label(&self) -> String {
        format!("step {} ({})", self.index, self.title)
    }

    /// Pending -> InProgress
    pub fn start(&mut self, now: i64) -> Result<(), PlanError> {
        debug!(index = self.index, status = %self.status, "Step::start: called");
        self.transition(StepStatus::Pending, StepStatus::InProgress)?;
        self.started_at = Some(now);
        Ok(())
    }

    /// InProgress -> Completed
    pub fn complete(&mut self, output: Option<String>, auto_completed: bool, now: i64) -> Result<(), PlanError> {
        debug!(index = self.index, auto_completed, "Step::complete: called");
        self.transition(StepStatus::InProgress, StepStatus::Completed)?;
        self.output = output;
        self.completed_at = Some(now);
        self.metrics.auto_completed = auto_completed;
        Ok(())
    }

    /// InProgress -> Pending, consuming one retry
    pub fn reset_for_retry(&mut self, error: impl Into<String>, class: ErrorClass) -> Result<(), PlanError> {
        debug!(index = self.index, retry_count = self.retry_count, "Step::reset_for_retry: called");
        self.transition(StepStatus::InProgress, StepStatus::Pending)?;
        self.retry_count += 1;
        self.started_at = None;
        self.last_error = Some(error.into());
        self.error_category = Some(class);
        Ok(())
    }

    /// InProgress -> Failed
    pub fn fail(&mut self, reason: impl Into<String>, class: ErrorClass, now: i64) -> Result<(), PlanError> {
        debug!(index = self.index, %class, "Step::fail: called");
        self.transition(StepStatus::InProgress, StepStatus::Failed)?;
        self.last_error = Some(reason.into());
        self.error_category = Some(class);
        self.completed_at = Some(now);
        Ok(())
    }

    /// Pending -> Skipped
    pub fn skip(&mut self, reason: impl Into<String>, now: i64) -> Result<(), PlanError> {
        debug!(index = self.index, "Step::skip: called");
        self.transition(StepStatus::Pending, StepStatus::Skipped)?;
        self.skip_reason = Some(reason.into());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Whether another transient failure may be retried
    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    fn transition(&mut self, expected: StepStatus, to: StepStatus) -> Result<(), PlanError> {
        if self.status != expected {
            debug!(index = self.index, from = %self.status, %to, "Step::transition: rejected");
            return Err(PlanError::IllegalTransition {
                index: self.index,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}
