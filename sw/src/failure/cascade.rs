//! Step failure handling: retry or fail, then skip dependents
//!
//! A transient failure with retries left puts the step back to Pending
//! without moving the plan cursor. Anything else fails the step and skips
//! every later Pending step that needs its output.

use std::sync::Arc;

use checkpointstore::now_ms;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::FailureConfig;
use crate::domain::{ErrorClass, Plan, PlanError, Step, StepStatus};

use super::classifier::{ErrorClassifier, PatternClassifier};
use super::dependency::{DependencyAnalyzer, DependencyReason, PathOverlapAnalyzer, first_overlap};

/// How far a permanent failure propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum CascadeMode {
    /// One forward scan from the failed step; skipped steps do not block others
    #[default]
    SinglePass,
    /// Skipped steps also block their own dependents, until nothing changes
    FixedPoint,
}

/// What happened to a failed step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Step reset to Pending for another attempt
    Retry { attempt: u32, max_retries: u32 },
    /// Step failed for good; `skipped` lists dependents that were skipped
    Failed {
        reason: String,
        class: ErrorClass,
        skipped: Vec<usize>,
    },
}

/// Classifier, analyzer and cascade mode used on step failure
#[derive(Clone)]
pub struct FailurePolicy {
    classifier: Arc<dyn ErrorClassifier>,
    analyzer: Arc<dyn DependencyAnalyzer>,
    mode: CascadeMode,
}

impl FailurePolicy {
    pub fn new(classifier: Arc<dyn ErrorClassifier>, analyzer: Arc<dyn DependencyAnalyzer>, mode: CascadeMode) -> Self {
        Self {
            classifier,
            analyzer,
            mode,
        }
    }

    /// Pattern classifier with configured extras and path-overlap analysis
    pub fn from_config(config: &FailureConfig) -> Self {
        debug!(mode = ?config.cascade_mode, extra = config.transient_patterns.len(), "FailurePolicy::from_config: called");
        Self::new(
            Arc::new(PatternClassifier::with_extra_patterns(&config.transient_patterns)),
            Arc::new(PathOverlapAnalyzer),
            config.cascade_mode,
        )
    }

    pub fn mode(&self) -> CascadeMode {
        self.mode
    }

    pub fn classify(&self, message: &str) -> ErrorClass {
        self.classifier.classify(message)
    }

    /// Apply a failure message to an in-progress step
    pub fn handle_step_failure(
        &self,
        plan: &mut Plan,
        step_index: usize,
        message: &str,
    ) -> Result<FailureOutcome, PlanError> {
        debug!(task_id = %plan.task_id, step_index, %message, "handle_step_failure: called");
        let class = self.classifier.classify(message);
        let step = plan.step_mut(step_index)?;

        if class == ErrorClass::Transient && step.can_retry() {
            step.reset_for_retry(message, class)?;
            let attempt = step.retry_count;
            let max_retries = step.max_retries;
            info!(step_index, attempt, max_retries, "Transient step failure, retrying");
            plan.add_log_entry(format!(
                "Step {} failed transiently, retry {}/{}: {}",
                step_index, attempt, max_retries, message
            ));
            return Ok(FailureOutcome::Retry { attempt, max_retries });
        }

        let reason = match class {
            ErrorClass::Transient => format!("max retries exhausted: {}", message),
            ErrorClass::Permanent => message.to_string(),
        };
        step.fail(&reason, class, now_ms())?;
        warn!(step_index, %class, %reason, "Step failed");
        plan.add_log_entry(format!("Step {} failed ({}): {}", step_index, class, reason));

        let skipped = self.cascade_skip(plan, step_index)?;
        Ok(FailureOutcome::Failed { reason, class, skipped })
    }

    /// Skip later Pending steps that depend on a failed step
    ///
    /// Safe to call repeatedly: already-skipped steps are no longer Pending.
    pub fn cascade_skip(&self, plan: &mut Plan, failed_index: usize) -> Result<Vec<usize>, PlanError> {
        debug!(task_id = %plan.task_id, failed_index, mode = ?self.mode, "cascade_skip: called");
        let failed = plan.step(failed_index)?.clone();

        let mut skipped = self.skip_dependents(plan, &failed, "failed")?;

        if self.mode == CascadeMode::FixedPoint {
            let mut frontier = skipped.clone();
            while let Some(index) = frontier.pop() {
                let blocker = plan.step(index)?.clone();
                let more = self.skip_dependents(plan, &blocker, "skipped")?;
                frontier.extend(more.iter().copied());
                skipped.extend(more);
            }
            skipped.sort_unstable();
        }

        if !skipped.is_empty() {
            info!(failed_index, ?skipped, "Cascade skipped dependent steps");
        }
        Ok(skipped)
    }

    fn skip_dependents(&self, plan: &mut Plan, blocker: &Step, kind: &str) -> Result<Vec<usize>, PlanError> {
        let now = now_ms();
        let mut skipped = Vec::new();
        let mut entries = Vec::new();

        for step in plan.steps.iter_mut() {
            if step.index <= blocker.index || step.status != StepStatus::Pending {
                continue;
            }
            if let Some(reason) = self.blocking_reason(step, blocker) {
                let text = format!("blocked by {} step {}: {}", kind, blocker.index, reason);
                step.skip(&text, now)?;
                entries.push(format!("Step {} skipped, {}", step.index, text));
                skipped.push(step.index);
            }
        }

        for entry in entries {
            plan.add_log_entry(entry);
        }
        Ok(skipped)
    }

    fn blocking_reason(&self, step: &Step, blocker: &Step) -> Option<DependencyReason> {
        if let Some(file) = first_overlap(&step.files_to_modify, &blocker.outputs()) {
            return Some(DependencyReason::ModifiesOutput { file });
        }
        self.analyzer.dependency(step, blocker)
    }
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::from_config(&FailureConfig::default())
    }
}

impl std::fmt::Debug for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailurePolicy").field("mode", &self.mode).finish()
    }
}
