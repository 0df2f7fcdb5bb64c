//! Iteration budgeting

use serde::Serialize;
use tracing::debug;

/// Iterations allowed per step and for the whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IterationBudget {
    /// Iterations one step may consume before it is failed
    pub per_step: u32,

    /// Iterations the run may consume in total
    pub effective: u32,
}

impl IterationBudget {
    /// `per_step = min(total / steps + 2, cap)`, `effective = per_step * steps`
    pub fn compute(total: u32, steps: usize, cap: u32) -> Self {
        debug!(total, steps, cap, "IterationBudget::compute: called");
        if steps == 0 {
            return Self {
                per_step: 0,
                effective: 0,
            };
        }
        let steps = u32::try_from(steps).unwrap_or(u32::MAX);
        let per_step = (total / steps).saturating_add(2).min(cap);
        Self {
            per_step,
            effective: per_step.saturating_mul(steps),
        }
    }
}

impl std::fmt::Display for IterationBudget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} per step, {} total", self.per_step, self.effective)
    }
}
