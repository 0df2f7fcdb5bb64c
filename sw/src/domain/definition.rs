//! Plan definitions produced by an external planner
//!
//! ```yaml
//! description: Add a connection pool
//! steps:
//!   - title: Pool module
//!     description: Create the pool
//!     files-to-create: [src/pool.rs]
//!   - title: Wire pool
//!     files-to-modify: [src/main.rs]
//!     files-to-read: [src/pool.rs]
//!     depends-on: [1]
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::PlanError;
use super::plan::Plan;
use super::step::Step;

/// A plan as written by the planner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanDefinition {
    pub description: String,

    /// Use this task ID instead of generating one
    #[serde(rename = "task-id", default)]
    pub task_id: Option<String>,

    pub steps: Vec<StepDefinition>,
}

/// One step of a plan definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub title: String,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "files-to-create", default)]
    pub files_to_create: Vec<String>,

    #[serde(rename = "files-to-modify", default)]
    pub files_to_modify: Vec<String>,

    #[serde(rename = "files-to-read", default)]
    pub files_to_read: Vec<String>,

    /// 1-based indices of earlier steps
    #[serde(rename = "depends-on", default)]
    pub depends_on: Vec<usize>,

    #[serde(rename = "max-retries", default)]
    pub max_retries: Option<u32>,
}

impl PlanDefinition {
    /// Parse a YAML definition
    pub fn from_yaml(content: &str) -> Result<Self, PlanError> {
        debug!(len = content.len(), "PlanDefinition::from_yaml: called");
        serde_yaml::from_str(content).map_err(|e| PlanError::InvalidDefinition(e.to_string()))
    }

    /// Build a Ready plan for a project
    pub fn into_plan(self, project_id: &str, default_max_retries: u32) -> Result<Plan, PlanError> {
        debug!(%project_id, step_count = self.steps.len(), "PlanDefinition::into_plan: called");
        if self.description.trim().is_empty() {
            return Err(PlanError::InvalidDefinition("description must not be empty".to_string()));
        }
        if self.steps.is_empty() {
            return Err(PlanError::EmptyPlan);
        }

        let mut steps = Vec::with_capacity(self.steps.len());
        for (i, def) in self.steps.into_iter().enumerate() {
            let index = i + 1;
            if def.title.trim().is_empty() {
                return Err(PlanError::InvalidDefinition(format!("step {} has no title", index)));
            }
            if let Some(dep) = def.depends_on.iter().find(|d| **d == 0 || **d >= index) {
                return Err(PlanError::InvalidDefinition(format!(
                    "step {} depends on step {}, which is not an earlier step",
                    index, dep
                )));
            }

            steps.push(
                Step::new(index, def.title, def.description)
                    .with_creates(def.files_to_create)
                    .with_modifies(def.files_to_modify)
                    .with_reads(def.files_to_read)
                    .with_depends_on(def.depends_on)
                    .with_max_retries(def.max_retries.unwrap_or(default_max_retries)),
            );
        }

        let mut plan = match self.task_id {
            Some(task_id) => Plan::with_id(task_id, project_id, self.description, steps),
            None => Plan::new(project_id, self.description, steps),
        };
        plan.mark_ready()?;
        Ok(plan)
    }
}
