//! Domain types for plan execution
//!
//! Plans and their steps are mutated only through methods that enforce the
//! step state machine; illegal transitions are reported as [`PlanError`].

mod checkpoint;
mod definition;
mod error;
mod id;
mod paths;
mod plan;
mod reflection;
mod step;

pub use checkpoint::{ConversationCheckpoint, StoredMessage};
pub use checkpointstore::now_ms;
pub use definition::{PlanDefinition, StepDefinition};
pub use error::PlanError;
pub use id::{generate_id, slugify};
pub use paths::normalize_path;
pub use plan::{LogEntry, Plan, PlanStatus};
pub use reflection::{Decision, InterventionReason, InterventionSignal, ReflectionSignal, SelfReport};
pub use step::{DEFAULT_MAX_RETRIES, ErrorClass, Step, StepMetrics, StepStatus};
