//! Step execution loop
//!
//! [`StepEngine`] runs one plan for one worker. Budgets, cancellation,
//! inferred completion and prompt text live in their own modules.

mod budget;
mod cancel;
mod completion;
mod engine;
mod prompts;

pub use budget::IterationBudget;
pub use cancel::{CancelHandle, CancelToken, cancel_pair};
pub use completion::infer_completion;
pub use engine::{RunOutcome, StepEngine};
