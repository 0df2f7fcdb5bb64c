//! Tool system for step workers
//!
//! Tools give the worker file access and let it signal step completion,
//! failure and progress. Each worker gets a `ToolContext` scoped to its
//! working directory; file tools cannot escape that sandbox.

mod context;
mod error;
mod executor;
mod registry;
mod signal;
mod traits;

pub mod builtin;

pub use context::{FileActivity, ToolContext};
pub use error::ToolError;
pub use executor::ToolExecutor;
pub use registry::{FileClaim, FileRegistry};
pub use signal::StepSignal;
pub use traits::{Tool, ToolResult};
