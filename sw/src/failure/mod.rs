//! Failure classification, retry and dependency cascade

mod cascade;
mod classifier;
mod dependency;

pub use crate::domain::ErrorClass;
pub use cascade::{CascadeMode, FailureOutcome, FailurePolicy};
pub use classifier::{DEFAULT_TRANSIENT_PATTERNS, ErrorClassifier, PatternClassifier, classify};
pub use dependency::{DependencyAnalyzer, DependencyReason, PathOverlapAnalyzer};
