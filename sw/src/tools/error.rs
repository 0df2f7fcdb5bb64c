//! Tool error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during tool execution
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Path {path} escapes worktree {worktree}")]
    SandboxViolation { path: PathBuf, worktree: PathBuf },

    #[error("Must read file before editing: {path}")]
    EditWithoutRead { path: String },

    #[error("Tool not found: {name}")]
    UnknownTool { name: String },

    #[error("Missing required parameter: {0}")]
    MissingArgument(&'static str),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("old_string not found in {path}. Make sure it matches exactly including whitespace.")]
    PatternNotFound { path: String },

    #[error("old_string found {count} times, expected 1 (use replace_all=true for multiple)")]
    PatternNotUnique { count: usize },

    #[error("No step is in progress")]
    NoActiveStep,
}
