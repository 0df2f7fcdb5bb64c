//! Stepwise - resumable plan execution for autonomous coding workers
//!
//! Stepwise drives a single worker's LLM conversation through an ordered
//! implementation plan. It tracks per-step progress, infers completion when
//! the worker forgets to report it, retries transient failures, skips steps
//! blocked by permanent ones, checkpoints everything needed to resume after a
//! restart, and raises intervention signals when a worker stalls or loses
//! confidence.
//!
//! # Modules
//!
//! - [`domain`] - Plan, Step, reflection and checkpoint records
//! - [`failure`] - Error classification, dependency analysis, retry/skip cascade
//! - [`reflection`] - Self-report rules and intervention handlers
//! - [`llm`] - LLM client trait and conversation types
//! - [`tools`] - Tool trait, per-worker context, built-in tools, file registry
//! - [`state`] - Checkpoint persistence actor
//! - [`r#loop`] - Step execution engine
//! - [`config`] - Configuration types and loading
//! - [`cli`] - Command-line interface

pub mod cli;
pub mod config;
pub mod domain;
pub mod failure;
pub mod llm;
pub mod reflection;
pub mod state;
pub mod tools;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

pub use config::{Config, EngineConfig, FailureConfig, ReflectionConfig, StorageConfig};
pub use domain::{
    ConversationCheckpoint, Decision, InterventionReason, InterventionSignal, Plan, PlanDefinition, PlanError,
    PlanStatus, ReflectionSignal, SelfReport, Step, StepStatus,
};
pub use failure::{
    CascadeMode, DependencyAnalyzer, DependencyReason, ErrorClass, ErrorClassifier, FailureOutcome, FailurePolicy,
    PathOverlapAnalyzer, PatternClassifier, classify,
};
pub use llm::{CompletionRequest, CompletionResponse, LlmClient, LlmError, Message, StopReason};
pub use r#loop::{CancelHandle, CancelToken, IterationBudget, RunOutcome, StepEngine};
pub use reflection::{ChannelInterventionHandler, InterventionHandler, ReflectionMonitor};
pub use state::{CheckpointStore, StateError, StateManager, StateResponse};
pub use tools::{FileRegistry, StepSignal, Tool, ToolContext, ToolError, ToolExecutor, ToolResult};
