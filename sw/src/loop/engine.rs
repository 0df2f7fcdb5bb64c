//! StepEngine - drives one worker's conversation through a plan
//!
//! Each iteration sends the conversation to the LLM, runs any requested tools
//! sequentially, then applies the step signals the tools recorded. Steps
//! complete explicitly through `mark_step_done` or by inference from the
//! files the worker touched. Plan and conversation are checkpointed after
//! every completion so a restarted run picks up where it stopped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::budget::IterationBudget;
use super::cancel::CancelToken;
use super::completion::infer_completion;
use super::prompts;
use crate::config::{Config, EngineConfig};
use crate::domain::{ErrorClass, Plan, PlanError, PlanStatus, SelfReport, StepStatus, now_ms};
use crate::failure::{FailureOutcome, FailurePolicy};
use crate::llm::{
    CompletionRequest, CompletionResponse, ContentBlock, LlmClient, Message, MessageContent, Role, StopReason,
    TokenUsage, ToolDefinition,
};
use crate::reflection::{InterventionHandler, ReflectionMonitor};
use crate::state::CheckpointStore;
use crate::tools::{FileRegistry, StepSignal, ToolContext, ToolExecutor, ToolResult};

/// Output recorded on a step completed by inference
const AUTO_COMPLETED_OUTPUT: &str = "auto-completed: declared outputs present";

/// Wait used when a rate-limit error carries no retry hint
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_secs(60);

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum RunOutcome {
    /// Every step terminal and none failed
    Completed,
    /// Every step terminal with at least one failure
    Failed { reason: String },
    /// Stopped by the cancel token; resumable
    Cancelled,
    /// Run-wide iteration budget used up; resumable
    BudgetExhausted { iterations: u32 },
    /// Provider error or unusable stop reason
    Fatal { reason: String },
    /// Worker ended its turn while steps remained; resumable
    Incomplete,
}

impl RunOutcome {
    /// Whether running the same plan again can make progress
    pub fn is_resumable(&self) -> bool {
        matches!(self, Self::Cancelled | Self::BudgetExhausted { .. } | Self::Incomplete)
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed { reason } => write!(f, "failed: {}", reason),
            Self::Cancelled => write!(f, "cancelled"),
            Self::BudgetExhausted { iterations } => write!(f, "budget exhausted after {} iterations", iterations),
            Self::Fatal { reason } => write!(f, "fatal: {}", reason),
            Self::Incomplete => write!(f, "incomplete"),
        }
    }
}

/// Why an LLM call produced no response
enum CallFailure {
    Cancelled,
    Fatal(String),
}

/// Executes a plan's steps for a single worker
pub struct StepEngine {
    worker_id: String,
    config: EngineConfig,
    llm: Arc<dyn LlmClient>,
    store: Arc<dyn CheckpointStore>,
    tool_executor: ToolExecutor,
    worktree: PathBuf,
    policy: FailurePolicy,
    monitor: ReflectionMonitor,
    cancel: CancelToken,
    registry: Option<FileRegistry>,

    /// Conversation sent on every call
    messages: Vec<Message>,

    /// LLM calls made in this run
    iteration: u32,

    /// LLM calls made on the current step
    step_iterations: u32,

    usage: TokenUsage,
}

impl StepEngine {
    pub fn new(
        worker_id: impl Into<String>,
        config: &Config,
        llm: Arc<dyn LlmClient>,
        store: Arc<dyn CheckpointStore>,
        worktree: PathBuf,
    ) -> Self {
        let worker_id = worker_id.into();
        debug!(%worker_id, worktree = %worktree.display(), "StepEngine::new: called");
        Self {
            worker_id,
            config: config.engine.clone(),
            llm,
            store,
            tool_executor: ToolExecutor::standard(),
            worktree,
            policy: FailurePolicy::from_config(&config.failure),
            monitor: ReflectionMonitor::new(config.reflection.clone()),
            cancel: CancelToken::never(),
            registry: None,
            messages: Vec::new(),
            iteration: 0,
            step_iterations: 0,
            usage: TokenUsage::default(),
        }
    }

    pub fn with_tool_executor(mut self, tool_executor: ToolExecutor) -> Self {
        self.tool_executor = tool_executor;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Share a project-wide advisory file registry
    pub fn with_registry(mut self, registry: FileRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_intervention_handler(mut self, handler: Arc<dyn InterventionHandler>) -> Self {
        self.monitor = ReflectionMonitor::new(self.monitor.config().clone()).with_handler(handler);
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn iteration(&self) -> u32 {
        self.iteration
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Run the plan until it finishes or the run has to stop
    ///
    /// Errors are reserved for broken invariants and plans in a state that
    /// cannot be run; everything else is reported through [`RunOutcome`].
    pub async fn run(&mut self, plan: &mut Plan) -> eyre::Result<RunOutcome> {
        info!(worker_id = %self.worker_id, task_id = %plan.task_id, status = %plan.status, "Starting plan run");

        match plan.status {
            PlanStatus::Completed => return Ok(RunOutcome::Completed),
            PlanStatus::Failed => {
                return Ok(RunOutcome::Failed {
                    reason: plan.error_message.clone().unwrap_or_default(),
                });
            }
            PlanStatus::Planning => plan.mark_ready()?,
            PlanStatus::Ready | PlanStatus::InProgress => {}
        }

        let budget = IterationBudget::compute(
            self.config.total_iteration_budget,
            plan.steps.len(),
            self.config.max_per_step_iterations,
        );
        info!(task_id = %plan.task_id, %budget, "Iteration budget");

        let mut ctx = ToolContext::new(self.worktree.clone(), self.worker_id.clone())
            .with_plan(plan.project_id.clone(), plan.task_id.clone());
        if let Some(registry) = &self.registry {
            ctx = ctx.with_registry(registry.clone());
        }

        let tools = if self.config.tools.is_empty() {
            self.tool_executor.definitions()
        } else {
            self.tool_executor.definitions_for(&self.config.tools)
        };

        self.restore_conversation(plan).await;
        plan.start()?;
        self.persist_plan(plan).await;

        let outcome = self.drive(plan, &ctx, &tools, budget).await;

        if let Some(registry) = &self.registry {
            let released = registry.release_worker(&self.worker_id).await;
            debug!(worker_id = %self.worker_id, released, "run: released file claims");
        }

        match &outcome {
            Ok(result) => info!(
                task_id = %plan.task_id,
                outcome = %result,
                iterations = self.iteration,
                tokens = self.usage.total(),
                "Plan run finished"
            ),
            Err(e) => warn!(task_id = %plan.task_id, error = %e, "Plan run aborted"),
        }
        outcome
    }

    async fn drive(
        &mut self,
        plan: &mut Plan,
        ctx: &ToolContext,
        tools: &[ToolDefinition],
        budget: IterationBudget,
    ) -> eyre::Result<RunOutcome> {
        loop {
            if self.cancel.is_cancelled() {
                info!(task_id = %plan.task_id, iteration = self.iteration, "Run cancelled");
                plan.add_log_entry(format!("Execution cancelled after {} iterations", self.iteration));
                self.checkpoint(plan).await;
                return Ok(RunOutcome::Cancelled);
            }

            if !plan.has_executable_steps() {
                return self.finish(plan).await;
            }

            if self.iteration >= budget.effective {
                warn!(task_id = %plan.task_id, iterations = self.iteration, "Iteration budget exhausted");
                plan.add_log_entry(format!("Iteration budget exhausted after {} iterations", self.iteration));
                self.checkpoint(plan).await;
                return Ok(RunOutcome::BudgetExhausted {
                    iterations: self.iteration,
                });
            }

            let step_index = self.prepare_step(plan, ctx).await?;

            if self.step_iterations >= budget.per_step {
                let reason = format!("iteration budget exhausted for step {}", step_index);
                self.fail_step(plan, ctx, step_index, &reason).await?;
                continue;
            }

            let interval = self.config.self_report_interval;
            if interval > 0 && self.step_iterations > 0 && self.step_iterations % interval == 0 {
                debug!(step_index, step_iterations = self.step_iterations, "drive: requesting self-report");
                let prompt = prompts::self_report_prompt(plan.step(step_index)?);
                self.push_user_text(prompt);
            }

            let request = CompletionRequest {
                system_prompt: prompts::system_prompt(plan, &self.worktree),
                messages: self.messages.clone(),
                tools: tools.to_vec(),
                max_tokens: self.config.max_tokens,
            };

            let response = match self.call_llm(request).await {
                Ok(response) => response,
                Err(CallFailure::Cancelled) => continue,
                Err(CallFailure::Fatal(reason)) => return Ok(self.fatal(plan, reason).await),
            };

            self.iteration += 1;
            self.step_iterations += 1;
            self.usage.add(&response.usage);
            plan.step_mut(step_index)?.metrics.iterations += 1;
            debug!(
                step_index,
                iteration = self.iteration,
                stop_reason = %response.stop_reason,
                tool_calls = response.tool_calls.len(),
                "drive: response received"
            );

            if let Some(message) = build_assistant_message(&response) {
                self.messages.push(message);
            }

            if !response.stop_reason.is_continuable() {
                let reason = format!("provider stopped with {}", response.stop_reason);
                return Ok(self.fatal(plan, reason).await);
            }

            match &response.stop_reason {
                StopReason::ToolUse => {
                    self.handle_tool_use(plan, ctx, step_index, &response).await?;
                }
                _ => {
                    let text = response.content.as_deref().unwrap_or_default();
                    if let Some(report) = SelfReport::from_text(text) {
                        self.record_report(plan, step_index, report)?;
                    }
                    self.try_infer_completion(plan, ctx, step_index, false).await?;

                    if !plan.has_executable_steps() {
                        return self.finish(plan).await;
                    }
                    info!(task_id = %plan.task_id, step_index, "Worker ended its turn with steps remaining");
                    plan.add_log_entry(format!("Worker ended its turn during step {}", step_index));
                    self.checkpoint(plan).await;
                    return Ok(RunOutcome::Incomplete);
                }
            }
        }
    }

    /// Put the cursor on an in-progress step and return its index
    async fn prepare_step(&mut self, plan: &mut Plan, ctx: &ToolContext) -> eyre::Result<usize> {
        if plan.current_step().is_some_and(|s| s.is_terminal()) {
            plan.advance_to_next_step()?;
        }

        let step = plan.current_step_mut().ok_or(PlanError::NoCurrentStep)?;
        let index = step.index;
        let status = step.status;

        match status {
            StepStatus::Pending => {
                let retrying = step.retry_count > 0;
                step.start(now_ms())?;
                let (prompt, entry) = if retrying {
                    (
                        prompts::retry_prompt(step),
                        format!("Retrying {} (attempt {})", step.label(), step.retry_count + 1),
                    )
                } else {
                    (prompts::step_prompt(step), format!("Started {}", step.label()))
                };
                info!(task_id = %plan.task_id, step_index = index, retrying, "Step started");

                self.step_iterations = 0;
                ctx.reset_step_tracking().await;
                self.push_user_text(prompt);
                plan.add_log_entry(entry);
                self.persist_plan(plan).await;
            }
            StepStatus::InProgress if self.messages.is_empty() => {
                let prompt = prompts::step_prompt(step);
                self.push_user_text(prompt);
            }
            _ => {}
        }

        ctx.set_step(index);
        Ok(index)
    }

    async fn handle_tool_use(
        &mut self,
        plan: &mut Plan,
        ctx: &ToolContext,
        step_index: usize,
        response: &CompletionResponse,
    ) -> eyre::Result<()> {
        ctx.begin_batch().await;
        let results = self.tool_executor.execute_all(&response.tool_calls, ctx).await;
        if !results.is_empty() {
            self.messages.push(build_tool_result_message(&results));
        }

        for signal in ctx.drain_signals().await {
            self.apply_signal(plan, ctx, signal).await?;
        }

        self.try_infer_completion(plan, ctx, step_index, true).await
    }

    async fn apply_signal(&mut self, plan: &mut Plan, ctx: &ToolContext, signal: StepSignal) -> eyre::Result<()> {
        debug!(?signal, "apply_signal: called");
        let index = signal.step_index();
        let in_progress = plan
            .current_step()
            .is_some_and(|s| s.index == index && s.status == StepStatus::InProgress);

        match signal {
            StepSignal::SelfReport { report, .. } => {
                self.record_report(plan, index, report)?;
            }
            StepSignal::Done { summary, artifacts, .. } if in_progress => {
                plan.step_mut(index)?.complete(Some(summary.clone()), false, now_ms())?;
                info!(task_id = %plan.task_id, step_index = index, artifacts = artifacts.len(), "Step completed");
                plan.add_log_entry(format!("Step {} completed: {}", index, summary));
                self.close_step(plan, ctx).await?;
            }
            StepSignal::Failure { message, .. } if in_progress => {
                self.apply_failure(plan, ctx, index, &message).await?;
            }
            other => {
                warn!(step_index = index, signal = ?other, "Ignoring signal for a step that is not in progress");
            }
        }
        Ok(())
    }

    fn record_report(&mut self, plan: &mut Plan, step_index: usize, report: SelfReport) -> eyre::Result<()> {
        plan.step_mut(step_index)?.metrics.self_reports += 1;
        self.monitor
            .record(plan, &self.worker_id, step_index, self.iteration, report);
        Ok(())
    }

    /// Route a reported failure through the retry and cascade policy
    async fn apply_failure(
        &mut self,
        plan: &mut Plan,
        ctx: &ToolContext,
        step_index: usize,
        message: &str,
    ) -> eyre::Result<()> {
        match self.policy.handle_step_failure(plan, step_index, message)? {
            FailureOutcome::Retry { attempt, max_retries } => {
                debug!(step_index, attempt, max_retries, "apply_failure: retry scheduled");
                self.step_iterations = 0;
                ctx.reset_step_tracking().await;
                self.persist_plan(plan).await;
            }
            FailureOutcome::Failed { skipped, .. } => {
                debug!(step_index, ?skipped, "apply_failure: step failed");
                self.close_step(plan, ctx).await?;
            }
        }
        Ok(())
    }

    /// Fail a step outright, bypassing classification
    async fn fail_step(&mut self, plan: &mut Plan, ctx: &ToolContext, step_index: usize, reason: &str) -> eyre::Result<()> {
        warn!(task_id = %plan.task_id, step_index, %reason, "Failing step");
        plan.step_mut(step_index)?
            .fail(reason, ErrorClass::Permanent, now_ms())?;
        plan.add_log_entry(format!("Step {} failed ({}): {}", step_index, ErrorClass::Permanent, reason));
        let skipped = self.policy.cascade_skip(plan, step_index)?;
        debug!(step_index, ?skipped, "fail_step: cascade applied");
        self.close_step(plan, ctx).await
    }

    /// Complete an in-progress step whose declared outputs are in place
    async fn try_infer_completion(
        &mut self,
        plan: &mut Plan,
        ctx: &ToolContext,
        step_index: usize,
        require_batch_touch: bool,
    ) -> eyre::Result<()> {
        let step = plan.step(step_index)?;
        if step.status != StepStatus::InProgress {
            return Ok(());
        }
        let activity = ctx.activity().await;
        if !infer_completion(step, &self.worktree, &activity, require_batch_touch) {
            return Ok(());
        }

        plan.step_mut(step_index)?
            .complete(Some(AUTO_COMPLETED_OUTPUT.to_string()), true, now_ms())?;
        info!(task_id = %plan.task_id, step_index, "Step auto-completed");
        plan.add_log_entry(format!(
            "Step {} auto-completed: declared outputs present without explicit completion",
            step_index
        ));
        self.close_step(plan, ctx).await
    }

    /// Move past a step that just became terminal and checkpoint
    async fn close_step(&mut self, plan: &mut Plan, ctx: &ToolContext) -> eyre::Result<()> {
        plan.advance_to_next_step()?;
        self.step_iterations = 0;
        ctx.reset_step_tracking().await;
        self.checkpoint(plan).await;
        Ok(())
    }

    async fn call_llm(&self, request: CompletionRequest) -> Result<CompletionResponse, CallFailure> {
        let mut waits = 0;
        loop {
            match self.llm.complete(request.clone()).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_rate_limit() && waits < self.config.max_rate_limit_waits => {
                    waits += 1;
                    let delay = e.retry_after().unwrap_or(DEFAULT_RATE_LIMIT_WAIT);
                    warn!(worker_id = %self.worker_id, waits, ?delay, "Rate limited, waiting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.cancel.cancelled() => return Err(CallFailure::Cancelled),
                    }
                }
                Err(e) if e.is_rate_limit() => {
                    return Err(CallFailure::Fatal(format!("still rate limited after {} waits: {}", waits, e)));
                }
                Err(e) => return Err(CallFailure::Fatal(e.to_string())),
            }
        }
    }

    async fn fatal(&mut self, plan: &mut Plan, reason: String) -> RunOutcome {
        warn!(task_id = %plan.task_id, %reason, "Fatal error, stopping run");
        plan.add_log_entry(format!("Run stopped: {}", reason));
        self.checkpoint(plan).await;
        RunOutcome::Fatal { reason }
    }

    async fn finish(&mut self, plan: &mut Plan) -> eyre::Result<RunOutcome> {
        let status = plan.finalize()?;
        self.checkpoint(plan).await;
        Ok(match status {
            PlanStatus::Completed => RunOutcome::Completed,
            _ => RunOutcome::Failed {
                reason: plan.error_message.clone().unwrap_or_default(),
            },
        })
    }

    /// Load a saved conversation and tell the worker it is resuming
    async fn restore_conversation(&mut self, plan: &mut Plan) {
        if !self.messages.is_empty() {
            return;
        }
        let checkpoint = match self.store.load_conversation(&plan.project_id, &plan.task_id).await {
            Ok(Some(checkpoint)) => checkpoint,
            Ok(None) => return,
            Err(e) => {
                warn!(task_id = %plan.task_id, error = %e, "Failed to load conversation checkpoint");
                return;
            }
        };
        let mut messages = match checkpoint.to_messages() {
            Ok(messages) => messages,
            Err(e) => {
                warn!(task_id = %plan.task_id, error = %e, "Discarding unreadable conversation checkpoint");
                return;
            }
        };
        if messages.is_empty() {
            return;
        }

        let dropped = drop_unanswered_tool_calls(&mut messages);
        if dropped > 0 {
            warn!(task_id = %plan.task_id, dropped, "Dropped unanswered tool calls from checkpoint");
        }

        info!(task_id = %plan.task_id, messages = messages.len(), "Resuming from checkpoint");
        self.messages = messages;
        let current = plan.steps.iter().find(|s| s.is_executable());
        let notice = prompts::resume_notice(plan.completed_through(), current);
        self.push_user_text(notice);
        plan.add_log_entry(format!("Restored {} messages from checkpoint", self.messages.len()));
    }

    /// Append user text, merging into a trailing user message
    fn push_user_text(&mut self, text: String) {
        match self.messages.last_mut() {
            Some(last) if last.role == Role::User => last.push_text(text),
            _ => self.messages.push(Message::user(text)),
        }
    }

    async fn persist_plan(&self, plan: &Plan) {
        if let Err(e) = self.store.save_plan(plan).await {
            warn!(task_id = %plan.task_id, error = %e, "Failed to save plan");
        }
    }

    /// Save plan and conversation
    async fn checkpoint(&self, plan: &Plan) {
        debug!(task_id = %plan.task_id, messages = self.messages.len(), "checkpoint: called");
        self.persist_plan(plan).await;
        if let Err(e) = self.store.save_conversation(plan, &self.messages).await {
            warn!(task_id = %plan.task_id, error = %e, "Failed to save conversation");
        }
    }
}

impl std::fmt::Debug for StepEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepEngine")
            .field("worker_id", &self.worker_id)
            .field("worktree", &self.worktree)
            .field("iteration", &self.iteration)
            .field("step_iterations", &self.step_iterations)
            .field("messages", &self.messages.len())
            .finish()
    }
}

/// Assistant turn to keep in the transcript
///
/// Tool calls are kept only when the provider stopped to have them run,
/// since every `tool_use` block must be answered by the next user message.
fn build_assistant_message(response: &CompletionResponse) -> Option<Message> {
    let mut blocks = Vec::new();
    if let Some(text) = response.content.as_deref().filter(|t| !t.is_empty()) {
        blocks.push(ContentBlock::text(text));
    }
    if response.stop_reason == StopReason::ToolUse {
        for call in &response.tool_calls {
            blocks.push(ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.name.clone(),
                input: call.input.clone(),
            });
        }
    } else if !response.tool_calls.is_empty() {
        debug!(
            stop_reason = %response.stop_reason,
            dropped = response.tool_calls.len(),
            "build_assistant_message: discarding tool calls that will not run"
        );
    }
    if blocks.is_empty() {
        return None;
    }
    Some(Message::assistant_blocks(blocks))
}

/// Strip `tool_use` blocks from a trailing assistant message
///
/// Returns how many were removed. The message itself goes too if nothing
/// else is left in it.
fn drop_unanswered_tool_calls(messages: &mut Vec<Message>) -> usize {
    let Some(last) = messages.last_mut() else {
        return 0;
    };
    if last.role != Role::Assistant {
        return 0;
    }
    let MessageContent::Blocks(blocks) = &mut last.content else {
        return 0;
    };
    let before = blocks.len();
    blocks.retain(|b| !matches!(b, ContentBlock::ToolUse { .. }));
    let dropped = before - blocks.len();
    if blocks.is_empty() {
        messages.pop();
    }
    dropped
}

fn build_tool_result_message(results: &[(String, ToolResult)]) -> Message {
    let blocks = results
        .iter()
        .map(|(id, result)| ContentBlock::tool_result(id, &result.content, result.is_error))
        .collect();
    Message::user_blocks(blocks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decision, InterventionReason, Step};
    use crate::llm::client::mock::MockLlmClient;
    use crate::llm::{LlmError, ToolCall};
    use crate::reflection::ChannelInterventionHandler;
    use crate::state::StateManager;
    use serde_json::json;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _store_dir: TempDir,
        worktree: TempDir,
        state: StateManager,
    }

    impl Fixture {
        fn new() -> Self {
            let store_dir = tempdir().unwrap();
            let state = StateManager::spawn(store_dir.path()).unwrap();
            Self {
                _store_dir: store_dir,
                worktree: tempdir().unwrap(),
                state,
            }
        }

        fn engine(&self, llm: Arc<MockLlmClient>, config: &Config) -> StepEngine {
            StepEngine::new(
                "worker-1",
                config,
                llm,
                Arc::new(self.state.clone()),
                self.worktree.path().to_path_buf(),
            )
        }
    }

    fn call(id: &str, name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall::new(id, name, input)
    }

    fn done(id: &str, summary: &str) -> CompletionResponse {
        CompletionResponse::tool_use(vec![call(id, "mark_step_done", json!({"summary": summary}))])
    }

    fn plan(steps: Vec<Step>) -> Plan {
        Plan::with_id("task-1", "proj-1", "Build it", steps)
    }

    #[tokio::test]
    async fn test_explicit_completion_runs_plan() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![
            done("c1", "setup finished"),
            done("c2", "docs finished"),
        ]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", ""), Step::new(2, "Docs", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(plan.status, PlanStatus::Completed);
        assert_eq!(plan.steps[0].output.as_deref(), Some("setup finished"));
        assert!(!plan.steps[1].metrics.auto_completed);
        assert_eq!(engine.iteration(), 2);
        assert_eq!(llm.call_count(), 2);

        // Second request starts step 2 in the same trailing user message as the tool result
        let requests = llm.requests();
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().contains("Start step 2: Docs"));

        let saved = fx.state.get_plan("proj-1", "task-1").await.unwrap();
        assert_eq!(saved.status, PlanStatus::Completed);
    }

    #[tokio::test]
    async fn test_inferred_completion() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse::tool_use(vec![call(
            "w1",
            "write",
            json!({"path": "README.md", "content": "# Project\n"}),
        )])]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![Step::new(1, "Readme", "Write a readme").with_creates(["README.md"])]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert!(plan.steps[0].metrics.auto_completed);
        assert_eq!(plan.steps[0].output.as_deref(), Some(AUTO_COMPLETED_OUTPUT));
        assert!(plan.log.iter().any(|e| e.message.contains("auto-completed")));
    }

    #[tokio::test]
    async fn test_transient_failure_retries_then_completes() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![call(
                "f1",
                "report_step_failure",
                json!({"message": "connection reset by peer"}),
            )]),
            done("d1", "worked on retry"),
        ]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        let mut plan = plan(vec![Step::new(1, "Fetch", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(plan.steps[0].retry_count, 1);
        let requests = llm.requests();
        assert!(requests[1].messages.last().unwrap().text().contains("This is retry 1 of 2"));
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_dependents() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![call(
                "f1",
                "report_step_failure",
                json!({"message": "schema is invalid"}),
            )]),
            done("d3", "docs written"),
        ]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![
            Step::new(1, "Db", "").with_creates(["src/db.rs"]),
            Step::new(2, "Api", "").with_reads(["src/db.rs"]),
            Step::new(3, "Docs", ""),
        ]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "steps failed: 1".to_string()
            }
        );
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
        assert_eq!(plan.steps[1].status, StepStatus::Skipped);
        assert_eq!(plan.steps[2].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_fatal_stop_reason() {
        let fx = Fixture::new();
        let mut response = CompletionResponse::text("cut off");
        response.stop_reason = StopReason::MaxTokens;
        let llm = Arc::new(MockLlmClient::new(vec![response]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Fatal {
                reason: "provider stopped with max_tokens".to_string()
            }
        );
        assert_eq!(plan.status, PlanStatus::InProgress);
    }

    #[tokio::test]
    async fn test_provider_error_is_fatal() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::scripted(vec![Err(LlmError::NotConfigured)]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Fatal { .. }));
        assert_eq!(engine.iteration(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_waited_out() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::scripted(vec![
            Err(LlmError::rate_limited(Some(Duration::from_secs(5)))),
            Ok(done("d1", "ok")),
        ]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(llm.call_count(), 2);
        assert_eq!(engine.iteration(), 1);
    }

    #[tokio::test]
    async fn test_end_turn_with_steps_left_is_incomplete() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![CompletionResponse::text("All done!")]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Incomplete);
        assert!(outcome.is_resumable());
        assert_eq!(plan.steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_step_budget_exhaustion_fails_step() {
        let fx = Fixture::new();
        let mut config = Config::default();
        config.engine.total_iteration_budget = 0;
        config.engine.max_per_step_iterations = 2;
        config.engine.self_report_interval = 0;
        let list = || CompletionResponse::tool_use(vec![call("l", "list", json!({}))]);
        let llm = Arc::new(MockLlmClient::new(vec![list(), list(), done("d2", "second done")]));
        let mut engine = fx.engine(llm, &config);
        let mut plan = plan(vec![Step::new(1, "Explore", ""), Step::new(2, "Docs", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert!(matches!(outcome, RunOutcome::Failed { .. }));
        assert_eq!(plan.steps[0].status, StepStatus::Failed);
        assert_eq!(
            plan.steps[0].last_error.as_deref(),
            Some("iteration budget exhausted for step 1")
        );
        assert_eq!(plan.steps[1].status, StepStatus::Completed);
    }

    #[tokio::test]
    async fn test_run_budget_exhaustion() {
        let fx = Fixture::new();
        let mut config = Config::default();
        config.engine.total_iteration_budget = 1;
        config.engine.max_per_step_iterations = 3;
        config.engine.self_report_interval = 0;
        // One step: per_step = min(1 + 2, 3) = 3, effective = 3
        let list = || CompletionResponse::tool_use(vec![call("l", "list", json!({}))]);
        let llm = Arc::new(MockLlmClient::new(vec![list(), list(), list()]));
        let mut engine = fx.engine(llm, &config);
        let mut plan = plan(vec![Step::new(1, "Explore", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();
        assert_eq!(outcome, RunOutcome::BudgetExhausted { iterations: 3 });
        assert_eq!(plan.steps[0].status, StepStatus::InProgress);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_call() {
        let fx = Fixture::new();
        let (handle, token) = crate::r#loop::cancel_pair();
        handle.cancel();
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let mut engine = fx.engine(llm.clone(), &Config::default()).with_cancel_token(token);
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        let outcome = engine.run(&mut plan).await.unwrap();

        assert_eq!(outcome, RunOutcome::Cancelled);
        assert_eq!(llm.call_count(), 0);
        assert_eq!(plan.status, PlanStatus::InProgress);
    }

    #[tokio::test]
    async fn test_self_report_raises_intervention() {
        let fx = Fixture::new();
        let (handler, mut rx) = ChannelInterventionHandler::new();
        let llm = Arc::new(MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![call(
                "r1",
                "self_report",
                json!({"progress": 10, "confidence": 90, "decision": "escalate"}),
            )]),
            done("d1", "ok"),
        ]));
        let mut engine = fx
            .engine(llm, &Config::default())
            .with_intervention_handler(Arc::new(handler));
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        engine.run(&mut plan).await.unwrap();

        let signal = rx.try_recv().unwrap();
        assert_eq!(signal.reason, InterventionReason::AgentEscalated);
        assert_eq!(plan.reflections.len(), 1);
        assert_eq!(plan.reflections[0].decision, Decision::Escalate);
        assert_eq!(plan.steps[0].metrics.self_reports, 1);
    }

    #[tokio::test]
    async fn test_self_report_prompt_injected_on_interval() {
        let fx = Fixture::new();
        let mut config = Config::default();
        config.engine.self_report_interval = 1;
        let list = CompletionResponse::tool_use(vec![call("l", "list", json!({}))]);
        let llm = Arc::new(MockLlmClient::new(vec![list, done("d1", "ok")]));
        let mut engine = fx.engine(llm.clone(), &config);
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);

        engine.run(&mut plan).await.unwrap();

        let requests = llm.requests();
        assert!(!requests[0].messages.last().unwrap().text().contains("Pause and report"));
        assert!(requests[1].messages.last().unwrap().text().contains("Pause and report on step 1"));
    }

    #[tokio::test]
    async fn test_resume_injects_notice() {
        let fx = Fixture::new();
        let mut plan = plan(vec![Step::new(1, "Setup", ""), Step::new(2, "Docs", "")]);

        // First run stops after step 1
        let llm = Arc::new(MockLlmClient::new(vec![done("d1", "setup"), CompletionResponse::text("brb")]));
        let mut engine = fx.engine(llm, &Config::default());
        assert_eq!(engine.run(&mut plan).await.unwrap(), RunOutcome::Incomplete);

        let mut reloaded = fx.state.get_plan("proj-1", "task-1").await.unwrap();
        let llm = Arc::new(MockLlmClient::new(vec![done("d2", "docs")]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        assert_eq!(engine.run(&mut reloaded).await.unwrap(), RunOutcome::Completed);

        let first = &llm.requests()[0];
        let last = first.messages.last().unwrap().text();
        assert!(last.contains("You already completed through step 1; do not redo it."));
        assert!(first.messages.len() > 1);
    }

    fn has_tool_use(message: &Message) -> bool {
        matches!(&message.content, MessageContent::Blocks(blocks) if blocks.iter().any(|b| matches!(b, ContentBlock::ToolUse { .. })))
    }

    #[tokio::test]
    async fn test_truncated_tool_calls_are_not_run_or_kept() {
        let fx = Fixture::new();
        let mut plan = plan(vec![Step::new(1, "A", "").with_creates(["a.txt"])]);

        let mut cut_off = CompletionResponse::tool_use(vec![call("w1", "write", json!({"path": "a.txt", "content": "a"}))]);
        cut_off.content = Some("Writing a.txt".to_string());
        cut_off.stop_reason = StopReason::MaxTokens;
        let llm = Arc::new(MockLlmClient::new(vec![cut_off]));
        let mut engine = fx.engine(llm, &Config::default());
        assert!(matches!(engine.run(&mut plan).await.unwrap(), RunOutcome::Fatal { .. }));
        assert!(!fx.worktree.path().join("a.txt").exists());
        assert!(!engine.messages().iter().any(has_tool_use));

        let mut reloaded = fx.state.get_plan("proj-1", "task-1").await.unwrap();
        let llm = Arc::new(MockLlmClient::new(vec![done("d1", "a written")]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        assert_eq!(engine.run(&mut reloaded).await.unwrap(), RunOutcome::Completed);

        let first = &llm.requests()[0];
        assert!(!first.messages.iter().any(has_tool_use));
        let last = first.messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert!(last.text().contains("Execution was interrupted and is now resuming."));
        let prev = &first.messages[first.messages.len() - 2];
        assert_eq!(prev.role, Role::Assistant);
        assert_eq!(prev.text(), "Writing a.txt");
    }

    #[tokio::test]
    async fn test_resume_drops_unanswered_tool_calls_from_checkpoint() {
        let fx = Fixture::new();
        let mut plan = plan(vec![Step::new(1, "A", "")]);
        plan.mark_ready().unwrap();
        plan.start().unwrap();
        plan.step_mut(1).unwrap().start(now_ms()).unwrap();
        let saved = vec![
            Message::user("Start step 1: A"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "w1".to_string(),
                name: "write".to_string(),
                input: json!({"path": "a.txt", "content": "a"}),
            }]),
        ];
        fx.state.save_plan(&plan).await.unwrap();
        fx.state.save_conversation(&plan, &saved).await.unwrap();

        let llm = Arc::new(MockLlmClient::new(vec![done("d1", "a written")]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        assert_eq!(engine.run(&mut plan).await.unwrap(), RunOutcome::Completed);

        let first = &llm.requests()[0];
        assert_eq!(first.messages.len(), 1);
        assert!(!has_tool_use(&first.messages[0]));
        let text = first.messages[0].text();
        assert!(text.contains("Start step 1: A"));
        assert!(text.contains("Execution was interrupted and is now resuming."));
    }

    #[test]
    fn test_drop_unanswered_tool_calls_keeps_text() {
        let mut messages = vec![
            Message::user("go"),
            Message::assistant_blocks(vec![
                ContentBlock::text("thinking"),
                ContentBlock::ToolUse {
                    id: "t1".to_string(),
                    name: "list".to_string(),
                    input: json!({}),
                },
            ]),
        ];
        assert_eq!(drop_unanswered_tool_calls(&mut messages), 1);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), "thinking");

        // Nothing to drop once the calls are answered
        messages.push(Message::user_blocks(vec![ContentBlock::tool_result("t1", "ok", false)]));
        assert_eq!(drop_unanswered_tool_calls(&mut messages), 0);
        assert_eq!(messages.len(), 3);
    }

    #[tokio::test]
    async fn test_finished_plan_is_not_rerun() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let mut engine = fx.engine(llm.clone(), &Config::default());
        let mut plan = plan(vec![Step::new(1, "Setup", "")]);
        plan.mark_ready().unwrap();
        plan.start().unwrap();
        plan.mark_failed("operator stopped it").unwrap();

        let outcome = engine.run(&mut plan).await.unwrap();
        assert_eq!(
            outcome,
            RunOutcome::Failed {
                reason: "operator stopped it".to_string()
            }
        );
        assert_eq!(llm.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_plan_errors() {
        let fx = Fixture::new();
        let llm = Arc::new(MockLlmClient::new(vec![]));
        let mut engine = fx.engine(llm, &Config::default());
        let mut plan = plan(vec![]);
        assert!(engine.run(&mut plan).await.is_err());
    }

    #[test]
    fn test_build_assistant_message_skips_empty() {
        assert!(build_assistant_message(&CompletionResponse::text("")).is_none());
        let msg = build_assistant_message(&done("c1", "x")).unwrap();
        assert_eq!(msg.role, Role::Assistant);
        assert!(has_tool_use(&msg));

        let mut cut_off = done("c2", "x");
        cut_off.stop_reason = StopReason::MaxTokens;
        assert!(build_assistant_message(&cut_off).is_none());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(RunOutcome::BudgetExhausted { iterations: 4 }.to_string(), "budget exhausted after 4 iterations");
        assert!(!RunOutcome::Completed.is_resumable());
    }
}
