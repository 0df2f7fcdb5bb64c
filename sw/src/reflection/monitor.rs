//! Records self-reports on the plan and notifies the supervisor

use std::sync::Arc;

use checkpointstore::now_ms;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ReflectionConfig;
use crate::domain::{InterventionSignal, Plan, ReflectionSignal, SelfReport};

use super::rules::evaluate;

/// Receives interventions as they are raised
///
/// Called synchronously from the step loop; implementations should hand off
/// quickly.
pub trait InterventionHandler: Send + Sync {
    fn on_intervention(&self, signal: &InterventionSignal);
}

impl<F> InterventionHandler for F
where
    F: Fn(&InterventionSignal) + Send + Sync,
{
    fn on_intervention(&self, signal: &InterventionSignal) {
        self(signal)
    }
}

/// Forwards interventions to an unbounded channel
#[derive(Debug, Clone)]
pub struct ChannelInterventionHandler {
    tx: mpsc::UnboundedSender<InterventionSignal>,
}

impl ChannelInterventionHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<InterventionSignal>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl InterventionHandler for ChannelInterventionHandler {
    fn on_intervention(&self, signal: &InterventionSignal) {
        if let Err(e) = self.tx.send(signal.clone()) {
            warn!(task_id = %signal.task_id, error = %e, "Intervention receiver dropped");
        }
    }
}

/// Evaluates self-reports for one worker
#[derive(Clone)]
pub struct ReflectionMonitor {
    config: ReflectionConfig,
    handler: Option<Arc<dyn InterventionHandler>>,
}

impl ReflectionMonitor {
    pub fn new(config: ReflectionConfig) -> Self {
        Self { config, handler: None }
    }

    pub fn with_handler(mut self, handler: Arc<dyn InterventionHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    pub fn config(&self) -> &ReflectionConfig {
        &self.config
    }

    /// Evaluate a report, append it to the plan, and notify on trigger
    pub fn record(
        &self,
        plan: &mut Plan,
        worker_id: &str,
        step_index: usize,
        iteration: u32,
        report: SelfReport,
    ) -> ReflectionSignal {
        debug!(task_id = %plan.task_id, %worker_id, step_index, iteration, "ReflectionMonitor::record: called");
        let history: Vec<ReflectionSignal> = plan
            .reflections
            .iter()
            .filter(|r| r.step_index == step_index)
            .cloned()
            .collect();

        let reason = evaluate(&report, &history, &self.config);
        let mut signal = ReflectionSignal::new(worker_id, step_index, iteration, report, now_ms());
        if let Some(reason) = reason {
            signal.trigger(reason);
        }
        plan.record_reflection(signal.clone());

        if let Some(intervention) = InterventionSignal::from_reflection(&plan.project_id, &plan.task_id, &signal) {
            info!(
                task_id = %plan.task_id,
                step_index,
                reason = %intervention.reason,
                confidence = intervention.confidence,
                "Intervention raised"
            );
            plan.add_log_entry(format!("Intervention raised on step {}: {}", step_index, intervention.reason));
            if let Some(handler) = &self.handler {
                handler.on_intervention(&intervention);
            }
        }

        signal
    }
}

impl std::fmt::Debug for ReflectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReflectionMonitor")
            .field("config", &self.config)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}
