//! StateManager - actor that owns the checkpoint store
//!
//! Processes commands via channels for serialized access to persistent state.

use std::path::Path;

use async_trait::async_trait;
use checkpointstore::Store;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::domain::{ConversationCheckpoint, InterventionSignal, Plan};
use crate::llm::Message;

use super::messages::{StateCommand, StateError, StateResponse};

/// Persistence the step engine depends on
///
/// Every operation overwrites by (project, task), so repeating a save is
/// harmless.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save_plan(&self, plan: &Plan) -> StateResponse<()>;

    async fn load_plan(&self, project_id: &str, task_id: &str) -> StateResponse<Option<Plan>>;

    async fn save_conversation(&self, plan: &Plan, messages: &[Message]) -> StateResponse<()>;

    async fn load_conversation(&self, project_id: &str, task_id: &str)
    -> StateResponse<Option<ConversationCheckpoint>>;
}

/// Handle to send commands to the StateManager
#[derive(Debug, Clone)]
pub struct StateManager {
    tx: mpsc::Sender<StateCommand>,
}

impl StateManager {
    /// Spawn a new StateManager actor
    pub fn spawn(store_path: impl AsRef<Path>) -> eyre::Result<Self> {
        debug!(store_path = %store_path.as_ref().display(), "spawn: called");
        let store = Store::open(store_path.as_ref())?;

        let (tx, rx) = mpsc::channel(256);
        tokio::spawn(actor_loop(store, rx));

        info!(store_path = %store_path.as_ref().display(), "StateManager spawned");
        Ok(Self { tx })
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<StateResponse<T>>) -> StateCommand,
    ) -> StateResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StateError::ChannelError)?;
        reply_rx.await.map_err(|_| StateError::ChannelError)?
    }

    /// List plans, optionally for one project, newest first
    pub async fn list_plans(&self, project_id: Option<String>) -> StateResponse<Vec<Plan>> {
        debug!(?project_id, "list_plans: called");
        self.request(|reply| StateCommand::ListPlans { project_id, reply }).await
    }

    /// Load a plan that must exist
    pub async fn get_plan(&self, project_id: &str, task_id: &str) -> StateResponse<Plan> {
        self.load_plan(project_id, task_id)
            .await?
            .ok_or_else(|| StateError::NotFound(format!("plan {}/{}", project_id, task_id)))
    }

    /// Acknowledge the latest intervention on a stored plan
    ///
    /// Returns None when the plan has no triggered reflection.
    pub async fn acknowledge_intervention(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> StateResponse<Option<InterventionSignal>> {
        debug!(%project_id, %task_id, "acknowledge_intervention: called");
        let mut plan = self.get_plan(project_id, task_id).await?;
        let signal = plan.acknowledge_intervention();
        if signal.is_some() {
            self.save_plan(&plan).await?;
        }
        Ok(signal)
    }

    /// Shutdown the StateManager
    pub async fn shutdown(&self) -> Result<(), StateError> {
        debug!("shutdown: called");
        self.tx
            .send(StateCommand::Shutdown)
            .await
            .map_err(|_| StateError::ChannelError)
    }
}

#[async_trait]
impl CheckpointStore for StateManager {
    async fn save_plan(&self, plan: &Plan) -> StateResponse<()> {
        debug!(task_id = %plan.task_id, status = %plan.status, "save_plan: called");
        let plan = Box::new(plan.clone());
        self.request(|reply| StateCommand::SavePlan { plan, reply }).await
    }

    async fn load_plan(&self, project_id: &str, task_id: &str) -> StateResponse<Option<Plan>> {
        debug!(%project_id, %task_id, "load_plan: called");
        let project_id = project_id.to_string();
        let task_id = task_id.to_string();
        self.request(|reply| StateCommand::LoadPlan {
            project_id,
            task_id,
            reply,
        })
        .await
    }

    async fn save_conversation(&self, plan: &Plan, messages: &[Message]) -> StateResponse<()> {
        debug!(task_id = %plan.task_id, message_count = messages.len(), "save_conversation: called");
        let checkpoint =
            ConversationCheckpoint::capture(plan, messages).map_err(|e| StateError::StoreError(e.to_string()))?;
        self.request(|reply| StateCommand::SaveConversation { checkpoint, reply })
            .await
    }

    async fn load_conversation(
        &self,
        project_id: &str,
        task_id: &str,
    ) -> StateResponse<Option<ConversationCheckpoint>> {
        debug!(%project_id, %task_id, "load_conversation: called");
        let project_id = project_id.to_string();
        let task_id = task_id.to_string();
        self.request(|reply| StateCommand::LoadConversation {
            project_id,
            task_id,
            reply,
        })
        .await
    }
}

/// The actor loop that processes commands
async fn actor_loop(store: Store, mut rx: mpsc::Receiver<StateCommand>) {
    debug!("StateManager actor started");

    while let Some(cmd) = rx.recv().await {
        match cmd {
            StateCommand::SavePlan { plan, reply } => {
                debug!(task_id = %plan.task_id, "actor_loop: SavePlan command");
                let _ = reply.send(store.put(plan.as_ref()).map_err(StateError::from));
            }

            StateCommand::LoadPlan {
                project_id,
                task_id,
                reply,
            } => {
                debug!(%project_id, %task_id, "actor_loop: LoadPlan command");
                let _ = reply.send(store.get::<Plan>(&project_id, &task_id).map_err(StateError::from));
            }

            StateCommand::ListPlans { project_id, reply } => {
                debug!(?project_id, "actor_loop: ListPlans command");
                let _ = reply.send(store.list::<Plan>(project_id.as_deref()).map_err(StateError::from));
            }

            StateCommand::SaveConversation { checkpoint, reply } => {
                debug!(task_id = %checkpoint.task_id, messages = checkpoint.messages.len(), "actor_loop: SaveConversation command");
                let _ = reply.send(store.put(&checkpoint).map_err(StateError::from));
            }

            StateCommand::LoadConversation {
                project_id,
                task_id,
                reply,
            } => {
                debug!(%project_id, %task_id, "actor_loop: LoadConversation command");
                let result = store
                    .get::<ConversationCheckpoint>(&project_id, &task_id)
                    .map_err(StateError::from);
                let _ = reply.send(result);
            }

            StateCommand::Shutdown => {
                info!("StateManager shutting down");
                break;
            }
        }
    }

    debug!("StateManager actor stopped");
}
