//! State manager messages
//!
//! Commands and responses for the actor pattern.

use checkpointstore::StoreError;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::domain::{ConversationCheckpoint, Plan};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    #[error("Channel error")]
    ChannelError,
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(e) => Self::DeserializationError(e.to_string()),
            other => Self::StoreError(other.to_string()),
        }
    }
}

/// Response from state operations
pub type StateResponse<T> = Result<T, StateError>;

/// Commands sent to the StateManager actor
#[derive(Debug)]
pub enum StateCommand {
    // Plan operations
    SavePlan {
        plan: Box<Plan>,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    LoadPlan {
        project_id: String,
        task_id: String,
        reply: oneshot::Sender<StateResponse<Option<Plan>>>,
    },
    ListPlans {
        project_id: Option<String>,
        reply: oneshot::Sender<StateResponse<Vec<Plan>>>,
    },

    // Conversation operations
    SaveConversation {
        checkpoint: ConversationCheckpoint,
        reply: oneshot::Sender<StateResponse<()>>,
    },
    LoadConversation {
        project_id: String,
        task_id: String,
        reply: oneshot::Sender<StateResponse<Option<ConversationCheckpoint>>>,
    },

    // Control
    Shutdown,
}
