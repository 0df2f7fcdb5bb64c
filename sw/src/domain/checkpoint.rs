//! Conversation checkpoint
//!
//! Message content is stored as raw JSON so nested tool-use and tool-result
//! blocks round-trip without loss, independent of any provider's wire format.

use checkpointstore::{Document, now_ms};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::llm::{Message, MessageContent, Role};

use super::plan::Plan;

/// A role-tagged message in storage form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub role: String,
    pub content: Value,
}

/// Saved transcript for one (project, task)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationCheckpoint {
    pub task_id: String,

    pub project_id: String,

    /// 1-based step that was current when saved (0 when past the end)
    pub step_index: usize,

    pub saved_at: i64,

    pub messages: Vec<StoredMessage>,
}

impl ConversationCheckpoint {
    /// Capture the transcript for a plan
    pub fn capture(plan: &Plan, messages: &[Message]) -> Result<Self, serde_json::Error> {
        debug!(task_id = %plan.task_id, message_count = messages.len(), "ConversationCheckpoint::capture: called");
        let messages = messages
            .iter()
            .map(|m| {
                Ok(StoredMessage {
                    role: role_name(m.role).to_string(),
                    content: serde_json::to_value(&m.content)?,
                })
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        Ok(Self {
            task_id: plan.task_id.clone(),
            project_id: plan.project_id.clone(),
            step_index: plan.current_step().map(|s| s.index).unwrap_or(0),
            saved_at: now_ms(),
            messages,
        })
    }

    /// Rebuild the conversation
    pub fn to_messages(&self) -> Result<Vec<Message>, serde_json::Error> {
        debug!(task_id = %self.task_id, message_count = self.messages.len(), "ConversationCheckpoint::to_messages: called");
        self.messages
            .iter()
            .map(|stored| {
                let role = match stored.role.as_str() {
                    "assistant" => Role::Assistant,
                    _ => Role::User,
                };
                let content: MessageContent = serde_json::from_value(stored.content.clone())?;
                Ok(Message { role, content })
            })
            .collect()
    }
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

impl Document for ConversationCheckpoint {
    fn collection_name() -> &'static str {
        "conversations"
    }

    fn scope(&self) -> &str {
        &self.project_id
    }

    fn id(&self) -> &str {
        &self.task_id
    }

    fn updated_at(&self) -> i64 {
        self.saved_at
    }
}
