//! Agent message: the unit routed over the message bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::ids::{MessageId, TaskId};

/// Message addressed from one named agent to another.
///
/// `task_id` is the correlation key: stream observers filter on it and agents
/// use it to find the task they act on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: MessageId,

    #[serde(rename = "type")]
    pub message_type: String,

    pub sender: String,
    pub recipient: String,
    pub task_id: TaskId,

    #[serde(default)]
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,

    /// Earliest time the processor may hand this message to its recipient.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deliver_at: Option<DateTime<Utc>>,
}

impl AgentMessage {
    pub fn new(
        message_type: impl Into<String>,
        sender: impl Into<String>,
        recipient: impl Into<String>,
        task_id: TaskId,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: MessageId::from_ulid(Ulid::new()),
            message_type: message_type.into(),
            sender: sender.into(),
            recipient: recipient.into(),
            task_id,
            payload,
            timestamp: Utc::now(),
            deliver_at: None,
        }
    }

    /// Build the next hop of a conversation, keeping the correlation key.
    pub fn reply(
        &self,
        message_type: impl Into<String>,
        recipient: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            message_type,
            self.recipient.clone(),
            recipient,
            self.task_id.clone(),
            payload,
        )
    }

    pub fn deliver_after(mut self, delay: std::time::Duration) -> Self {
        if let Ok(delay) = chrono::Duration::from_std(delay)
            && !delay.is_zero()
        {
            self.deliver_at = Some(Utc::now() + delay);
        }
        self
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.deliver_at.is_none_or(|at| at <= now)
    }
}
