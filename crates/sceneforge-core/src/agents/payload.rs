//! Typed message payloads.
//!
//! Each payload type owns its message type tag, so agents never match on
//! bare strings and a payload cannot be sent under the wrong tag.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{AgentError, AgentMessage, JobId, ScenePlan, TaskId};

pub trait Payload: Serialize + DeserializeOwned + Send + 'static {
    /// Message type tag, e.g. `"build_component"`.
    const TYPE: &'static str;

    fn encode(&self) -> Result<serde_json::Value, AgentError> {
        serde_json::to_value(self).map_err(|e| AgentError::MalformedPayload {
            message_type: Self::TYPE.to_string(),
            reason: e.to_string(),
        })
    }

    fn decode(message: &AgentMessage) -> Result<Self, AgentError> {
        let malformed = |reason: String| AgentError::MalformedPayload {
            message_type: message.message_type.clone(),
            reason,
        };
        if message.message_type != Self::TYPE {
            return Err(malformed(format!("expected message type {}", Self::TYPE)));
        }
        let value = match &message.payload {
            serde_json::Value::Null => serde_json::json!({}),
            other => other.clone(),
        };
        serde_json::from_value(value).map_err(|e| malformed(e.to_string()))
    }

    /// New conversation from `sender` to `recipient` about `task_id`.
    fn message(&self, sender: &str, recipient: &str, task_id: TaskId) -> Result<AgentMessage, AgentError> {
        Ok(AgentMessage::new(Self::TYPE, sender, recipient, task_id, self.encode()?))
    }

    /// Next hop of `previous`, sent by its recipient.
    fn reply_to(&self, previous: &AgentMessage, recipient: &str) -> Result<AgentMessage, AgentError> {
        Ok(previous.reply(Self::TYPE, recipient, self.encode()?))
    }
}

/// A task was submitted and needs planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskSubmitted {}

impl Payload for TaskSubmitted {
    const TYPE: &'static str = "task_submitted";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CancelTask {
    #[serde(default)]
    pub reason: Option<String>,
}

impl Payload for CancelTask {
    const TYPE: &'static str = "cancel_task";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanScene {
    pub prompt: String,
}

impl Payload for PlanScene {
    const TYPE: &'static str = "plan_scene";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateComponent {
    pub plan: ScenePlan,
}

impl Payload for GenerateComponent {
    const TYPE: &'static str = "generate_component";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildComponent {
    pub job_id: JobId,
}

impl Payload for BuildComponent {
    const TYPE: &'static str = "build_component";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixComponent {
    pub job_id: JobId,
    pub error: String,
}

impl Payload for FixComponent {
    const TYPE: &'static str = "fix_component";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreComponent {
    pub job_id: JobId,
    pub script: String,
    #[serde(default)]
    pub component_name: Option<String>,
}

impl Payload for StoreComponent {
    const TYPE: &'static str = "store_component";
}
