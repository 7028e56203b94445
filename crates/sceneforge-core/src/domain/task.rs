//! Task record: status + artifacts + history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::ids::TaskId;
use super::state::TaskState;

/// Latest human-readable status message, optionally tagged with the agent
/// that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub text: String,

    #[serde(rename = "agentName", default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl StatusMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            agent_name: None,
        }
    }

    pub fn from_agent(agent_name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            agent_name: Some(agent_name.into()),
        }
    }
}

/// State + message pair, as recorded in history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub message: Option<StatusMessage>,
    pub timestamp: DateTime<Utc>,
}

/// A tracked unit of work.
///
/// Design:
/// - Single source of truth for one task; the store persists it whole.
/// - State transitions go through methods, which refuse to mutate a task
///   that already reached a terminal state.
/// - `version` increases with every accepted mutation so observers can tell
///   which updates a snapshot already contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub prompt: String,
    pub status: TaskStatus,
    pub artifacts: Vec<Artifact>,
    pub history: Vec<TaskStatus>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_id: TaskId, prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            prompt: prompt.into(),
            status: TaskStatus {
                state: TaskState::Submitted,
                message: None,
                timestamp: now,
            },
            artifacts: Vec::new(),
            history: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn state(&self) -> TaskState {
        self.status.state
    }

    pub fn is_terminal(&self) -> bool {
        self.status.state.is_terminal()
    }

    /// Apply a status change. Returns `false` (and leaves the task untouched)
    /// when the task is already terminal.
    pub fn apply_status(&mut self, state: TaskState, message: Option<StatusMessage>) -> bool {
        if self.is_terminal() || state == TaskState::Unknown {
            return false;
        }
        let now = Utc::now();
        let previous = std::mem::replace(
            &mut self.status,
            TaskStatus {
                state,
                message,
                timestamp: now,
            },
        );
        self.history.push(previous);
        self.touch(now);
        true
    }

    /// Append an artifact. Returns `false` when the task is already terminal.
    pub fn append_artifact(&mut self, artifact: Artifact) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.artifacts.push(artifact);
        self.touch(Utc::now());
        true
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            task_id: self.task_id.clone(),
            state: self.status.state,
            message: self.status.message.clone(),
            artifacts: self.artifacts.clone(),
            version: self.version,
        }
    }

    fn touch(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.updated_at = now;
    }
}

/// Point-in-time view of a task returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub task_id: TaskId,
    pub state: TaskState,
    pub message: Option<StatusMessage>,
    pub artifacts: Vec<Artifact>,
    pub version: u64,
}

impl TaskSnapshot {
    /// Sentinel for ids that were never registered.
    pub fn unknown(task_id: TaskId) -> Self {
        Self {
            task_id,
            state: TaskState::Unknown,
            message: None,
            artifacts: Vec::new(),
            version: 0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.state == TaskState::Unknown
    }
}
