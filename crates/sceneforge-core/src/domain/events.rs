//! Task update events fanned out by the task manager.

use serde::{Deserialize, Serialize};

use super::artifact::Artifact;
use super::ids::TaskId;
use super::state::TaskState;
use super::task::StatusMessage;

/// What changed on the task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskChange {
    Status {
        state: TaskState,
        message: Option<StatusMessage>,
    },
    Artifact {
        artifact: Artifact,
    },
}

/// One accepted mutation of a task.
///
/// `version` is the task version *after* the mutation; it lets an observer
/// that also took a snapshot drop updates the snapshot already reflects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUpdate {
    pub task_id: TaskId,
    pub version: u64,
    pub change: TaskChange,
}
