//! TaskStore port - durable task records.
//!
//! The store is the only durable state of the system. The task manager is
//! its single writer inside a process and serialises writes per task, so the
//! store itself only needs atomic whole-record reads and writes.

use async_trait::async_trait;

use crate::domain::{StoreError, Task, TaskId, TaskState};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task; fails with `StoreError::Conflict` if the id exists.
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    /// Load a task, `None` when the id was never stored.
    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError>;

    /// Replace a stored task.
    async fn save(&self, task: &Task) -> Result<(), StoreError>;

    /// Tasks currently in `state`, oldest first.
    async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, StoreError>;
}
