//! InMemoryTaskStore - development / test task store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task, TaskId, TaskState};
use crate::ports::TaskStore;

#[derive(Default, Clone)]
pub struct InMemoryTaskStore {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.task_id) {
            return Err(StoreError::Conflict(task.task_id.to_string()));
        }
        tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.tasks.lock().await.get(task_id).cloned())
    }

    async fn save(&self, task: &Task) -> Result<(), StoreError> {
        let mut tasks = self.tasks.lock().await;
        match tasks.get_mut(&task.task_id) {
            Some(slot) => {
                *slot = task.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(task.task_id.to_string())),
        }
    }

    async fn list_by_state(&self, state: TaskState) -> Result<Vec<Task>, StoreError> {
        let tasks = self.tasks.lock().await;
        let mut found: Vec<Task> = tasks
            .values()
            .filter(|t| t.state() == state)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.task_id.cmp(&b.task_id))
        });
        Ok(found)
    }
}
