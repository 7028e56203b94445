//! TaskManager - task lifecycle transitions and update fan-out.
//!
//! Every mutation on one task id runs under that task's mutex:
//! load from the store, mutate, save, then notify subscribers. Subscribers
//! therefore observe a task's updates in the order they were produced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};
use ulid::Ulid;

use crate::app::subscription::{SubscriberMap, Subscription};
use crate::domain::{
    Artifact, StatusMessage, StoreError, Task, TaskChange, TaskError, TaskId, TaskSnapshot, TaskState,
    TaskUpdate,
};
use crate::ports::TaskStore;

pub struct TaskManager {
    store: Arc<dyn TaskStore>,
    locks: Mutex<HashMap<TaskId, Arc<tokio::sync::Mutex<()>>>>,
    subscribers: SubscriberMap<TaskId, TaskUpdate>,
}

impl TaskManager {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
            subscribers: SubscriberMap::new(),
        }
    }

    /// Register a new task in `submitted`. A missing id is generated.
    pub async fn create_task(&self, task_id: Option<TaskId>, prompt: &str) -> Result<TaskSnapshot, TaskError> {
        let task_id = task_id.unwrap_or_else(|| TaskId::new(format!("task-{}", Ulid::new())));
        if !task_id.is_valid() {
            return Err(TaskError::InvalidTaskId(task_id.as_str().to_string()));
        }

        let task = Task::new(task_id.clone(), prompt);
        let snapshot = task.snapshot();
        match self.store.insert(task).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => return Err(TaskError::AlreadyExists(task_id)),
            Err(e) => return Err(e.into()),
        }
        info!(task_id = %task_id, "task created");
        Ok(snapshot)
    }

    /// Current snapshot. Ids that were never registered yield the
    /// `unknown` sentinel rather than an error.
    pub async fn get_task_status(&self, task_id: &TaskId) -> Result<TaskSnapshot, TaskError> {
        Ok(match self.store.get(task_id).await? {
            Some(task) => task.snapshot(),
            None => TaskSnapshot::unknown(task_id.clone()),
        })
    }

    /// Full task record, including prompt and history.
    pub async fn get_task(&self, task_id: &TaskId) -> Result<Option<Task>, TaskError> {
        Ok(self.store.get(task_id).await?)
    }

    pub fn subscribe_to_task_updates(
        &self,
        task_id: &TaskId,
        on_update: impl Fn(&TaskUpdate) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribers.subscribe(task_id.clone(), on_update)
    }

    pub fn subscriber_count(&self, task_id: &TaskId) -> usize {
        self.subscribers.count(task_id)
    }

    /// Returns whether the change was applied. Terminal and unknown tasks
    /// are left untouched.
    pub async fn update_status(
        &self,
        task_id: &TaskId,
        state: TaskState,
        message: Option<StatusMessage>,
    ) -> Result<bool, TaskError> {
        self.mutate(task_id, |task| {
            task.apply_status(state, message.clone()).then(|| TaskChange::Status {
                state,
                message: message.clone(),
            })
        })
        .await
    }

    pub async fn add_artifact(&self, task_id: &TaskId, artifact: Artifact) -> Result<bool, TaskError> {
        self.mutate(task_id, |task| {
            task.append_artifact(artifact.clone())
                .then(|| TaskChange::Artifact { artifact: artifact.clone() })
        })
        .await
    }

    pub async fn cancel_task(&self, task_id: &TaskId, reason: &str) -> Result<bool, TaskError> {
        self.update_status(task_id, TaskState::Canceled, Some(StatusMessage::new(reason)))
            .await
    }

    /// Snapshots of every task in `state`, oldest first.
    pub async fn list_tasks_in_state(&self, state: TaskState) -> Result<Vec<TaskSnapshot>, TaskError> {
        Ok(self
            .store
            .list_by_state(state)
            .await?
            .iter()
            .map(Task::snapshot)
            .collect())
    }

    async fn mutate(
        &self,
        task_id: &TaskId,
        apply: impl FnOnce(&mut Task) -> Option<TaskChange>,
    ) -> Result<bool, TaskError> {
        let lock = self.lock_for(task_id);
        let _guard = lock.lock().await;

        let Some(mut task) = self.store.get(task_id).await? else {
            debug!(task_id = %task_id, "update for unknown task ignored");
            return Ok(false);
        };
        let Some(change) = apply(&mut task) else {
            debug!(task_id = %task_id, state = %task.state(), "update for terminal task ignored");
            return Ok(false);
        };
        self.store.save(&task).await?;

        if let TaskChange::Status { state, .. } = &change {
            info!(task_id = %task_id, state = %state, version = task.version, "task status changed");
        }
        let update = TaskUpdate {
            task_id: task_id.clone(),
            version: task.version,
            change,
        };
        self.subscribers.notify(task_id, &update);

        if task.is_terminal() {
            self.release_lock(task_id);
        }
        Ok(true)
    }

    fn lock_for(&self, task_id: &TaskId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(task_id.clone()).or_default())
    }

    // Later mutations on a terminal task are no-ops, so a fresh mutex is
    // as good as the old one.
    fn release_lock(&self, task_id: &TaskId) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks.remove(task_id);
    }
}

impl std::fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArtifactKind;
    use crate::impls::InMemoryTaskStore;
    use rstest::rstest;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager() -> TaskManager {
        TaskManager::new(Arc::new(InMemoryTaskStore::new()))
    }

    fn id(s: &str) -> TaskId {
        TaskId::new(s)
    }

    #[tokio::test]
    async fn unknown_task_yields_sentinel() {
        let tm = manager();
        let snap = tm.get_task_status(&id("nope")).await.unwrap();
        assert_eq!(snap.state, TaskState::Unknown);
        assert!(snap.is_unknown());
    }

    #[tokio::test]
    async fn create_generates_id_and_rejects_duplicates() {
        let tm = manager();
        let snap = tm.create_task(None, "a bouncing ball").await.unwrap();
        assert!(snap.task_id.as_str().starts_with("task-"));
        assert_eq!(snap.state, TaskState::Submitted);

        tm.create_task(Some(id("T1")), "x").await.unwrap();
        let err = tm.create_task(Some(id("T1")), "x").await.unwrap_err();
        assert!(matches!(err, TaskError::AlreadyExists(_)));
    }

    #[rstest]
    #[case::blank("")]
    #[case::whitespace("a b")]
    #[case::slash("a/b")]
    #[tokio::test]
    async fn create_rejects_invalid_ids(#[case] raw: &str) {
        let err = manager().create_task(Some(id(raw)), "x").await.unwrap_err();
        assert!(matches!(err, TaskError::InvalidTaskId(_)));
    }

    #[rstest]
    #[case::completed(TaskState::Completed)]
    #[case::failed(TaskState::Failed)]
    #[case::canceled(TaskState::Canceled)]
    #[tokio::test]
    async fn terminal_tasks_ignore_updates(#[case] terminal: TaskState) {
        let tm = manager();
        tm.create_task(Some(id("T1")), "x").await.unwrap();
        assert!(tm.update_status(&id("T1"), terminal, None).await.unwrap());

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let _sub = tm.subscribe_to_task_updates(&id("T1"), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert!(!tm.update_status(&id("T1"), TaskState::Working, None).await.unwrap());
        let artifact = Artifact::new("late", ArtifactKind::Diagnostics, serde_json::json!([]));
        assert!(!tm.add_artifact(&id("T1"), artifact).await.unwrap());

        let snap = tm.get_task_status(&id("T1")).await.unwrap();
        assert_eq!(snap.state, terminal);
        assert!(snap.artifacts.is_empty());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn updates_fan_out_in_order_to_every_subscriber() {
        let tm = manager();
        tm.create_task(Some(id("T1")), "x").await.unwrap();

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let (a, b) = (Arc::clone(&seen_a), Arc::clone(&seen_b));
        let _sa = tm.subscribe_to_task_updates(&id("T1"), move |u| a.lock().unwrap().push(u.version));
        let _sb = tm.subscribe_to_task_updates(&id("T1"), move |u| b.lock().unwrap().push(u.version));

        tm.update_status(&id("T1"), TaskState::Working, None).await.unwrap();
        tm.add_artifact(&id("T1"), Artifact::new("plan", ArtifactKind::ScenePlan, serde_json::json!({})))
            .await
            .unwrap();
        tm.update_status(&id("T1"), TaskState::Completed, None).await.unwrap();

        assert_eq!(*seen_a.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(*seen_b.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn disposed_subscriber_gets_nothing_more() {
        let tm = manager();
        tm.create_task(Some(id("T1")), "x").await.unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let mut sub = tm.subscribe_to_task_updates(&id("T1"), move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        tm.update_status(&id("T1"), TaskState::Working, None).await.unwrap();
        sub.dispose();
        tm.update_status(&id("T1"), TaskState::InputRequired, None).await.unwrap();

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(tm.subscriber_count(&id("T1")), 0);
    }

    #[tokio::test]
    async fn cancel_and_list_by_state() {
        let tm = manager();
        tm.create_task(Some(id("A")), "x").await.unwrap();
        tm.create_task(Some(id("B")), "y").await.unwrap();
        assert!(tm.cancel_task(&id("A"), "user request").await.unwrap());

        let submitted = tm.list_tasks_in_state(TaskState::Submitted).await.unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].task_id, id("B"));

        let canceled = tm.get_task_status(&id("A")).await.unwrap();
        assert_eq!(canceled.state, TaskState::Canceled);
        assert_eq!(canceled.message.unwrap().text, "user request");
    }

    #[tokio::test]
    async fn concurrent_mutations_are_serialised_per_task() {
        let tm = Arc::new(manager());
        tm.create_task(Some(id("T1")), "x").await.unwrap();

        let mut joins = Vec::new();
        for i in 0..20 {
            let tm = Arc::clone(&tm);
            joins.push(tokio::spawn(async move {
                let artifact = Artifact::new(format!("a{i}"), ArtifactKind::Diagnostics, serde_json::json!(i));
                tm.add_artifact(&TaskId::new("T1"), artifact).await.unwrap()
            }));
        }
        for j in joins {
            assert!(j.await.unwrap());
        }
        let snap = tm.get_task_status(&id("T1")).await.unwrap();
        assert_eq!(snap.artifacts.len(), 20);
        assert_eq!(snap.version, 20);
    }
}
