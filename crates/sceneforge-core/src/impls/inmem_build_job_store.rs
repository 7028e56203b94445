//! InMemoryBuildJobStore - development / test build job store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{BuildJobStatus, ComponentBuildJob, JobId, StoreError};
use crate::ports::BuildJobStore;

#[derive(Default, Clone)]
pub struct InMemoryBuildJobStore {
    jobs: Arc<Mutex<HashMap<JobId, ComponentBuildJob>>>,
}

impl InMemoryBuildJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BuildJobStore for InMemoryBuildJobStore {
    async fn insert(&self, job: ComponentBuildJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(job.id.to_string()));
        }
        jobs.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, job_id: JobId) -> Result<Option<ComponentBuildJob>, StoreError> {
        Ok(self.jobs.lock().await.get(&job_id).cloned())
    }

    async fn save(&self, job: &ComponentBuildJob) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().await;
        match jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(job.id.to_string())),
        }
    }

    async fn list_by_status(&self, status: BuildJobStatus) -> Result<Vec<ComponentBuildJob>, StoreError> {
        let jobs = self.jobs.lock().await;
        let mut found: Vec<ComponentBuildJob> = jobs
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        // JobIds are ULIDs, so id order is creation order.
        found.sort_by_key(|j| j.id);
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_jobs_are_listed_oldest_first() {
        let store = InMemoryBuildJobStore::new();
        let first = ComponentBuildJob::new("p", "A", "src");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = ComponentBuildJob::new("p", "B", "src");
        store.insert(second.clone()).await.unwrap();
        store.insert(first.clone()).await.unwrap();

        let pending = store.list_by_status(BuildJobStatus::Pending).await.unwrap();
        assert_eq!(pending.iter().map(|j| j.id).collect::<Vec<_>>(), vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn save_persists_transitions() {
        let store = InMemoryBuildJobStore::new();
        let mut job = ComponentBuildJob::new("p", "A", "src");
        store.insert(job.clone()).await.unwrap();

        job.start_building().unwrap();
        store.save(&job).await.unwrap();

        assert!(store.list_by_status(BuildJobStatus::Pending).await.unwrap().is_empty());
        let back = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(back.status, BuildJobStatus::Building);
    }
}
