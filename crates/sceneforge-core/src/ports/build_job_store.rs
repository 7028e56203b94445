//! BuildJobStore port - persisted component build jobs.

use async_trait::async_trait;

use crate::domain::{BuildJobStatus, ComponentBuildJob, JobId, StoreError};

#[async_trait]
pub trait BuildJobStore: Send + Sync {
    async fn insert(&self, job: ComponentBuildJob) -> Result<(), StoreError>;

    async fn get(&self, job_id: JobId) -> Result<Option<ComponentBuildJob>, StoreError>;

    async fn save(&self, job: &ComponentBuildJob) -> Result<(), StoreError>;

    /// Jobs in `status`, oldest first.
    async fn list_by_status(&self, status: BuildJobStatus) -> Result<Vec<ComponentBuildJob>, StoreError>;
}
