//! Storage - publishes compiled scripts and completes the task.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info};

use super::payload::{Payload, StoreComponent};
use super::{Agent, AgentContext, STORAGE, unsupported};
use crate::domain::{AgentError, AgentMessage, Artifact, ArtifactKind, BuildJobStatus, StatusMessage, TaskState};

const CONTENT_TYPE: &str = "application/javascript";

pub struct Storage {
    ctx: Arc<AgentContext>,
}

impl Storage {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Agent for Storage {
    fn name(&self) -> &str {
        STORAGE
    }

    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        if message.message_type != StoreComponent::TYPE {
            return Err(unsupported(STORAGE, &message));
        }
        let StoreComponent {
            job_id,
            script,
            component_name,
        } = StoreComponent::decode(&message)?;

        let mut job = self
            .ctx
            .build_jobs
            .get(job_id)
            .await?
            .ok_or(AgentError::JobNotFound(job_id))?;
        if job.status != BuildJobStatus::Building {
            debug!(job_id = %job_id, status = %job.status, "store request for job not building; ignored");
            return Ok(None);
        }

        let url = self
            .ctx
            .objects
            .put(&job.output_key(), script.into_bytes(), CONTENT_TYPE)
            .await?;
        job.complete(url.as_str())?;
        self.ctx.build_jobs.save(&job).await?;
        info!(job_id = %job_id, %url, "component stored");

        let task_id = &message.task_id;
        let component_name = component_name.unwrap_or_else(|| job.name.clone());
        let artifact = Artifact::new(
            "compiled-component",
            ArtifactKind::CompiledComponent,
            json!({ "job_id": job.id, "url": url, "component_name": component_name }),
        );
        if !self.ctx.tasks.add_artifact(task_id, artifact).await? {
            return Ok(None);
        }
        self.ctx
            .tasks
            .update_status(
                task_id,
                TaskState::Completed,
                Some(StatusMessage::from_agent(STORAGE, format!("Component {component_name} ready"))),
            )
            .await?;
        Ok(None)
    }
}
