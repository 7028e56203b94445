//! Builder - generates component source and runs the build pipeline.
//!
//! `generate_component` only records a pending build job; the processor's
//! poll picks it up and sends `build_component`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, info, warn};

use super::payload::{BuildComponent, FixComponent, GenerateComponent, Payload, StoreComponent};
use super::{Agent, AgentContext, BUILDER, ERROR_FIXER, STORAGE, unsupported};
use crate::domain::{
    AgentError, AgentMessage, Artifact, ArtifactKind, BuildJobStatus, ComponentBuildJob, StatusMessage, TaskState,
};
use crate::pipeline::BuildOutcome;

pub struct Builder {
    ctx: Arc<AgentContext>,
}

impl Builder {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    async fn status(&self, message: &AgentMessage, text: String) -> Result<bool, AgentError> {
        Ok(self
            .ctx
            .tasks
            .update_status(&message.task_id, TaskState::Working, Some(StatusMessage::from_agent(BUILDER, text)))
            .await?)
    }

    async fn on_generate(&self, message: &AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        let GenerateComponent { plan } = GenerateComponent::decode(message)?;
        let task_id = &message.task_id;

        let source = match self.ctx.generator.generate(&plan).await {
            Ok(source) => source,
            Err(e) => {
                let text = format!("Code generation failed: {e}");
                self.ctx
                    .tasks
                    .update_status(task_id, TaskState::Failed, Some(StatusMessage::from_agent(BUILDER, text)))
                    .await?;
                return Err(AgentError::Generation(e.0));
            }
        };

        let job = ComponentBuildJob::new(task_id.as_str(), &plan.component_name, source).for_task(task_id.clone());
        let artifact = Artifact::new(
            "component-source",
            ArtifactKind::ComponentSource,
            json!({ "job_id": job.id, "name": job.name, "source": job.source }),
        );
        if !self.ctx.tasks.add_artifact(task_id, artifact).await? {
            return Ok(None);
        }
        self.ctx.build_jobs.insert(job.clone()).await?;
        info!(task_id = %task_id, job_id = %job.id, name = %job.name, "build job queued");

        self.status(message, format!("Component {} generated; build queued", job.name))
            .await?;
        Ok(None)
    }

    async fn on_build(&self, message: &AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        let BuildComponent { job_id } = BuildComponent::decode(message)?;
        let mut job = self
            .ctx
            .build_jobs
            .get(job_id)
            .await?
            .ok_or(AgentError::JobNotFound(job_id))?;

        if let Some(task_id) = &job.task_id {
            let snapshot = self.ctx.tasks.get_task_status(task_id).await?;
            if snapshot.state == TaskState::Canceled && !job.is_finished() {
                job.abandon("task canceled")?;
                self.ctx.build_jobs.save(&job).await?;
                debug!(job_id = %job_id, "build skipped for canceled task");
                return Ok(None);
            }
        }

        match job.status {
            BuildJobStatus::Pending => job.start_building()?,
            BuildJobStatus::Building => {}
            status => {
                debug!(job_id = %job_id, %status, "stale build request ignored");
                return Ok(None);
            }
        }
        self.ctx.build_jobs.save(&job).await?;
        self.status(message, format!("Building {} (attempt {})", job.name, job.retry_count + 1))
            .await?;

        let output = self.ctx.pipeline.build(&job.source).await;
        job.diagnostics = output.diagnostic_lines();
        if !output.diagnostics.is_empty() {
            let artifact = Artifact::new(
                "diagnostics",
                ArtifactKind::Diagnostics,
                json!({ "job_id": job.id, "diagnostics": output.diagnostics }),
            );
            self.ctx.tasks.add_artifact(&message.task_id, artifact).await?;
        }

        match output.outcome {
            BuildOutcome::Compiled { report } => {
                self.ctx.build_jobs.save(&job).await?;
                info!(job_id = %job_id, component = ?report.component_name, "component compiled");
                StoreComponent {
                    job_id,
                    script: output.script,
                    component_name: report.component_name.or_else(|| Some(job.name.clone())),
                }
                .reply_to(message, STORAGE)
                .map(Some)
            }
            BuildOutcome::Fallback { error } => {
                job.fail(error.as_str())?;
                self.ctx.build_jobs.save(&job).await?;
                warn!(job_id = %job_id, failures = job.consecutive_failures, %error, "component build failed");

                let artifact = Artifact::new(
                    "fallback-component",
                    ArtifactKind::FallbackComponent,
                    json!({ "job_id": job.id, "error": error, "script": output.script }),
                );
                self.ctx.tasks.add_artifact(&message.task_id, artifact).await?;
                self.status(message, format!("Build of {} failed: {error}", job.name)).await?;

                FixComponent { job_id, error }.reply_to(message, ERROR_FIXER).map(Some)
            }
        }
    }
}

#[async_trait]
impl Agent for Builder {
    fn name(&self) -> &str {
        BUILDER
    }

    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        let kind = message.message_type.as_str();
        if kind == GenerateComponent::TYPE {
            self.on_generate(&message).await
        } else if kind == BuildComponent::TYPE {
            self.on_build(&message).await
        } else {
            Err(unsupported(BUILDER, &message))
        }
    }
}
