//! ErrorFixer - decides whether a failed build is retried automatically.
//!
//! Auto-retry stops after `RetryPolicy::max_consecutive_failures`; from
//! there on only a manual fix moves the job again.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::payload::{BuildComponent, FixComponent, Payload};
use super::{Agent, AgentContext, BUILDER, ERROR_FIXER, unsupported};
use crate::domain::{AgentError, AgentMessage, BuildJobStatus, ComponentBuildJob, StatusMessage, TaskState};
use crate::pipeline::repair_source;

pub struct ErrorFixer {
    ctx: Arc<AgentContext>,
}

impl ErrorFixer {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    /// Local repair first, then whatever the generator offers.
    async fn propose(&self, job: &ComponentBuildJob, error: &str) -> Option<String> {
        if let Some(repair) = repair_source(&job.source) {
            let steps: Vec<&str> = repair.steps.iter().map(|s| s.as_str()).collect();
            debug!(job_id = %job.id, ?steps, "source repaired locally");
            return Some(repair.source);
        }
        match self.ctx.generator.repair(&job.source, error).await {
            Ok(source) => source,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "generator repair failed; retrying unchanged source");
                None
            }
        }
    }
}

#[async_trait]
impl Agent for ErrorFixer {
    fn name(&self) -> &str {
        ERROR_FIXER
    }

    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        if message.message_type != FixComponent::TYPE {
            return Err(unsupported(ERROR_FIXER, &message));
        }
        let FixComponent { job_id, error } = FixComponent::decode(&message)?;
        let mut job = self
            .ctx
            .build_jobs
            .get(job_id)
            .await?
            .ok_or(AgentError::JobNotFound(job_id))?;
        if job.status != BuildJobStatus::Failed {
            debug!(job_id = %job_id, status = %job.status, "job is not failed; nothing to fix");
            return Ok(None);
        }

        let retry = &self.ctx.retry;
        if !retry.should_retry(job.consecutive_failures) {
            let text = format!(
                "Build of {} failed {} times in a row; manual fix required: {error}",
                job.name, job.consecutive_failures
            );
            warn!(job_id = %job_id, failures = job.consecutive_failures, "auto-retry exhausted");
            self.ctx
                .tasks
                .update_status(&message.task_id, TaskState::Failed, Some(StatusMessage::from_agent(ERROR_FIXER, text)))
                .await?;
            return Ok(None);
        }

        let repaired = self.propose(&job, &error).await;
        job.fix(repaired)?;
        self.ctx.build_jobs.save(&job).await?;

        let delay = retry.jittered_delay(job.consecutive_failures);
        info!(job_id = %job_id, attempt = job.retry_count + 1, ?delay, "build retry scheduled");
        let text = format!("Retrying build of {} (attempt {})", job.name, job.retry_count + 1);
        let updated = self
            .ctx
            .tasks
            .update_status(&message.task_id, TaskState::Working, Some(StatusMessage::from_agent(ERROR_FIXER, text)))
            .await?;
        if !updated {
            return Ok(None);
        }

        BuildComponent { job_id }
            .reply_to(&message, BUILDER)
            .map(|m| Some(m.deliver_after(delay)))
    }
}
