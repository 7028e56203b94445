//! Coordinator - entry point of a task's conversation.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::payload::{CancelTask, Payload, PlanScene, TaskSubmitted};
use super::{Agent, AgentContext, COORDINATOR, SCENE_PLANNER, unsupported};
use crate::domain::{AgentError, AgentMessage, BuildJobStatus, StatusMessage, TaskId, TaskState};

const DEFAULT_CANCEL_REASON: &str = "Canceled by request";

pub struct Coordinator {
    ctx: Arc<AgentContext>,
}

impl Coordinator {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }

    async fn on_task_submitted(&self, message: &AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        TaskSubmitted::decode(message)?;
        let task_id = &message.task_id;
        let Some(task) = self.ctx.tasks.get_task(task_id).await? else {
            warn!(task_id = %task_id, "submitted task not found");
            return Ok(None);
        };
        if task.state() != TaskState::Submitted {
            debug!(task_id = %task_id, state = %task.state(), "task already picked up");
            return Ok(None);
        }

        let status = StatusMessage::from_agent(COORDINATOR, "Planning the scene");
        if !self.ctx.tasks.update_status(task_id, TaskState::Working, Some(status)).await? {
            return Ok(None);
        }
        PlanScene { prompt: task.prompt }.reply_to(message, SCENE_PLANNER).map(Some)
    }

    async fn on_cancel(&self, message: &AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        let reason = CancelTask::decode(message)?
            .reason
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        let task_id = &message.task_id;

        let canceled = self.ctx.tasks.cancel_task(task_id, &reason).await?;
        let abandoned = self.abandon_jobs(task_id, &reason).await?;
        info!(task_id = %task_id, canceled, abandoned, "cancel handled");
        Ok(None)
    }

    async fn abandon_jobs(&self, task_id: &TaskId, reason: &str) -> Result<usize, AgentError> {
        let mut abandoned = 0;
        for status in [BuildJobStatus::Pending, BuildJobStatus::Building] {
            for mut job in self.ctx.build_jobs.list_by_status(status).await? {
                if job.task_id.as_ref() != Some(task_id) {
                    continue;
                }
                job.abandon(reason)?;
                self.ctx.build_jobs.save(&job).await?;
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }
}

#[async_trait]
impl Agent for Coordinator {
    fn name(&self) -> &str {
        COORDINATOR
    }

    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        let kind = message.message_type.as_str();
        if kind == TaskSubmitted::TYPE {
            self.on_task_submitted(&message).await
        } else if kind == CancelTask::TYPE {
            self.on_cancel(&message).await
        } else {
            Err(unsupported(COORDINATOR, &message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::PROCESSOR;
    use crate::agents::testing::{fixture, working_task};
    use crate::domain::ComponentBuildJob;

    #[tokio::test]
    async fn submitted_task_moves_to_working_and_asks_planner() {
        let f = fixture();
        let task_id = TaskId::new("T1");
        f.ctx.tasks.create_task(Some(task_id.clone()), "a red ball").await.unwrap();

        let msg = TaskSubmitted {}.message(PROCESSOR, COORDINATOR, task_id.clone()).unwrap();
        let reply = Coordinator::new(f.ctx.clone()).process_message(msg).await.unwrap().unwrap();

        assert_eq!(reply.recipient, SCENE_PLANNER);
        assert_eq!(PlanScene::decode(&reply).unwrap().prompt, "a red ball");
        let snap = f.ctx.tasks.get_task_status(&task_id).await.unwrap();
        assert_eq!(snap.state, TaskState::Working);
        assert_eq!(snap.message.unwrap().agent_name.as_deref(), Some(COORDINATOR));
    }

    #[tokio::test]
    async fn resubmission_is_ignored() {
        let f = fixture();
        let task_id = working_task(&f.ctx, "T1").await;
        let msg = TaskSubmitted {}.message(PROCESSOR, COORDINATOR, task_id).unwrap();
        assert!(Coordinator::new(f.ctx.clone()).process_message(msg).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_marks_task_and_abandons_unfinished_jobs() {
        let f = fixture();
        let task_id = working_task(&f.ctx, "T1").await;
        let job = ComponentBuildJob::new("T1", "A", "src").for_task(task_id.clone());
        let other = ComponentBuildJob::new("T2", "B", "src").for_task(TaskId::new("T2"));
        f.ctx.build_jobs.insert(job.clone()).await.unwrap();
        f.ctx.build_jobs.insert(other.clone()).await.unwrap();

        let msg = CancelTask { reason: Some("changed my mind".into()) }
            .message("Api", COORDINATOR, task_id.clone())
            .unwrap();
        assert!(Coordinator::new(f.ctx.clone()).process_message(msg).await.unwrap().is_none());

        let snap = f.ctx.tasks.get_task_status(&task_id).await.unwrap();
        assert_eq!(snap.state, TaskState::Canceled);
        assert_eq!(snap.message.unwrap().text, "changed my mind");

        let job = f.ctx.build_jobs.get(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, BuildJobStatus::Failed);
        let other = f.ctx.build_jobs.get(other.id).await.unwrap().unwrap();
        assert_eq!(other.status, BuildJobStatus::Pending);
    }

    #[tokio::test]
    async fn unsupported_message_type_is_an_error() {
        let f = fixture();
        let msg = AgentMessage::new("dance", PROCESSOR, COORDINATOR, TaskId::new("T1"), serde_json::json!({}));
        let err = Coordinator::new(f.ctx.clone()).process_message(msg).await.unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedMessage { .. }));
    }
}
