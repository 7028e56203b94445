//! ScenePlanner - derives a scene plan from the task prompt.

use std::sync::Arc;

use async_trait::async_trait;

use super::payload::{GenerateComponent, Payload, PlanScene};
use super::{Agent, AgentContext, BUILDER, SCENE_PLANNER, unsupported};
use crate::domain::{AgentError, AgentMessage, Artifact, ArtifactKind, ScenePlan, StatusMessage, TaskState};

pub struct ScenePlanner {
    ctx: Arc<AgentContext>,
}

impl ScenePlanner {
    pub fn new(ctx: Arc<AgentContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Agent for ScenePlanner {
    fn name(&self) -> &str {
        SCENE_PLANNER
    }

    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
        if message.message_type != PlanScene::TYPE {
            return Err(unsupported(SCENE_PLANNER, &message));
        }
        let request = PlanScene::decode(&message)?;
        let plan = ScenePlan::from_prompt(&request.prompt);
        let task_id = &message.task_id;

        let content = serde_json::to_value(&plan).map_err(|e| AgentError::MalformedPayload {
            message_type: PlanScene::TYPE.to_string(),
            reason: e.to_string(),
        })?;
        let artifact = Artifact::new("scene-plan", ArtifactKind::ScenePlan, content);
        if !self.ctx.tasks.add_artifact(task_id, artifact).await? {
            return Ok(None);
        }

        let text = format!(
            "Planned \"{}\": {}s at {} fps",
            plan.title, plan.duration_secs, plan.fps
        );
        self.ctx
            .tasks
            .update_status(task_id, TaskState::Working, Some(StatusMessage::from_agent(SCENE_PLANNER, text)))
            .await?;

        GenerateComponent { plan }.reply_to(&message, BUILDER).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::COORDINATOR;
    use crate::agents::testing::{fixture, working_task};
    use crate::domain::TaskId;

    #[tokio::test]
    async fn plan_is_attached_and_builder_is_asked() {
        let f = fixture();
        let task_id = working_task(&f.ctx, "T1").await;
        let msg = PlanScene { prompt: "a 10 second intro".into() }
            .message(COORDINATOR, SCENE_PLANNER, task_id.clone())
            .unwrap();

        let reply = ScenePlanner::new(f.ctx.clone()).process_message(msg).await.unwrap().unwrap();
        assert_eq!(reply.recipient, BUILDER);
        let plan = GenerateComponent::decode(&reply).unwrap().plan;
        assert_eq!(plan.duration_secs, 10);

        let snap = f.ctx.tasks.get_task_status(&task_id).await.unwrap();
        assert_eq!(snap.artifacts.len(), 1);
        assert_eq!(snap.artifacts[0].kind, ArtifactKind::ScenePlan);
        assert_eq!(snap.artifacts[0].content["duration_in_frames"], 300);
    }

    #[tokio::test]
    async fn canceled_task_stops_the_chain() {
        let f = fixture();
        let task_id = working_task(&f.ctx, "T1").await;
        f.ctx.tasks.cancel_task(&task_id, "stop").await.unwrap();

        let msg = PlanScene { prompt: "x".into() }
            .message(COORDINATOR, SCENE_PLANNER, TaskId::new("T1"))
            .unwrap();
        assert!(ScenePlanner::new(f.ctx.clone()).process_message(msg).await.unwrap().is_none());
    }
}
