//! Agents - named message handlers driven by the task processor.
//!
//! Every agent implements the same contract (`Agent`) and is selected by
//! name from the `AgentRegistry`. A returned message is the next hop; the
//! processor publishes it on the bus.

pub mod builder;
pub mod coordinator;
pub mod error_fixer;
pub mod payload;
pub mod planner;
pub mod registry;
pub mod storage;

use std::sync::Arc;

use async_trait::async_trait;

use crate::app::{MessageBus, RetryPolicy, TaskManager};
use crate::domain::{AgentError, AgentMessage};
use crate::pipeline::BuildPipeline;
use crate::ports::{BuildJobStore, CodeGenerator, ObjectStore};

pub use self::builder::Builder;
pub use self::coordinator::Coordinator;
pub use self::error_fixer::ErrorFixer;
pub use self::planner::ScenePlanner;
pub use self::registry::{AgentRegistry, RegistryError};
pub use self::storage::Storage;

pub const COORDINATOR: &str = "Coordinator";
pub const SCENE_PLANNER: &str = "ScenePlanner";
pub const BUILDER: &str = "Builder";
pub const ERROR_FIXER: &str = "ErrorFixer";
pub const STORAGE: &str = "Storage";

/// Agents the default pipeline needs.
pub const PIPELINE_AGENTS: &[&str] = &[COORDINATOR, SCENE_PLANNER, BUILDER, ERROR_FIXER, STORAGE];

/// Sender name for messages that originate outside any agent.
pub const PROCESSOR: &str = "TaskProcessor";
pub const API: &str = "Api";

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    /// Handle one message. `Ok(None)` means no further action.
    async fn process_message(&self, message: AgentMessage) -> Result<Option<AgentMessage>, AgentError>;
}

/// Services shared by the agents.
pub struct AgentContext {
    pub tasks: Arc<TaskManager>,
    pub bus: Arc<MessageBus>,
    pub build_jobs: Arc<dyn BuildJobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub pipeline: BuildPipeline,
    pub generator: Arc<dyn CodeGenerator>,
    pub retry: RetryPolicy,
}

impl std::fmt::Debug for AgentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentContext")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

pub(crate) fn unsupported(agent: &str, message: &AgentMessage) -> AgentError {
    AgentError::UnsupportedMessage {
        agent: agent.to_string(),
        message_type: message.message_type.clone(),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared fixtures for agent tests.

    use super::*;
    use crate::domain::{TaskId, TaskState};
    use crate::impls::{InMemoryBuildJobStore, InMemoryObjectStore, InMemoryTaskStore, StructuralSandbox, TemplateCodeGenerator};

    pub(crate) struct Fixture {
        pub ctx: Arc<AgentContext>,
        pub objects: InMemoryObjectStore,
    }

    pub(crate) fn fixture_with(generator: Arc<dyn CodeGenerator>, retry: RetryPolicy) -> Fixture {
        let objects = InMemoryObjectStore::new();
        let ctx = Arc::new(AgentContext {
            tasks: Arc::new(TaskManager::new(Arc::new(InMemoryTaskStore::new()))),
            bus: Arc::new(MessageBus::new()),
            build_jobs: Arc::new(InMemoryBuildJobStore::new()),
            objects: Arc::new(objects.clone()),
            pipeline: BuildPipeline::new(Arc::new(StructuralSandbox)),
            generator,
            retry,
        });
        Fixture { ctx, objects }
    }

    pub(crate) fn fixture() -> Fixture {
        fixture_with(Arc::new(TemplateCodeGenerator), RetryPolicy::immediate(3))
    }

    pub(crate) async fn working_task(ctx: &AgentContext, id: &str) -> TaskId {
        let task_id = TaskId::new(id);
        ctx.tasks.create_task(Some(task_id.clone()), "Launch day. Doors open at nine").await.unwrap();
        ctx.tasks.update_status(&task_id, TaskState::Working, None).await.unwrap();
        task_id
    }
}
