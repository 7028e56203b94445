//! AppBuilder - wiring of stores, pipeline and agents.
//!
//! Fail-fast: `expect_agents` lists agent names that must be registered;
//! `build` refuses to produce an `App` when any are missing, and duplicate
//! registration is an error as well.

use std::sync::Arc;

use tracing::info;

use crate::agents::payload::{BuildComponent, CancelTask, Payload};
use crate::agents::{
    API, Agent, AgentContext, AgentRegistry, BUILDER, Builder, COORDINATOR, Coordinator, ErrorFixer, PIPELINE_AGENTS,
    RegistryError, ScenePlanner, Storage,
};
use crate::app::config::{GatewayConfig, ProcessorConfig};
use crate::app::message_bus::{Delivery, MessageBus};
use crate::app::processor::{ProcessorHandle, TaskProcessor};
use crate::app::retry::RetryPolicy;
use crate::app::stream_gateway::StreamGateway;
use crate::app::task_manager::TaskManager;
use crate::domain::{AgentError, BuildJobStatus, ComponentBuildJob, JobId, TaskError, TaskId, TaskSnapshot};
use crate::impls::{InMemoryBuildJobStore, InMemoryObjectStore, InMemoryTaskStore, StructuralSandbox, TemplateCodeGenerator};
use crate::pipeline::BuildPipeline;
use crate::ports::{BuildJobStore, CodeGenerator, ObjectStore, Sandbox, TaskStore};

type AgentFactory = Box<dyn FnOnce(Arc<AgentContext>) -> Arc<dyn Agent>>;

/// Builds an `App`.
///
/// ```ignore
/// let app = AppBuilder::new()
///     .sandbox(Arc::new(NodeSandbox::new("node")))
///     .retry_policy(RetryPolicy { max_consecutive_failures: 5, ..Default::default() })
///     .expect_agents(PIPELINE_AGENTS)
///     .build()?;
/// let processor = app.init(ProcessorConfig::default());
/// ```
pub struct AppBuilder {
    task_store: Option<Arc<dyn TaskStore>>,
    build_job_store: Option<Arc<dyn BuildJobStore>>,
    object_store: Option<Arc<dyn ObjectStore>>,
    sandbox: Option<Arc<dyn Sandbox>>,
    code_generator: Option<Arc<dyn CodeGenerator>>,
    retry_policy: RetryPolicy,
    default_agents: bool,
    extra_agents: Vec<AgentFactory>,
    expected_agents: Option<Vec<String>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing agents: {0:?}. These agents were expected but not registered.")]
    MissingAgents(Vec<String>),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            task_store: None,
            build_job_store: None,
            object_store: None,
            sandbox: None,
            code_generator: None,
            retry_policy: RetryPolicy::default(),
            default_agents: true,
            extra_agents: Vec::new(),
            expected_agents: None,
        }
    }

    pub fn task_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.task_store = Some(store);
        self
    }

    pub fn build_job_store(mut self, store: Arc<dyn BuildJobStore>) -> Self {
        self.build_job_store = Some(store);
        self
    }

    pub fn object_store(mut self, store: Arc<dyn ObjectStore>) -> Self {
        self.object_store = Some(store);
        self
    }

    pub fn sandbox(mut self, sandbox: Arc<dyn Sandbox>) -> Self {
        self.sandbox = Some(sandbox);
        self
    }

    pub fn code_generator(mut self, generator: Arc<dyn CodeGenerator>) -> Self {
        self.code_generator = Some(generator);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Register an additional agent, built from the shared context.
    pub fn agent(mut self, factory: impl FnOnce(Arc<AgentContext>) -> Arc<dyn Agent> + 'static) -> Self {
        self.extra_agents.push(Box::new(factory));
        self
    }

    /// Skip the five pipeline agents; only `agent(..)` registrations remain.
    pub fn without_default_agents(mut self) -> Self {
        self.default_agents = false;
        self
    }

    pub fn expect_agents(mut self, names: &[&str]) -> Self {
        self.expected_agents = Some(names.iter().map(|n| n.to_string()).collect());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let tasks = Arc::new(TaskManager::new(
            self.task_store.unwrap_or_else(|| Arc::new(InMemoryTaskStore::new())),
        ));
        let sandbox = self.sandbox.unwrap_or_else(|| Arc::new(StructuralSandbox));
        let ctx = Arc::new(AgentContext {
            tasks,
            bus: Arc::new(MessageBus::new()),
            build_jobs: self
                .build_job_store
                .unwrap_or_else(|| Arc::new(InMemoryBuildJobStore::new())),
            objects: self.object_store.unwrap_or_else(|| Arc::new(InMemoryObjectStore::new())),
            pipeline: BuildPipeline::new(sandbox),
            generator: self.code_generator.unwrap_or_else(|| Arc::new(TemplateCodeGenerator)),
            retry: self.retry_policy,
        });

        let mut registry = AgentRegistry::new();
        if self.default_agents {
            registry.register(Arc::new(Coordinator::new(ctx.clone())))?;
            registry.register(Arc::new(ScenePlanner::new(ctx.clone())))?;
            registry.register(Arc::new(Builder::new(ctx.clone())))?;
            registry.register(Arc::new(ErrorFixer::new(ctx.clone())))?;
            registry.register(Arc::new(Storage::new(ctx.clone())))?;
        }
        for factory in self.extra_agents {
            registry.register(factory(ctx.clone()))?;
        }

        if let Some(expected) = &self.expected_agents {
            let missing: Vec<String> = expected
                .iter()
                .filter(|name| registry.get(name).is_none())
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingAgents(missing));
            }
        }

        info!(agents = ?registry.names(), retry = ?ctx.retry, "app built");
        Ok(App {
            ctx,
            registry: Arc::new(registry),
        })
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Wired application: shared services plus the agent registry.
pub struct App {
    ctx: Arc<AgentContext>,
    registry: Arc<AgentRegistry>,
}

impl App {
    pub fn context(&self) -> Arc<AgentContext> {
        Arc::clone(&self.ctx)
    }

    pub fn tasks(&self) -> &Arc<TaskManager> {
        &self.ctx.tasks
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.ctx.bus
    }

    pub fn registry(&self) -> Arc<AgentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Start the task processor. Must be called inside a tokio runtime.
    pub fn init(&self, config: ProcessorConfig) -> ProcessorHandle {
        TaskProcessor::new(self.context(), self.registry()).spawn(config)
    }

    pub fn gateway(&self, config: GatewayConfig) -> StreamGateway {
        StreamGateway::new(Arc::clone(&self.ctx.tasks), Arc::clone(&self.ctx.bus), config)
    }

    /// Register a task; the processor's next poll hands it to the
    /// Coordinator.
    pub async fn submit_task(&self, task_id: Option<TaskId>, prompt: &str) -> Result<TaskSnapshot, TaskError> {
        self.ctx.tasks.create_task(task_id, prompt).await
    }

    /// Ask the Coordinator to cancel a task.
    pub fn request_cancel(&self, task_id: &TaskId, reason: Option<String>) -> Result<Delivery, AgentError> {
        let message = CancelTask { reason }.message(API, COORDINATOR, task_id.clone())?;
        Ok(self.ctx.bus.publish(&message))
    }

    pub async fn build_job(&self, job_id: JobId) -> Result<Option<ComponentBuildJob>, AgentError> {
        Ok(self.ctx.build_jobs.get(job_id).await?)
    }

    /// Manual fix action: `failed -> building`, optionally with new source,
    /// then a rebuild request to the Builder. Works past the auto-retry cap.
    pub async fn fix_build_job(&self, job_id: JobId, source: Option<String>) -> Result<ComponentBuildJob, AgentError> {
        let mut job = self
            .ctx
            .build_jobs
            .get(job_id)
            .await?
            .ok_or(AgentError::JobNotFound(job_id))?;
        job.fix(source)?;
        self.ctx.build_jobs.save(&job).await?;
        info!(job_id = %job_id, retry_count = job.retry_count, "manual fix applied");

        let task_id = job
            .task_id
            .clone()
            .unwrap_or_else(|| TaskId::new(job.project_id.as_str()));
        let message = BuildComponent { job_id }.message(API, BUILDER, task_id)?;
        self.ctx.bus.publish(&message);
        Ok(job)
    }

    /// Build jobs in `status`, oldest first.
    pub async fn build_jobs_in(&self, status: BuildJobStatus) -> Result<Vec<ComponentBuildJob>, AgentError> {
        Ok(self.ctx.build_jobs.list_by_status(status).await?)
    }

    /// Names of the default pipeline agents that are not registered.
    pub fn missing_pipeline_agents(&self) -> Vec<&'static str> {
        PIPELINE_AGENTS
            .iter()
            .copied()
            .filter(|name| self.registry.get(name).is_none())
            .collect()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").field("registry", &self.registry).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::ERROR_FIXER;
    use crate::domain::{AgentMessage, TaskState};
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl Agent for Named {
        fn name(&self) -> &str {
            self.0
        }

        async fn process_message(&self, _message: AgentMessage) -> Result<Option<AgentMessage>, AgentError> {
            Ok(None)
        }
    }

    #[test]
    fn default_build_registers_pipeline_agents() {
        let app = AppBuilder::new().expect_agents(PIPELINE_AGENTS).build().unwrap();
        assert_eq!(app.registry().len(), 5);
        assert!(app.missing_pipeline_agents().is_empty());
    }

    #[test]
    fn missing_expected_agents_fail_the_build() {
        let result = AppBuilder::new()
            .without_default_agents()
            .agent(|_| Arc::new(Named(COORDINATOR)))
            .expect_agents(&[COORDINATOR, ERROR_FIXER])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingAgents(missing)) if missing == vec![ERROR_FIXER.to_string()]
        ));
    }

    #[test]
    fn duplicate_agent_fails_the_build() {
        let result = AppBuilder::new().agent(|_| Arc::new(Named(BUILDER))).build();
        assert!(matches!(
            result,
            Err(BuildError::Registry(RegistryError::AlreadyRegistered(name))) if name == BUILDER
        ));
    }

    #[tokio::test]
    async fn manual_fix_requires_failed_job() {
        let app = AppBuilder::new().build().unwrap();
        let job = ComponentBuildJob::new("p", "Foo", "src");
        app.context().build_jobs.insert(job.clone()).await.unwrap();

        let err = app.fix_build_job(job.id, None).await.unwrap_err();
        assert!(matches!(err, AgentError::Transition(_)));

        let missing = JobId::from_ulid(ulid::Ulid::new());
        let err = app.fix_build_job(missing, None).await.unwrap_err();
        assert!(matches!(err, AgentError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_request_without_processor_is_a_routing_miss() {
        let app = AppBuilder::new().build().unwrap();
        let snap = app.submit_task(None, "p").await.unwrap();
        let delivery = app.request_cancel(&snap.task_id, None).unwrap();
        assert!(!delivery.is_routed());
        assert_eq!(
            app.tasks().get_task_status(&snap.task_id).await.unwrap().state,
            TaskState::Submitted
        );
    }
}
