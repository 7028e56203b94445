//! Domain model (ids, task lifecycle, messages, build jobs, plans, errors).

pub mod artifact;
pub mod build_job;
pub mod errors;
pub mod events;
pub mod ids;
pub mod message;
pub mod plan;
pub mod state;
pub mod task;

pub use artifact::{Artifact, ArtifactKind};
pub use build_job::{BuildJobStatus, ComponentBuildJob};
pub use errors::{AgentError, StoreError, TaskError, TransitionError};
pub use events::{TaskChange, TaskUpdate};
pub use ids::{ArtifactId, JobId, MessageId, TaskId};
pub use message::AgentMessage;
pub use plan::{Palette, ScenePlan};
pub use state::TaskState;
pub use task::{StatusMessage, Task, TaskSnapshot, TaskStatus};
