//! Errors shared across the core.
//!
//! Classification follows how callers are expected to react:
//! - validation problems are rejected at the boundary
//! - not-found is *not* an error for tasks (see `TaskState::Unknown`)
//! - store / infrastructure failures propagate as `StoreError`
//! - build failures never leave the pipeline (they become fallbacks)

use thiserror::Error;

use super::build_job::BuildJobStatus;
use super::ids::{JobId, TaskId};

/// Persistence failure reported by a store port.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record already exists: {0}")]
    Conflict(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Illegal build job status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("build job {job_id} cannot move from {from} to {to}")]
pub struct TransitionError {
    pub job_id: JobId,
    pub from: BuildJobStatus,
    pub to: BuildJobStatus,
}

/// Errors raised by `TaskManager` operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("invalid task id: {0:?}")]
    InvalidTaskId(String),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while an agent processes a message.
///
/// The processor logs these and moves on; they never stop the loop.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("agent {agent} does not handle message type {message_type}")]
    UnsupportedMessage { agent: String, message_type: String },

    #[error("malformed payload for {message_type}: {reason}")]
    MalformedPayload { message_type: String, reason: String },

    #[error("build job not found: {0}")]
    JobNotFound(JobId),

    #[error("code generation failed: {0}")]
    Generation(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
