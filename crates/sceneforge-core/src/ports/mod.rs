//! Ports - abstraction layer.
//!
//! Each trait is the seam to an external collaborator (relational store,
//! blob storage, JS runtime, LLM). The core only talks to these traits;
//! `impls` provides in-memory, local and subprocess implementations.

pub mod build_job_store;
pub mod code_generator;
pub mod object_store;
pub mod sandbox;
pub mod task_store;

pub use self::build_job_store::BuildJobStore;
pub use self::code_generator::{CodeGenerator, GenerationError};
pub use self::object_store::ObjectStore;
pub use self::sandbox::{Sandbox, SandboxError, SandboxReport};
pub use self::task_store::TaskStore;
