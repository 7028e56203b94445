//! Impls - port implementations.
//!
//! In-memory stores for tests and single-process deployments, a local
//! filesystem object store, the sandboxes and a template code generator.
//! Database, blob-storage and LLM-backed implementations live outside the
//! core.

pub mod inmem_build_job_store;
pub mod inmem_task_store;
pub mod node_sandbox;
pub mod object_store;
pub mod structural_sandbox;
pub mod template_generator;

pub use self::inmem_build_job_store::InMemoryBuildJobStore;
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::node_sandbox::NodeSandbox;
pub use self::object_store::{InMemoryObjectStore, LocalObjectStore};
pub use self::structural_sandbox::StructuralSandbox;
pub use self::template_generator::TemplateCodeGenerator;
