//! sceneforge-core
//!
//! Turns a text prompt into a loadable animation component through a chain
//! of cooperating agents, and streams the task's progress to observers.
//!
//! # Modules
//! - **domain**: tasks, build jobs, messages, artifacts, scene plans, errors
//! - **ports**: TaskStore, BuildJobStore, ObjectStore, Sandbox, CodeGenerator
//! - **pipeline**: generated module source -> self-registering script
//! - **agents**: Coordinator, ScenePlanner, Builder, ErrorFixer, Storage
//! - **app**: task manager, message bus, processor loop, stream gateway
//! - **impls**: in-memory stores, local object store, sandboxes, template
//!   generator

pub mod agents;
pub mod app;
pub mod domain;
pub mod impls;
pub mod pipeline;
pub mod ports;
